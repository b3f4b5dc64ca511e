// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Envelope serialization pipeline for persistent stores.
//!
//! ```text
//! encode: Envelope → JSON → [zstd] → [AES-256-GCM] → bytes
//! decode: bytes → [decrypt if framed] → [unzstd if magic] → JSON → Envelope
//! ```
//!
//! Decoding detects each stage from its header, so turning compression on
//! or off never strands previously written payloads. Encrypted payloads
//! need the key, though: reading one without a cipher is an error.

use crate::compression::{compress_bytes, decompress_bytes, CodecError};
use crate::encryption::{is_encrypted, Cipher};
use crate::entry::Envelope;

use super::traits::StorageError;

#[derive(Debug, Clone, Default)]
pub struct EnvelopeCodec {
    /// zstd level, `None` = no compression
    compression: Option<i32>,
    cipher: Option<Cipher>,
}

impl EnvelopeCodec {
    /// Plain JSON, no compression or encryption.
    #[must_use]
    pub fn plain() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_compression(mut self, level: i32) -> Self {
        self.compression = Some(level);
        self
    }

    #[must_use]
    pub fn with_cipher(mut self, cipher: Cipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    #[must_use]
    pub fn is_encrypting(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, StorageError> {
        let mut bytes = serde_json::to_vec(envelope)?;
        if let Some(level) = self.compression {
            bytes = compress_bytes(&bytes, level)?;
        }
        if let Some(ref cipher) = self.cipher {
            bytes = cipher.encrypt(&bytes)?;
        }
        Ok(bytes)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Envelope, StorageError> {
        let decrypted;
        let mut data = bytes;
        if is_encrypted(data) {
            let cipher = self.cipher.as_ref().ok_or(CodecError::MissingKey)?;
            decrypted = cipher.decrypt(data)?;
            data = decrypted.as_slice();
        }
        let plain = decompress_bytes(data)?;
        Ok(serde_json::from_slice(&plain)?)
    }
}
