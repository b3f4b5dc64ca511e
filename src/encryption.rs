// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Encryption at rest for file and remote stores.
//!
//! AES-256-GCM with a fresh random 96-bit nonce per payload. The frame is
//! `MAGIC (4) | nonce (12) | ciphertext+tag`, so readers can tell encrypted
//! payloads apart from plain ones.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use crate::compression::CodecError;

/// Frame marker for encrypted payloads ("CEv1")
const ENCRYPTION_MAGIC: [u8; 4] = [0x43, 0x45, 0x76, 0x31];

const NONCE_LEN: usize = 12;

/// Key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// AES-256-GCM cipher bound to one key.
#[derive(Clone)]
pub struct Cipher {
    inner: Aes256Gcm,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cipher(AES-256-GCM)")
    }
}

impl Cipher {
    #[must_use]
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self {
            inner: Aes256Gcm::new(key),
        }
    }

    /// Build from a 64-character hex key (as found in config files).
    pub fn from_hex(hex_key: &str) -> Result<Self, CodecError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|e| CodecError::InvalidKey(e.to_string()))?;
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            CodecError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", b.len()))
        })?;
        Ok(Self::new(&key))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .inner
            .encrypt(&nonce, plaintext)
            .map_err(|e| CodecError::EncryptFailed(e.to_string()))?;

        let mut out = Vec::with_capacity(ENCRYPTION_MAGIC.len() + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&ENCRYPTION_MAGIC);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, frame: &[u8]) -> Result<Vec<u8>, CodecError> {
        if !is_encrypted(frame) {
            return Err(CodecError::DecryptFailed("missing encryption header".to_string()));
        }
        let body = &frame[ENCRYPTION_MAGIC.len()..];
        if body.len() < NONCE_LEN {
            return Err(CodecError::DecryptFailed("truncated frame".to_string()));
        }
        let (nonce, ciphertext) = body.split_at(NONCE_LEN);
        self.inner
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CodecError::DecryptFailed(e.to_string()))
    }
}

/// Check if data carries the encryption frame header.
#[inline]
#[must_use]
pub fn is_encrypted(data: &[u8]) -> bool {
    data.len() >= ENCRYPTION_MAGIC.len() && data[..ENCRYPTION_MAGIC.len()] == ENCRYPTION_MAGIC
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_roundtrip() {
        let cipher = Cipher::from_hex(HEX_KEY).unwrap();
        let frame = cipher.encrypt(b"card ending 4242").unwrap();

        assert!(is_encrypted(&frame));
        assert!(!frame.windows(4).any(|w| w == b"4242"));
        assert_eq!(cipher.decrypt(&frame).unwrap(), b"card ending 4242");
    }

    #[test]
    fn test_nonce_is_fresh_per_payload() {
        let cipher = Cipher::new(&[7u8; KEY_LEN]);
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let frame = Cipher::new(&[1u8; KEY_LEN]).encrypt(b"secret").unwrap();
        let result = Cipher::new(&[2u8; KEY_LEN]).decrypt(&frame);
        assert!(matches!(result, Err(CodecError::DecryptFailed(_))));
    }

    #[test]
    fn test_tampered_frame_fails() {
        let cipher = Cipher::new(&[3u8; KEY_LEN]);
        let mut frame = cipher.encrypt(b"secret").unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(cipher.decrypt(&frame).is_err());
    }

    #[test]
    fn test_bad_keys_rejected() {
        assert!(matches!(Cipher::from_hex("zz"), Err(CodecError::InvalidKey(_))));
        assert!(matches!(Cipher::from_hex("0011"), Err(CodecError::InvalidKey(_))));
    }

    #[test]
    fn test_truncated_frame() {
        let cipher = Cipher::new(&[3u8; KEY_LEN]);
        assert!(cipher.decrypt(&ENCRYPTION_MAGIC).is_err());
        assert!(cipher.decrypt(b"plain").is_err());
    }
}
