// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transparent compression for persisted entries.
//!
//! Uses zstd with magic-bytes detection, so a reader decompresses only what
//! was actually compressed and plain payloads written before compression was
//! switched on still load.
//!
//! # Feature Flag
//!
//! The zstd stage requires the `compression` feature (on by default). With
//! the feature off, [`compress_bytes`] fails and [`decompress_bytes`] passes
//! plain data through but rejects zstd frames.
//!
//! # Example
//!
//! ```
//! # #[cfg(feature = "compression")]
//! # {
//! use cache_engine::compression::{compress_bytes, decompress_bytes, is_compressed};
//!
//! let data = br#"{"operations": [1, 2, 3, 4, 5, 1, 2, 3, 4, 5]}"#.repeat(20);
//! let compressed = compress_bytes(&data, 3).unwrap();
//! assert!(is_compressed(&compressed));
//! assert_eq!(decompress_bytes(&compressed).unwrap(), data);
//! # }
//! ```

/// Leading bytes of every zstd frame
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Level used for snapshots and when `storage.compression_level` is unset
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Codec error types (compression and encryption stages).
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    CompressFailed(String),

    #[error("decompression failed: {0}")]
    DecompressFailed(String),

    #[error("encryption failed: {0}")]
    EncryptFailed(String),

    #[error("decryption failed: {0}")]
    DecryptFailed(String),

    /// Data is encrypted but no key is configured
    #[error("payload is encrypted but no encryption key is configured")]
    MissingKey,

    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
}

/// True when `data` starts with a zstd frame header.
#[inline]
#[must_use]
pub fn is_compressed(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == ZSTD_MAGIC
}

/// Compress bytes with the given level (1-22).
#[cfg(feature = "compression")]
pub fn compress_bytes(data: &[u8], level: i32) -> Result<Vec<u8>, CodecError> {
    zstd::encode_all(data, level).map_err(|e| CodecError::CompressFailed(e.to_string()))
}

#[cfg(not(feature = "compression"))]
pub fn compress_bytes(_data: &[u8], _level: i32) -> Result<Vec<u8>, CodecError> {
    Err(CodecError::CompressFailed(
        "built without the `compression` feature".to_string(),
    ))
}

/// Inflate a zstd frame; anything else is returned unchanged.
#[cfg(feature = "compression")]
pub fn decompress_bytes(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    if is_compressed(data) {
        zstd::decode_all(data).map_err(|e| CodecError::DecompressFailed(e.to_string()))
    } else {
        Ok(data.to_vec())
    }
}

#[cfg(not(feature = "compression"))]
pub fn decompress_bytes(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    if is_compressed(data) {
        Err(CodecError::DecompressFailed(
            "zstd payload but built without the `compression` feature".to_string(),
        ))
    } else {
        Ok(data.to_vec())
    }
}
