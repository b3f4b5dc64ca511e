// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

use crate::compression::CodecError;
use crate::entry::Envelope;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

impl StorageError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Short label for metrics (`error_type`).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Backend(_) => "backend",
            Self::Io { .. } => "io",
            Self::Serialization(_) => "serialization",
            Self::Codec(_) => "codec",
        }
    }
}

/// Per-tier counters reported by stores that have tiers (hybrid).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub promotions: u64,
    pub demotions: u64,
    pub l1_entries: usize,
}

/// Physical storage for envelopes.
///
/// Missing keys are `Ok(None)` / `Ok(false)`, never an error.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Envelope>, StorageError>;
    async fn put(&self, key: &str, envelope: &Envelope) -> Result<(), StorageError>;
    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
    /// Remove everything this store owns. Returns the removed count.
    async fn clear(&self) -> Result<usize, StorageError>;
    async fn len(&self) -> Result<usize, StorageError>;

    /// Short backend name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Tier counters, for stores that have tiers.
    fn tier_stats(&self) -> Option<TierStats> {
        None
    }

    /// Keys of live entries carrying any of `tags`. Default reads every entry.
    async fn tagged_keys(&self, tags: &[String], now_ms: u64) -> Result<Vec<String>, StorageError> {
        let mut found = Vec::new();
        for key in self.keys().await? {
            if let Some(envelope) = self.get(&key).await? {
                if !envelope.is_expired_at(now_ms) && envelope.metadata.has_any_tag(tags) {
                    found.push(key);
                }
            }
        }
        Ok(found)
    }

    /// Delete entries past their expiry and return their keys. Default reads
    /// every entry; stores that expire on their own return nothing.
    async fn purge_expired(&self, now_ms: u64) -> Result<Vec<String>, StorageError> {
        let mut purged = Vec::new();
        for key in self.keys().await? {
            let expired = self.get(&key).await?.is_some_and(|e| e.is_expired_at(now_ms));
            if expired && self.delete(&key).await? {
                purged.push(key);
            }
        }
        Ok(purged)
    }

    /// Write several envelopes. Default falls back to sequential puts.
    async fn put_batch(&self, entries: &[(String, Envelope)]) -> Result<usize, StorageError> {
        for (key, envelope) in entries {
            self.put(key, envelope).await?;
        }
        Ok(entries.len())
    }
}
