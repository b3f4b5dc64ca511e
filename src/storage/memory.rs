// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::entry::Envelope;
use super::traits::{CacheStore, StorageError};

/// Direct in-process table, no persistence.
pub struct InMemoryStore {
    data: DashMap<String, Envelope>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Get current item count
    #[must_use]
    pub fn count(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Synchronous lookup (used by the hybrid store's L1).
    #[must_use]
    pub fn get_sync(&self, key: &str) -> Option<Envelope> {
        self.data.get(key).map(|r| r.value().clone())
    }

    pub fn insert_sync(&self, key: &str, envelope: Envelope) -> Option<Envelope> {
        self.data.insert(key.to_string(), envelope)
    }

    pub fn remove_sync(&self, key: &str) -> Option<Envelope> {
        self.data.remove(key).map(|(_, v)| v)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn key_list(&self) -> Vec<String> {
        self.data.iter().map(|r| r.key().clone()).collect()
    }

    /// Clear all items, returning how many were removed.
    pub fn clear_all(&self) -> usize {
        let n = self.data.len();
        self.data.clear();
        n
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Envelope>, StorageError> {
        Ok(self.get_sync(key))
    }

    async fn put(&self, key: &str, envelope: &Envelope) -> Result<(), StorageError> {
        self.insert_sync(key, envelope.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.remove_sync(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.contains(key))
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.key_list())
    }

    async fn clear(&self) -> Result<usize, StorageError> {
        Ok(self.clear_all())
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.count())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
