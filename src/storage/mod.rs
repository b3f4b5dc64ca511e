// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Physical storage behind the manager's table.
//!
//! | kind     | backing                          | notes                          |
//! |----------|----------------------------------|--------------------------------|
//! | `memory` | none (the manager table only)    | [`memory::InMemoryStore`] is the hybrid L1 |
//! | `file`   | [`file::FileStore`]              | one file per key + manifest    |
//! | `remote` | [`redis::RedisStore`]            | prefixed keys, `PX` expiry     |
//! | `hybrid` | [`hybrid::HybridStore`]          | memory L1 over file/remote L2  |
//!
//! A hybrid store uses Redis as L2 when `redis_url` is set, otherwise the
//! file store at `path`.

pub mod codec;
pub mod file;
pub mod hybrid;
pub mod memory;
pub mod redis;
pub mod traits;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::StorageConfig;
use crate::events::CacheObserver;
use codec::EnvelopeCodec;
use file::FileStore;
use hybrid::HybridStore;
use self::redis::RedisStore;
use traits::{CacheStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
    Remote,
    Hybrid,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::File => write!(f, "file"),
            Self::Remote => write!(f, "remote"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Open the backing store described by `config`, or `None` for `memory`.
///
/// Assumes `config` passed validation; a missing path or URL still comes
/// back as [`StorageError::Backend`] rather than a panic.
pub async fn open_store(
    config: &StorageConfig,
    codec: EnvelopeCodec,
    observer: Arc<dyn CacheObserver>,
) -> Result<Option<Arc<dyn CacheStore>>, StorageError> {
    let store: Arc<dyn CacheStore> = match config.kind {
        StoreKind::Memory => return Ok(None),
        StoreKind::File => Arc::new(open_file(config, codec).await?),
        StoreKind::Remote => Arc::new(open_remote(config, codec).await?),
        StoreKind::Hybrid => {
            let l2: Arc<dyn CacheStore> = if config.redis_url.is_some() {
                Arc::new(open_remote(config, codec).await?)
            } else {
                Arc::new(open_file(config, codec).await?)
            };
            info!(l2 = l2.name(), l1_max_entries = config.l1_max_entries, "Hybrid store ready");
            Arc::new(HybridStore::new(l2, config.tier_thresholds()).with_observer(observer))
        }
    };
    info!(kind = %config.kind, backend = store.name(), "Backing store opened");
    Ok(Some(store))
}

async fn open_file(config: &StorageConfig, codec: EnvelopeCodec) -> Result<FileStore, StorageError> {
    let path = config
        .path
        .as_ref()
        .ok_or_else(|| StorageError::Backend("file store requires storage.path".to_string()))?;
    FileStore::open(path, codec, config.manifest_sync).await
}

async fn open_remote(config: &StorageConfig, codec: EnvelopeCodec) -> Result<RedisStore, StorageError> {
    let url = config
        .redis_url
        .as_deref()
        .ok_or_else(|| StorageError::Backend("remote store requires storage.redis_url".to_string()))?;
    RedisStore::with_prefix(url, Some(&config.key_prefix), codec).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopObserver;

    #[tokio::test]
    async fn test_memory_kind_has_no_backing_store() {
        let config = StorageConfig::default();
        let store = open_store(&config, EnvelopeCodec::plain(), Arc::new(NoopObserver)).await.unwrap();
        assert!(store.is_none());
    }

    #[tokio::test]
    async fn test_hybrid_defaults_to_file_l2() {
        let tmp = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            kind: StoreKind::Hybrid,
            path: Some(tmp.path().to_path_buf()),
            ..StorageConfig::default()
        };
        let store = open_store(&config, EnvelopeCodec::plain(), Arc::new(NoopObserver))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.name(), "hybrid");
        assert!(store.tier_stats().is_some());
    }

    #[tokio::test]
    async fn test_file_kind_without_path_is_error() {
        let config = StorageConfig { kind: StoreKind::File, ..StorageConfig::default() };
        let result = open_store(&config, EnvelopeCodec::plain(), Arc::new(NoopObserver)).await;
        assert!(matches!(result, Err(StorageError::Backend(_))));
    }

    #[test]
    fn test_kind_parses_lowercase() {
        let kind: StoreKind = serde_json::from_str("\"hybrid\"").unwrap();
        assert_eq!(kind, StoreKind::Hybrid);
        assert_eq!(kind.to_string(), "hybrid");
    }
}
