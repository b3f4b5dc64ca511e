// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache warming.
//!
//! - `preload`: on start, load `warming.preload_keys` through the
//!   [`CacheLoader`] (or from the backing store when there is no loader).
//! - `background`: every `background_interval_ms`, entries past
//!   `refresh_threshold` of their TTL are reloaded through the loader. With
//!   no loader a [`CacheEvent::RefreshSuggested`] is emitted instead, once
//!   per write of the entry.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::entry::{now_millis, EntryMetadata};
use crate::events::CacheEvent;
use crate::strategy::Expiry;

use super::stats::StatsRecorder;
use super::types::SetOptions;
use super::CacheManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarmingStrategy {
    Preload,
    Background,
}

pub type LoaderError = Box<dyn std::error::Error + Send + Sync>;

/// Source of truth the cache can pull values from.
#[async_trait]
pub trait CacheLoader: Send + Sync {
    /// `Ok(None)` when the source has nothing under `key`.
    async fn load(&self, key: &str) -> Result<Option<Value>, LoaderError>;

    /// Write options for a preloaded value.
    fn options_for(&self, _key: &str) -> SetOptions {
        SetOptions::default()
    }
}

impl CacheManager {
    /// Load every configured preload key. Returns how many were loaded.
    pub(crate) async fn preload(&self) -> usize {
        let keys = &self.config.warming.preload_keys;
        let mut loaded = 0;
        for key in keys {
            if self.warm_key(key).await {
                loaded += 1;
            }
        }
        info!(requested = keys.len(), loaded, "Preload complete");
        loaded
    }

    async fn warm_key(&self, key: &str) -> bool {
        let Some(loader) = &self.loader else {
            return self.read_through(key, now_millis()).await.is_some();
        };
        match loader.load(key).await {
            Ok(Some(value)) => match self.set_inner(key, value, loader.options_for(key)).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(key = %key, error = %e, "Preloaded value could not be stored");
                    false
                }
            },
            Ok(None) => {
                debug!(key = %key, "Loader has no value for preload key");
                false
            }
            Err(e) => {
                self.loader_error(key, e.as_ref());
                false
            }
        }
    }

    /// Reload entries that reached their refresh threshold. Returns how many
    /// were reloaded or flagged.
    pub(crate) async fn refresh_due(&self) -> usize {
        let now = now_millis();
        let due: Vec<_> = self
            .shards
            .iter()
            .flat_map(|shard| shard.lock().entries_with_ttl(now))
            .filter(|(_, ttl_ms, meta)| {
                self.strategy
                    .should_refresh(meta.updated_at, Duration::from_millis(*ttl_ms), now)
            })
            .collect();
        if due.is_empty() {
            return 0;
        }

        let Some(loader) = &self.loader else {
            return self.suggest_refresh(&due);
        };

        let mut refreshed = 0;
        for (key, ttl_ms, meta) in due {
            match loader.load(&key).await {
                Ok(Some(value)) => {
                    let options = SetOptions {
                        expiry: Expiry::After(Duration::from_millis(ttl_ms)),
                        tags: meta.tags.into_iter().collect(),
                        priority: meta.priority,
                    };
                    match self.set_inner(&key, value, options).await {
                        Ok(()) => refreshed += 1,
                        Err(e) => warn!(key = %key, error = %e, "Refreshed value could not be stored"),
                    }
                }
                Ok(None) => debug!(key = %key, "Loader dropped key, leaving entry to expire"),
                Err(e) => self.loader_error(&key, e.as_ref()),
            }
        }
        debug!(refreshed, "Background refresh pass complete");
        refreshed
    }

    /// Emit `RefreshSuggested` once per write of each due entry. Keys that
    /// are no longer due are forgotten.
    fn suggest_refresh(&self, due: &[(String, u64, EntryMetadata)]) -> usize {
        let fresh: Vec<&String> = {
            let mut suggested = self.suggested.lock();
            suggested.retain(|key, _| due.iter().any(|(k, _, _)| k == key));
            due.iter()
                .filter(|(key, _, meta)| suggested.insert(key.clone(), meta.updated_at) != Some(meta.updated_at))
                .map(|(key, _, _)| key)
                .collect()
        };
        for key in &fresh {
            self.emit(CacheEvent::RefreshSuggested { key: (*key).clone() });
        }
        fresh.len()
    }

    fn loader_error(&self, key: &str, err: &(dyn std::error::Error + Send + Sync)) {
        StatsRecorder::bump(&self.stats.errors, 1);
        crate::metrics::record_error("loader", "load", "loader");
        warn!(key = %key, error = %err, "Loader failed");
        self.emit(CacheEvent::Error {
            operation: "load",
            key: Some(key.to_string()),
            message: err.to_string(),
        });
    }
}
