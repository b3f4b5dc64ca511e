// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Cache Engine
//!
//! A bounded, sharded key-value cache with TTL expiry, pluggable eviction
//! and an optional persistent backing store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       CacheManager                          │
//! │  • get / set / delete / has, batch, tag and pattern ops    │
//! │  • Sharded entry table, one lock per shard                 │
//! │  • Capacity check before every insert                      │
//! │  • Lifecycle: start → maintenance loop → shutdown          │
//! └─────────────────────────────────────────────────────────────┘
//!                │ victims, TTLs, shard of a key
//!                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Strategy                            │
//! │  • Eviction: LRU, LFU, FIFO, LIFO, TTL, RANDOM, ADAPTIVE    │
//! │  • TTL: absolute or sliding, max TTL clamp                  │
//! │  • Partitioning: hash, range, consistent                    │
//! └─────────────────────────────────────────────────────────────┘
//!                │ write-through, read-through
//!                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   CacheStore (optional)                     │
//! │  • File: one file per key + manifest                       │
//! │  • Redis: pipelined, prefixed keys                         │
//! │  • Hybrid: memory L1 over file/Redis L2, promote / demote  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use cache_engine::{CacheConfig, CacheManager, EvictionPolicy, SetOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = CacheConfig::default();
//!     config.storage.max_items = 10_000;
//!     config.eviction.policy = EvictionPolicy::Lru;
//!
//!     let cache = Arc::new(CacheManager::new(config).await?);
//!     cache.start().await?;
//!
//!     cache
//!         .set("session:42", json!({"user": "ada"}), SetOptions::ttl(Duration::from_secs(300)).with_tags(["session"]))
//!         .await?;
//!
//!     if let Some(value) = cache.get("session:42").await? {
//!         println!("Found: {value}");
//!     }
//!
//!     cache.invalidate_by_tags(&["session".to_string()]).await?;
//!     cache.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`manager`]: the [`CacheManager`] and its lifecycle
//! - [`strategy`]: eviction, TTL and partitioning decisions
//! - [`storage`]: backing stores (file, Redis, hybrid) and the envelope codec
//! - [`events`]: the observer hook every component reports to
//! - [`config`]: TOML-loadable configuration
//! - [`resilience`]: retry policy for backend connections

pub mod compression;
pub mod config;
pub mod encryption;
pub mod entry;
pub mod events;
pub mod manager;
pub mod metrics;
pub mod resilience;
pub mod storage;
pub mod strategy;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::{CacheConfig, ConfigError};
pub use entry::{EntryMetadata, Envelope, Priority, ValueKind};
pub use events::{CacheEvent, CacheObserver, NoopObserver, RecordingObserver, Tier, TracingObserver};
pub use manager::persistence::SnapshotFormat;
pub use manager::{
    BatchResult, CacheError, CacheInfo, CacheLoader, CacheManager, CacheState, LoaderError, MaintenanceReport,
    SetOptions, Statistics, StatsSnapshot, TtlStatus, WarmingStrategy,
};
pub use metrics::LatencyTimer;
pub use resilience::retry::RetryConfig;
pub use storage::traits::{CacheStore, StorageError, TierStats};
pub use storage::StoreKind;
pub use strategy::{EvictionPolicy, ExpirationMode, Expiry, PartitionStrategy, Strategy};
