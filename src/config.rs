// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the cache engine.
//!
//! # Example
//!
//! ```
//! use cache_engine::{CacheConfig, EvictionPolicy};
//!
//! // Minimal config (uses defaults)
//! let config = CacheConfig::default();
//! assert_eq!(config.eviction.policy, EvictionPolicy::Lru);
//!
//! // From TOML, unspecified fields keep their defaults
//! let config = CacheConfig::from_toml_str(r#"
//!     [storage]
//!     max_items = 3
//!
//!     [eviction]
//!     policy = "fifo"
//! "#).unwrap();
//! assert_eq!(config.storage.max_items, 3);
//! assert_eq!(config.eviction.policy, EvictionPolicy::Fifo);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compression::DEFAULT_COMPRESSION_LEVEL;
use crate::encryption::Cipher;
use crate::manager::persistence::SnapshotFormat;
use crate::manager::warming::WarmingStrategy;
use crate::storage::codec::EnvelopeCodec;
use crate::storage::file::ManifestSync;
use crate::storage::StoreKind;
use crate::strategy::{
    EvictionPolicy, ExpirationMode, PartitionStrategy, Partitioner, Strategy, TierThresholds, TtlStrategy,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// `0` disables the bound.
fn millis_opt(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Top-level configuration, one section per concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub expiration: ExpirationConfig,
    #[serde(default)]
    pub eviction: EvictionConfig,
    #[serde(default)]
    pub partitioning: PartitioningConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    #[serde(default)]
    pub warming: WarmingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StoreKind,

    /// Byte ceiling for the table (0 = unbounded, default: 256 MB)
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    /// Item ceiling for the table (0 = unbounded)
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Hybrid L1 capacity and tier thresholds
    #[serde(default = "default_l1_max_entries")]
    pub l1_max_entries: usize,
    #[serde(default = "default_promote_threshold")]
    pub promote_threshold: u64,
    #[serde(default = "default_demote_threshold")]
    pub demote_threshold: f64,

    /// Data directory for the file backend (and hybrid without Redis)
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub manifest_sync: ManifestSync,

    /// Redis connection string (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// zstd for file/remote payloads
    #[serde(default)]
    pub compression: bool,
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
    /// 64 hex chars (AES-256). Unset = no encryption at rest.
    #[serde(default)]
    pub encryption_key: Option<String>,
}

fn default_max_size() -> u64 { 256 * 1024 * 1024 } // 256 MB
fn default_max_items() -> usize { 10_000 }
fn default_l1_max_entries() -> usize { 10_000 }
fn default_promote_threshold() -> u64 { 3 }
fn default_demote_threshold() -> f64 { 0.9 }
fn default_key_prefix() -> String { "cache:".to_string() }
fn default_compression_level() -> i32 { DEFAULT_COMPRESSION_LEVEL }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            max_size: default_max_size(),
            max_items: default_max_items(),
            l1_max_entries: default_l1_max_entries(),
            promote_threshold: default_promote_threshold(),
            demote_threshold: default_demote_threshold(),
            path: None,
            manifest_sync: ManifestSync::Sync,
            redis_url: None,
            key_prefix: default_key_prefix(),
            compression: false,
            compression_level: default_compression_level(),
            encryption_key: None,
        }
    }
}

impl StorageConfig {
    /// Serialization pipeline for the file and remote backends.
    pub fn codec(&self) -> Result<EnvelopeCodec, ConfigError> {
        let mut codec = EnvelopeCodec::plain();
        if self.compression {
            codec = codec.with_compression(self.compression_level);
        }
        if let Some(ref key) = self.encryption_key {
            let cipher = Cipher::from_hex(key).map_err(|e| invalid("storage.encryption_key", e.to_string()))?;
            codec = codec.with_cipher(cipher);
        }
        Ok(codec)
    }

    #[must_use]
    pub fn tier_thresholds(&self) -> TierThresholds {
        TierThresholds {
            promote_threshold: self.promote_threshold,
            demote_threshold: self.demote_threshold,
            l1_max_entries: self.l1_max_entries,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpirationConfig {
    /// TTL for writes that don't name one (0 = never expire)
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    /// Upper bound on any finite TTL (0 = unbounded)
    #[serde(default = "default_max_ttl_ms")]
    pub max_ttl_ms: u64,
    /// Expiration sweep interval
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default)]
    pub mode: ExpirationMode,
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold: f64,
}

fn default_ttl_ms() -> u64 { 60 * 60 * 1000 } // 1 hour
fn default_max_ttl_ms() -> u64 { 24 * 60 * 60 * 1000 } // 24 hours
fn default_check_interval_ms() -> u64 { 60_000 }
fn default_refresh_threshold() -> f64 { 0.8 }

impl Default for ExpirationConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_ttl_ms(),
            max_ttl_ms: default_max_ttl_ms(),
            check_interval_ms: default_check_interval_ms(),
            mode: ExpirationMode::Absolute,
            refresh_threshold: default_refresh_threshold(),
        }
    }
}

impl ExpirationConfig {
    #[must_use]
    pub fn ttl_strategy(&self) -> TtlStrategy {
        TtlStrategy {
            default_ttl: millis_opt(self.default_ttl_ms),
            max_ttl: millis_opt(self.max_ttl_ms),
            mode: self.mode,
            refresh_threshold: self.refresh_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    #[serde(default)]
    pub policy: EvictionPolicy,
    /// Fraction of max_items / max_size at which eviction starts
    #[serde(default = "default_eviction_threshold")]
    pub threshold: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub aggressive: bool,
    /// Also delete victims from the backing store
    #[serde(default)]
    pub evict_from_store: bool,
}

fn default_eviction_threshold() -> f64 { 0.9 }
fn default_batch_size() -> usize { 10 }

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            policy: EvictionPolicy::Lru,
            threshold: default_eviction_threshold(),
            batch_size: default_batch_size(),
            aggressive: false,
            evict_from_store: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitioningConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub strategy: PartitionStrategy,
    #[serde(default = "default_partitions")]
    pub partitions: usize,
    #[serde(default = "default_replication")]
    pub replication: usize,
    /// largest / smallest shard size that counts as imbalanced
    #[serde(default = "default_imbalance_ratio")]
    pub imbalance_ratio: f64,
}

fn default_partitions() -> usize { 4 }
fn default_replication() -> usize { 1 }
fn default_imbalance_ratio() -> f64 { 2.0 }

impl Default for PartitioningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: PartitionStrategy::Hash,
            partitions: default_partitions(),
            replication: default_replication(),
            imbalance_ratio: default_imbalance_ratio(),
        }
    }
}

impl PartitioningConfig {
    #[must_use]
    pub fn partitioner(&self) -> Partitioner {
        if self.enabled {
            Partitioner::new(self.strategy, self.partitions, self.replication)
        } else {
            Partitioner::single()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Snapshot file path
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub format: SnapshotFormat,
    #[serde(default = "default_persist_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub compression: bool,
}

fn default_persist_interval_ms() -> u64 { 5 * 60 * 1000 }

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            format: SnapshotFormat::Json,
            interval_ms: default_persist_interval_ms(),
            compression: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Keep periodic snapshots in addition to live counters
    #[serde(default)]
    pub detailed: bool,
    /// Latency samples and snapshots kept
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    #[serde(default = "default_rollup_interval_ms")]
    pub rollup_interval_ms: u64,
}

fn default_true() -> bool { true }
fn default_history_size() -> usize { 100 }
fn default_rollup_interval_ms() -> u64 { 60_000 }

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detailed: false,
            history_size: default_history_size(),
            rollup_interval_ms: default_rollup_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub strategies: Vec<WarmingStrategy>,
    /// Keys loaded on start by the `preload` strategy
    #[serde(default)]
    pub preload_keys: Vec<String>,
    #[serde(default = "default_background_interval_ms")]
    pub background_interval_ms: u64,
}

fn default_background_interval_ms() -> u64 { 5 * 60 * 1000 }

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategies: Vec::new(),
            preload_keys: Vec::new(),
            background_interval_ms: default_background_interval_ms(),
        }
    }
}

impl WarmingConfig {
    #[must_use]
    pub fn uses(&self, strategy: WarmingStrategy) -> bool {
        self.enabled && self.strategies.contains(&strategy)
    }
}

impl CacheConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check cross-field constraints. Called by `CacheManager::new`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.storage;
        match s.kind {
            StoreKind::Memory => {}
            StoreKind::File if s.path.is_none() => {
                return Err(invalid("storage.path", "required for the file backend"));
            }
            StoreKind::Remote if s.redis_url.is_none() => {
                return Err(invalid("storage.redis_url", "required for the remote backend"));
            }
            StoreKind::Hybrid if s.path.is_none() && s.redis_url.is_none() => {
                return Err(invalid("storage.path", "hybrid needs a path or a redis_url for L2"));
            }
            _ => {}
        }
        if s.kind == StoreKind::Hybrid {
            if s.l1_max_entries == 0 {
                return Err(invalid("storage.l1_max_entries", "must be at least 1"));
            }
            if s.promote_threshold == 0 {
                return Err(invalid("storage.promote_threshold", "must be at least 1"));
            }
        }
        if !(s.demote_threshold > 0.0 && s.demote_threshold <= 1.0) {
            return Err(invalid("storage.demote_threshold", "must be in (0, 1]"));
        }
        if s.compression && !cfg!(feature = "compression") {
            return Err(invalid("storage.compression", "built without the `compression` feature"));
        }
        s.codec()?;

        let e = &self.eviction;
        if !(e.threshold > 0.0 && e.threshold <= 1.0) {
            return Err(invalid("eviction.threshold", "must be in (0, 1]"));
        }
        if e.batch_size == 0 {
            return Err(invalid("eviction.batch_size", "must be at least 1"));
        }

        let x = &self.expiration;
        if x.check_interval_ms == 0 {
            return Err(invalid("expiration.check_interval_ms", "must be positive"));
        }
        if !(x.refresh_threshold > 0.0 && x.refresh_threshold <= 1.0) {
            return Err(invalid("expiration.refresh_threshold", "must be in (0, 1]"));
        }

        let p = &self.partitioning;
        if p.enabled {
            if p.partitions == 0 {
                return Err(invalid("partitioning.partitions", "must be at least 1"));
            }
            if p.replication == 0 || p.replication > p.partitions {
                return Err(invalid("partitioning.replication", "must be in [1, partitions]"));
            }
            if p.imbalance_ratio < 1.0 {
                return Err(invalid("partitioning.imbalance_ratio", "must be at least 1.0"));
            }
        }

        let persist = &self.persistence;
        if persist.enabled {
            if persist.path.is_none() {
                return Err(invalid("persistence.path", "required when persistence is enabled"));
            }
            if persist.interval_ms == 0 {
                return Err(invalid("persistence.interval_ms", "must be positive"));
            }
            if persist.compression && !cfg!(feature = "compression") {
                return Err(invalid("persistence.compression", "built without the `compression` feature"));
            }
        }

        let stats = &self.statistics;
        if stats.enabled && (stats.history_size == 0 || stats.rollup_interval_ms == 0) {
            return Err(invalid("statistics", "history_size and rollup_interval_ms must be positive"));
        }

        if self.warming.uses(WarmingStrategy::Background) && self.warming.background_interval_ms == 0 {
            return Err(invalid("warming.background_interval_ms", "must be positive"));
        }
        Ok(())
    }

    /// Strategy layer settings derived from the eviction, expiration,
    /// partitioning and storage sections.
    #[must_use]
    pub fn strategy(&self) -> Strategy {
        Strategy {
            policy: self.eviction.policy,
            threshold: self.eviction.threshold,
            batch_size: self.eviction.batch_size,
            aggressive: self.eviction.aggressive,
            max_items: self.storage.max_items,
            max_bytes: usize::try_from(self.storage.max_size).unwrap_or(usize::MAX),
            ttl: self.expiration.ttl_strategy(),
            partitioner: self.partitioning.partitioner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = CacheConfig::default();
        config.validate().unwrap();
        assert_eq!(config.storage.kind, StoreKind::Memory);
        assert_eq!(config.storage.max_items, 10_000);
        assert_eq!(config.eviction.batch_size, 10);
        assert!(config.statistics.enabled);
        assert!(!config.persistence.enabled);
    }

    #[test]
    fn test_full_toml() {
        let config = CacheConfig::from_toml_str(
            r#"
            [storage]
            kind = "hybrid"
            path = "/var/cache/app"
            manifest_sync = "background"
            l1_max_entries = 500
            promote_threshold = 2

            [expiration]
            default_ttl_ms = 0
            mode = "sliding"

            [eviction]
            policy = "adaptive"
            aggressive = true

            [partitioning]
            enabled = true
            strategy = "consistent"
            partitions = 8
            replication = 2

            [persistence]
            enabled = true
            path = "/var/cache/app/snapshot.ndjson"
            format = "ndjson"

            [warming]
            enabled = true
            strategies = ["preload", "background"]
            preload_keys = ["config:site"]
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(config.storage.kind, StoreKind::Hybrid);
        assert_eq!(config.storage.manifest_sync, ManifestSync::Background);
        assert_eq!(config.storage.tier_thresholds().promote_threshold, 2);
        assert_eq!(config.expiration.ttl_strategy().default_ttl, None);
        assert!(config.expiration.ttl_strategy().is_sliding());
        assert_eq!(config.persistence.format, SnapshotFormat::Ndjson);
        assert!(config.warming.uses(WarmingStrategy::Preload));

        let strategy = config.strategy();
        assert_eq!(strategy.policy, EvictionPolicy::Adaptive);
        assert!(strategy.aggressive);
        assert_eq!(strategy.partitioner.partitions(), 8);
        // Replicas exclude the primary
        let replicas = strategy.replicas_of("k");
        assert_eq!(replicas.len(), 1);
        assert!(!replicas.contains(&strategy.partition_of("k")));
    }

    #[test]
    fn test_unknown_policy_is_parse_error() {
        let result = CacheConfig::from_toml_str("[eviction]\npolicy = \"mru\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_file_backend_needs_path() {
        let mut config = CacheConfig::default();
        config.storage.kind = StoreKind::File;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "storage.path", .. })
        ));
    }

    #[test]
    fn test_remote_backend_needs_url() {
        let mut config = CacheConfig::default();
        config.storage.kind = StoreKind::Remote;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "storage.redis_url", .. })
        ));
    }

    #[test]
    fn test_threshold_bounds() {
        let mut config = CacheConfig::default();
        config.eviction.threshold = 0.0;
        assert!(config.validate().is_err());
        config.eviction.threshold = 1.5;
        assert!(config.validate().is_err());
        config.eviction.threshold = 1.0;
        config.validate().unwrap();
    }

    #[test]
    fn test_bad_encryption_key() {
        let mut config = CacheConfig::default();
        config.storage.encryption_key = Some("abcd".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "storage.encryption_key", .. })
        ));
        config.storage.encryption_key = Some("11".repeat(32));
        config.validate().unwrap();
        assert!(config.storage.codec().unwrap().is_encrypting());
    }

    #[test]
    fn test_replication_bounded_by_partitions() {
        let mut config = CacheConfig::default();
        config.partitioning.enabled = true;
        config.partitioning.partitions = 2;
        config.partitioning.replication = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_persistence_needs_path() {
        let mut config = CacheConfig::default();
        config.persistence.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_partitioning_is_single_shard() {
        let config = CacheConfig::default();
        assert_eq!(config.strategy().partitioner.partitions(), 1);
    }

    #[test]
    fn test_from_missing_file() {
        let result = CacheConfig::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
