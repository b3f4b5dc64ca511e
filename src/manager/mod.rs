// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache manager: the public orchestrator.
//!
//! The manager owns the canonical entry table, split into shards by the
//! partitioner. It applies expiration, drives eviction through the
//! [`Strategy`], writes through to an optional backing store, and reports
//! everything to one injected [`CacheObserver`].
//!
//! # Module Organization
//!
//! - `types`: state, options, errors
//! - `shard`: one `{table, ledger, bytes}` partition and its mutation path
//! - `eviction`: capacity check and victim removal
//! - `api`: batch, pattern, tag and TTL operations
//! - `lifecycle`: start, maintenance loop, shutdown
//! - `persistence`: table snapshots
//! - `warming`: preload and background refresh
//! - `stats`: counters and history
//!
//! # Example
//!
//! ```rust,no_run
//! use cache_engine::{CacheConfig, CacheManager, SetOptions};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = CacheManager::new(CacheConfig::default()).await?;
//!
//! cache.set("user:1", json!({"name": "Ada"}), SetOptions::ttl(Duration::from_secs(60))).await?;
//! assert!(cache.get("user:1").await?.is_some());
//!
//! cache.delete("user:1").await?;
//! # Ok(())
//! # }
//! ```

mod api;
mod eviction;
mod lifecycle;
pub mod persistence;
mod shard;
pub mod stats;
pub mod types;
pub mod warming;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::CacheConfig;
use crate::entry::{duration_millis, now_millis, EntryMetadata, Envelope};
use crate::events::{CacheEvent, CacheObserver, Tier, TracingObserver};
use crate::metrics::LatencyTimer;
use crate::storage::open_store;
use crate::storage::traits::{CacheStore, StorageError};
use crate::strategy::{Expiry, Strategy};

use shard::{Lookup, Shard, Slot, Usage};
use stats::StatsRecorder;

pub use stats::{CacheInfo, Statistics, StatsSnapshot};
pub use types::{BatchResult, CacheError, CacheState, MaintenanceReport, SetOptions, TtlStatus};
pub use warming::{CacheLoader, LoaderError, WarmingStrategy};

/// Bounded, sharded cache with an optional backing store.
///
/// `Send + Sync`; share it as `Arc<CacheManager>`. Every operation is
/// usable right after construction. [`CacheManager::start`] adds snapshot
/// restore, warming and the background maintenance task.
pub struct CacheManager {
    config: CacheConfig,
    strategy: Strategy,
    shards: Vec<Mutex<Shard>>,
    usage: Usage,
    store: Option<Arc<dyn CacheStore>>,
    observer: Arc<dyn CacheObserver>,
    loader: Option<Arc<dyn CacheLoader>>,
    stats: StatsRecorder,
    /// Logical clock: insertion sequence and recency tick
    clock: AtomicU64,
    state: watch::Sender<CacheState>,
    state_rx: watch::Receiver<CacheState>,
    in_flight: AtomicUsize,
    drained: Notify,
    /// Refresh suggestions already made: key → `updated_at` of the entry
    suggested: Mutex<HashMap<String, u64>>,
    /// Serializes maintenance passes (background loop and manual `tick`)
    maintenance: tokio::sync::Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Held for the duration of one public operation.
struct InFlight<'a> {
    manager: &'a CacheManager,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.manager.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.manager.drained.notify_waiters();
        }
    }
}

impl CacheManager {
    /// Validate `config`, open the configured backing store and build the
    /// cache with a [`TracingObserver`].
    pub async fn new(config: CacheConfig) -> Result<Self, CacheError> {
        Self::with_observer(config, Arc::new(TracingObserver)).await
    }

    /// Like [`CacheManager::new`] with a caller-provided observer. The
    /// observer is shared with the backing store.
    pub async fn with_observer(config: CacheConfig, observer: Arc<dyn CacheObserver>) -> Result<Self, CacheError> {
        config.validate()?;
        let codec = config.storage.codec()?;
        let store = open_store(&config.storage, codec, observer.clone()).await?;
        Self::with_parts(config, store, observer)
    }

    /// Assemble from an already-opened store (or none).
    pub fn with_parts(
        config: CacheConfig,
        store: Option<Arc<dyn CacheStore>>,
        observer: Arc<dyn CacheObserver>,
    ) -> Result<Self, CacheError> {
        config.validate()?;
        let strategy = config.strategy();
        let partitions = strategy.partitioner.partitions().max(1);
        let shards = (0..partitions).map(|_| Mutex::new(Shard::default())).collect();
        let stats = StatsRecorder::new(&config.statistics);
        let (state, state_rx) = watch::channel(CacheState::Created);

        info!(
            policy = %strategy.policy,
            partitions,
            max_items = strategy.max_items,
            max_bytes = strategy.max_bytes,
            store = store.as_ref().map_or("none", |s| s.name()),
            "Cache manager created"
        );

        Ok(Self {
            config,
            strategy,
            shards,
            usage: Usage::default(),
            store,
            observer,
            loader: None,
            stats,
            clock: AtomicU64::new(0),
            state,
            state_rx,
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            suggested: Mutex::new(HashMap::new()),
            maintenance: tokio::sync::Mutex::new(()),
            task: Mutex::new(None),
        })
    }

    /// Attach a loader for warming.
    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn CacheLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Get current cache state
    #[must_use]
    pub fn state(&self) -> CacheState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<CacheState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The backing store, if one is configured.
    #[must_use]
    pub fn store(&self) -> Option<&Arc<dyn CacheStore>> {
        self.store.as_ref()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Core operations
    // ═══════════════════════════════════════════════════════════════════

    /// Get a value. Expired entries are removed and reported as a miss. On a
    /// table miss the backing store is consulted and a live entry is
    /// re-admitted. Backend failures count as a miss.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let _op = self.begin_op()?;
        let timer = LatencyTimer::new("table", "get");
        let value = self.get_inner(key).await;
        self.stats.record_latency(timer.elapsed());
        Ok(value)
    }

    /// Store a value. Runs the capacity check first, writes through to the
    /// backing store, then updates the table.
    #[tracing::instrument(skip(self, value, options), fields(key = %key))]
    pub async fn set(&self, key: &str, value: Value, options: SetOptions) -> Result<(), CacheError> {
        let _op = self.begin_op()?;
        let timer = LatencyTimer::new("table", "set");
        let result = self.set_inner(key, value, options).await;
        self.stats.record_latency(timer.elapsed());
        result
    }

    /// Remove a key from the table and the backing store. Returns whether
    /// it existed in either.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let _op = self.begin_op()?;
        let timer = LatencyTimer::new("table", "delete");
        let result = self.delete_inner(key).await;
        self.stats.record_latency(timer.elapsed());
        result
    }

    /// Whether a live entry exists, without access bookkeeping.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let _op = self.begin_op()?;
        let now = now_millis();
        let expired = {
            let mut shard = self.shard(key).lock();
            if shard.peek(key, now).is_some() {
                return Ok(true);
            }
            shard.remove(key, &self.usage).is_some()
        };
        if expired {
            self.note_expired(key);
            self.forget_in_store(key).await;
            return Ok(false);
        }

        Ok(self.stored_live(key, now, "has").await.is_some())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Internals shared by the operation modules
    // ═══════════════════════════════════════════════════════════════════

    fn begin_op(&self) -> Result<InFlight<'_>, CacheError> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight { manager: self };
        let state = self.state();
        if !state.accepts_operations() {
            crate::metrics::record_operation("table", "any", "rejected");
            return Err(CacheError::NotAccepting(state));
        }
        Ok(guard)
    }

    fn set_state(&self, state: CacheState) {
        self.state.send_replace(state);
        crate::metrics::set_cache_state(&state.to_string());
    }

    #[inline]
    fn shard(&self, key: &str) -> &Mutex<Shard> {
        &self.shards[self.strategy.partition_of(key) % self.shards.len()]
    }

    #[inline]
    fn next_tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn store_name(&self) -> &'static str {
        self.store.as_ref().map_or("table", |s| s.name())
    }

    #[inline]
    fn emit(&self, event: CacheEvent) {
        self.observer.on_event(&event);
    }

    /// Backend failure on a read path: counted, reported, then treated as a miss.
    fn soft_error(&self, operation: &'static str, key: Option<&str>, err: &StorageError) {
        StatsRecorder::bump(&self.stats.errors, 1);
        crate::metrics::record_error(self.store_name(), operation, err.kind());
        warn!(operation, key = ?key, error = %err, "Backend failure treated as a miss");
        self.emit(CacheEvent::Error {
            operation,
            key: key.map(str::to_string),
            message: err.to_string(),
        });
    }

    /// Backend failure on a write path: counted, reported, then propagated.
    fn hard_error(&self, operation: &'static str, key: Option<&str>, err: StorageError) -> CacheError {
        StatsRecorder::bump(&self.stats.errors, 1);
        crate::metrics::record_error(self.store_name(), operation, err.kind());
        crate::metrics::record_operation(self.store_name(), operation, "error");
        error!(operation, key = ?key, error = %err, "Backend write failed");
        self.emit(CacheEvent::Error {
            operation,
            key: key.map(str::to_string),
            message: err.to_string(),
        });
        CacheError::Storage(err)
    }

    fn note_expired(&self, key: &str) {
        StatsRecorder::bump(&self.stats.expirations, 1);
        crate::metrics::record_expired(1);
        self.emit(CacheEvent::Expired { key: key.to_string() });
    }

    /// Best-effort removal of a stale store copy.
    async fn forget_in_store(&self, key: &str) {
        if let Some(store) = &self.store {
            if let Err(e) = store.delete(key).await {
                self.soft_error("delete", Some(key), &e);
            }
        }
    }

    /// The store's live copy of `key`, without re-admitting it. Backend
    /// failures are soft.
    async fn stored_live(&self, key: &str, now: u64, operation: &'static str) -> Option<Envelope> {
        let store = self.store.as_ref()?;
        match store.get(key).await {
            Ok(found) => found.filter(|e| !e.is_expired_at(now)),
            Err(e) => {
                self.soft_error(operation, Some(key), &e);
                None
            }
        }
    }

    async fn get_inner(&self, key: &str) -> Option<Value> {
        let now = now_millis();
        let tick = self.next_tick();
        let lookup = {
            let mut shard = self.shard(key).lock();
            let lookup = shard.lookup(key, tick, now, &self.usage);
            if let Lookup::Hit { slot, access_count } = &lookup {
                if let Some(expires_at) = self.sliding_expiry(slot, *access_count, now) {
                    shard.extend_expiry(key, expires_at);
                }
            }
            lookup
        };

        match lookup {
            Lookup::Hit { slot, .. } => {
                StatsRecorder::bump(&self.stats.hits, 1);
                crate::metrics::record_operation("table", "get", "hit");
                self.emit(CacheEvent::Hit {
                    key: key.to_string(),
                    tier: Tier::Table,
                });
                return Some(slot.value);
            }
            Lookup::Expired => {
                self.note_expired(key);
                self.forget_in_store(key).await;
            }
            Lookup::Missing => {
                if let Some(value) = self.read_through(key, now).await {
                    StatsRecorder::bump(&self.stats.hits, 1);
                    crate::metrics::record_operation(self.store_name(), "get", "hit");
                    self.emit(CacheEvent::Hit {
                        key: key.to_string(),
                        tier: Tier::L2,
                    });
                    return Some(value);
                }
            }
        }

        StatsRecorder::bump(&self.stats.misses, 1);
        crate::metrics::record_operation("table", "get", "miss");
        self.emit(CacheEvent::Miss { key: key.to_string() });
        None
    }

    /// New expiry for a sliding-mode hit, `None` when it stays put.
    fn sliding_expiry(&self, slot: &Slot, access_count: u64, now: u64) -> Option<u64> {
        if !self.strategy.ttl.is_sliding() {
            return None;
        }
        let base = Duration::from_millis(slot.meta.ttl_ms?);
        let ttl = self.strategy.calculate_ttl(Expiry::After(base), access_count)?;
        Some(now.saturating_add(duration_millis(ttl)))
    }

    /// Fetch a live entry from the backing store and re-admit it to the table.
    async fn read_through(&self, key: &str, now: u64) -> Option<Value> {
        let store = self.store.as_ref()?;
        let envelope = match store.get(key).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return None,
            Err(e) => {
                self.soft_error("get", Some(key), &e);
                return None;
            }
        };
        if envelope.is_expired_at(now) {
            self.forget_in_store(key).await;
            return None;
        }

        let value = envelope.data.clone();
        let max = self.strategy.max_bytes;
        if max == 0 || envelope.size_bytes() <= max {
            let victims = self.admit(
                key,
                Slot {
                    value: envelope.data,
                    meta: envelope.metadata,
                },
            );
            self.after_eviction(victims).await;
        }
        Some(value)
    }

    /// Build the table slot for a write, rejecting oversized values.
    fn prepare(&self, key: &str, value: Value, options: SetOptions) -> Result<Slot, CacheError> {
        let ttl = self.strategy.calculate_ttl(options.expiry, 0);
        let meta = EntryMetadata::new(key, &value, ttl)?
            .with_tags(options.tags)
            .with_priority(options.priority);

        let max = self.strategy.max_bytes;
        if max > 0 && meta.size_bytes > max {
            crate::metrics::record_operation("table", "set", "rejected");
            warn!(key = %key, size = meta.size_bytes, max, "Rejected value above max_size");
            return Err(CacheError::TooLarge {
                key: key.to_string(),
                size: meta.size_bytes,
                max,
            });
        }
        Ok(Slot { value, meta })
    }

    async fn set_inner(&self, key: &str, value: Value, options: SetOptions) -> Result<(), CacheError> {
        let slot = self.prepare(key, value, options)?;
        if let Some(store) = &self.store {
            let envelope = Envelope::new(slot.value.clone(), slot.meta.clone());
            if let Err(e) = store.put(key, &envelope).await {
                return Err(self.hard_error("set", Some(key), e));
            }
        }
        self.commit(key, slot).await;
        Ok(())
    }

    /// Admit a prepared slot to the table and account for it.
    async fn commit(&self, key: &str, slot: Slot) {
        let size_bytes = slot.meta.size_bytes;
        let victims = self.admit(key, slot);
        StatsRecorder::bump(&self.stats.sets, 1);
        self.stats.observe_bytes(self.usage.bytes());
        crate::metrics::record_operation("table", "set", "success");
        self.emit(CacheEvent::Set {
            key: key.to_string(),
            size_bytes,
        });
        self.after_eviction(victims).await;
    }

    async fn delete_inner(&self, key: &str) -> Result<bool, CacheError> {
        let in_table = self.shard(key).lock().remove(key, &self.usage).is_some();
        let in_store = match &self.store {
            Some(store) => store
                .delete(key)
                .await
                .map_err(|e| self.hard_error("delete", Some(key), e))?,
            None => false,
        };

        let found = in_table || in_store;
        if found {
            StatsRecorder::bump(&self.stats.deletes, 1);
            crate::metrics::record_operation("table", "delete", "success");
            self.emit(CacheEvent::Deleted { key: key.to_string() });
        } else {
            crate::metrics::record_operation("table", "delete", "miss");
        }
        Ok(found)
    }

    /// Live count across all shards.
    fn live_count(&self, now: u64) -> usize {
        self.shards.iter().map(|s| s.lock().live_count(now)).sum()
    }

    fn shard_sizes(&self) -> Vec<usize> {
        self.shards.iter().map(|s| s.lock().len()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingObserver;
    use crate::storage::memory::InMemoryStore;
    use crate::strategy::EvictionPolicy;
    use async_trait::async_trait;
    use serde_json::json;

    pub(crate) fn config(max_items: usize, policy: EvictionPolicy) -> CacheConfig {
        let mut config = CacheConfig::default();
        config.storage.max_items = max_items;
        config.eviction.policy = policy;
        config
    }

    pub(crate) fn manager(config: CacheConfig) -> (CacheManager, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        let manager = CacheManager::with_parts(config, None, observer.clone()).unwrap();
        (manager, observer)
    }

    pub(crate) fn manager_with_store(
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
    ) -> (CacheManager, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        let manager = CacheManager::with_parts(config, Some(store), observer.clone()).unwrap();
        (manager, observer)
    }

    pub(crate) fn assert_consistent(manager: &CacheManager) {
        let mut items = 0;
        let mut bytes = 0;
        for shard in &manager.shards {
            let shard = shard.lock();
            assert!(shard.is_consistent());
            items += shard.len();
            bytes += shard.bytes();
        }
        assert_eq!(manager.usage.items(), items);
        assert_eq!(manager.usage.bytes(), bytes);
    }

    /// Fails every call; stands in for an unreachable backend.
    pub(crate) struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<Envelope>, StorageError> {
            Err(StorageError::Backend("connection refused".into()))
        }
        async fn put(&self, _key: &str, _envelope: &Envelope) -> Result<(), StorageError> {
            Err(StorageError::Backend("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<bool, StorageError> {
            Err(StorageError::Backend("connection refused".into()))
        }
        async fn exists(&self, _key: &str) -> Result<bool, StorageError> {
            Err(StorageError::Backend("connection refused".into()))
        }
        async fn keys(&self) -> Result<Vec<String>, StorageError> {
            Err(StorageError::Backend("connection refused".into()))
        }
        async fn clear(&self) -> Result<usize, StorageError> {
            Err(StorageError::Backend("connection refused".into()))
        }
        async fn len(&self) -> Result<usize, StorageError> {
            Err(StorageError::Backend("connection refused".into()))
        }
        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let (cache, observer) = manager(CacheConfig::default());
        cache.set("a", json!({"n": 1}), SetOptions::default()).await.unwrap();

        assert_eq!(cache.get("a").await.unwrap(), Some(json!({"n": 1})));
        assert_eq!(cache.get("missing").await.unwrap(), None);
        assert_eq!(observer.count(|e| matches!(e, CacheEvent::Hit { tier: Tier::Table, .. })), 1);
        assert_eq!(observer.count(|e| matches!(e, CacheEvent::Miss { .. })), 1);
        assert_consistent(&cache);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_and_removed() {
        let (cache, observer) = manager(CacheConfig::default());
        cache.set("t", json!(1), SetOptions::ttl(Duration::from_millis(20))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.get("t").await.unwrap(), None);
        assert_eq!(cache.usage.items(), 0);
        assert_eq!(StatsRecorder::load(&cache.stats.expirations), 1);
        assert_eq!(StatsRecorder::load(&cache.stats.misses), 1);
        assert_eq!(observer.count(|e| matches!(e, CacheEvent::Expired { .. })), 1);
        assert_consistent(&cache);
    }

    #[tokio::test]
    async fn test_delete_and_has() {
        let (cache, _) = manager(CacheConfig::default());
        cache.set("k", json!("v"), SetOptions::default()).await.unwrap();

        assert!(cache.has("k").await.unwrap());
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert!(!cache.has("k").await.unwrap());
        assert_consistent(&cache);
    }

    #[tokio::test]
    async fn test_oversized_value_rejected() {
        let mut config = CacheConfig::default();
        config.storage.max_size = 128;
        let (cache, _) = manager(config);

        let err = cache
            .set("big", json!("x".repeat(500)), SetOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::TooLarge { max: 128, .. }));
        assert_eq!(cache.usage.items(), 0);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_size() {
        let (cache, _) = manager(CacheConfig::default());
        cache.set("k", json!("x".repeat(1000)), SetOptions::default()).await.unwrap();
        let big = cache.usage.bytes();
        cache.set("k", json!("x"), SetOptions::default()).await.unwrap();

        assert!(cache.usage.bytes() < big);
        assert_eq!(cache.usage.items(), 1);
        assert_consistent(&cache);
    }

    #[tokio::test]
    async fn test_read_through_readmits_store_entry() {
        let store = Arc::new(InMemoryStore::new());
        let (cache, observer) = manager_with_store(CacheConfig::default(), store.clone());

        let value = json!("cold");
        let meta = EntryMetadata::new("k", &value, None).unwrap();
        store.put("k", &Envelope::new(value.clone(), meta)).await.unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some(value));
        assert_eq!(observer.count(|e| matches!(e, CacheEvent::Hit { tier: Tier::L2, .. })), 1);
        // Second read is served by the table
        cache.get("k").await.unwrap();
        assert_eq!(observer.count(|e| matches!(e, CacheEvent::Hit { tier: Tier::Table, .. })), 1);
        assert_consistent(&cache);
    }

    #[tokio::test]
    async fn test_write_through_to_store() {
        let store = Arc::new(InMemoryStore::new());
        let (cache, _) = manager_with_store(CacheConfig::default(), store.clone());

        cache.set("k", json!(1), SetOptions::default()).await.unwrap();
        assert!(store.contains("k"));
        cache.delete("k").await.unwrap();
        assert!(!store.contains("k"));
    }

    #[tokio::test]
    async fn test_backend_errors_soft_on_read_hard_on_write() {
        let (cache, observer) = manager_with_store(CacheConfig::default(), Arc::new(BrokenStore));

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.has("k").await.unwrap());
        assert_eq!(StatsRecorder::load(&cache.stats.errors), 2);

        let err = cache.set("k", json!(1), SetOptions::default()).await.unwrap_err();
        assert!(matches!(err, CacheError::Storage(StorageError::Backend(_))));
        let err = cache.delete("k").await.unwrap_err();
        assert!(matches!(err, CacheError::Storage(_)));

        assert_eq!(StatsRecorder::load(&cache.stats.errors), 4);
        assert_eq!(observer.count(|e| matches!(e, CacheEvent::Error { .. })), 4);
        // A failed write never reaches the table
        assert_eq!(cache.usage.items(), 0);
    }

    #[tokio::test]
    async fn test_sliding_expiry_extends_on_read() {
        let mut config = CacheConfig::default();
        config.expiration.mode = crate::strategy::ExpirationMode::Sliding;
        let (cache, _) = manager(config);

        cache.set("s", json!(1), SetOptions::ttl(Duration::from_millis(1000))).await.unwrap();
        let before = cache.shard("s").lock().peek("s", now_millis()).unwrap().meta.expires_at.unwrap();
        for _ in 0..5 {
            cache.get("s").await.unwrap();
        }
        let after = cache.shard("s").lock().peek("s", now_millis()).unwrap().meta.expires_at.unwrap();
        // Five reads grow the TTL by 50%
        assert!(after >= before + 400);
        assert_consistent(&cache);
    }

    #[tokio::test]
    async fn test_partitioned_cache_spreads_keys() {
        let mut config = CacheConfig::default();
        config.partitioning.enabled = true;
        config.partitioning.partitions = 4;
        let (cache, _) = manager(config);

        for i in 0..100 {
            cache.set(&format!("k{i}"), json!(i), SetOptions::default()).await.unwrap();
        }
        let sizes = cache.shard_sizes();
        assert_eq!(sizes.len(), 4);
        assert_eq!(sizes.iter().sum::<usize>(), 100);
        assert!(sizes.iter().all(|&n| n > 0));
        assert_consistent(&cache);
    }
}
