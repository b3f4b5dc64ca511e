// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Two-tier store: a hot in-memory L1 in front of a persistent L2.
//!
//! ```text
//!   get ──► L1 ──hit──► return
//!            │ miss
//!            ▼
//!           L2 ──hit──► access count ≥ promote_threshold ? copy into L1
//!            │ miss
//!            ▼
//!          None
//!
//!   put ──► L2 (system of record) ──► L1 (demote 20% first if over the line)
//! ```
//!
//! Demotion only drops L1 copies; L2 already holds every entry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::memory::InMemoryStore;
use super::traits::{CacheStore, StorageError, TierStats};
use crate::entry::Envelope;
use crate::events::{CacheEvent, CacheObserver, NoopObserver, Tier};
use crate::strategy::TierThresholds;

#[derive(Debug, Default)]
struct TierCounters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    demotions: AtomicU64,
}

pub struct HybridStore {
    l1: InMemoryStore,
    l2: Arc<dyn CacheStore>,
    thresholds: TierThresholds,
    /// Reads per key since it was written or last demoted
    access: DashMap<String, u64>,
    counters: TierCounters,
    observer: Arc<dyn CacheObserver>,
}

impl HybridStore {
    #[must_use]
    pub fn new(l2: Arc<dyn CacheStore>, thresholds: TierThresholds) -> Self {
        Self {
            l1: InMemoryStore::new(),
            l2,
            thresholds,
            access: DashMap::new(),
            counters: TierCounters::default(),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Route promotion/demotion events to the cache's observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn CacheObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Which tier currently serves `key`, if any.
    pub async fn tier_of(&self, key: &str) -> Result<Option<Tier>, StorageError> {
        if self.l1.contains(key) {
            return Ok(Some(Tier::L1));
        }
        Ok(self.l2.exists(key).await?.then_some(Tier::L2))
    }

    #[must_use]
    pub fn l1_len(&self) -> usize {
        self.l1.count()
    }

    fn bump_access(&self, key: &str) -> u64 {
        let mut count = self.access.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Demote before L1 grows to `l1_len_after` entries, if that crosses the line.
    /// `incoming` is never demoted.
    fn maybe_demote(&self, l1_len_after: usize, incoming: &str) {
        if !self.thresholds.should_demote(l1_len_after) {
            return;
        }
        let n = self.thresholds.demotion_count(self.l1.count());
        if n == 0 {
            return;
        }

        let mut ranked: Vec<(u64, String)> = self
            .l1
            .key_list()
            .into_iter()
            .filter(|k| k != incoming)
            .map(|k| (self.access.get(&k).map_or(0, |c| *c), k))
            .collect();
        ranked.sort();

        let mut demoted = 0;
        for (_, key) in ranked.into_iter().take(n) {
            if self.l1.remove_sync(&key).is_some() {
                self.access.remove(&key);
                demoted += 1;
            }
        }
        if demoted > 0 {
            self.counters.demotions.fetch_add(demoted as u64, Ordering::Relaxed);
            crate::metrics::record_tier_move("demote", demoted);
            debug!(demoted, l1_len = self.l1.count(), "Demoted least-accessed L1 entries");
            self.observer.on_event(&CacheEvent::Demoted { count: demoted });
        }
    }

    fn admit_to_l1(&self, key: &str, envelope: Envelope) {
        let after = self.l1.count() + usize::from(!self.l1.contains(key));
        self.maybe_demote(after, key);
        self.l1.insert_sync(key, envelope);
    }
}

#[async_trait]
impl CacheStore for HybridStore {
    async fn get(&self, key: &str) -> Result<Option<Envelope>, StorageError> {
        if let Some(envelope) = self.l1.get_sync(key) {
            self.bump_access(key);
            self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(envelope));
        }

        let Some(envelope) = self.l2.get(key).await? else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);

        let count = self.bump_access(key);
        if self.thresholds.should_promote(count) {
            self.admit_to_l1(key, envelope.clone());
            self.counters.promotions.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_tier_move("promote", 1);
            self.observer.on_event(&CacheEvent::Promoted { key: key.to_string() });
        }
        Ok(Some(envelope))
    }

    async fn put(&self, key: &str, envelope: &Envelope) -> Result<(), StorageError> {
        self.l2.put(key, envelope).await?;
        self.access.insert(key.to_string(), 0);
        self.admit_to_l1(key, envelope.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let in_l1 = self.l1.remove_sync(key).is_some();
        self.access.remove(key);
        let in_l2 = self.l2.delete(key).await?;
        Ok(in_l1 || in_l2)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        if self.l1.contains(key) {
            return Ok(true);
        }
        self.l2.exists(key).await
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = self.l2.keys().await?;
        keys.extend(self.l1.key_list());
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn clear(&self) -> Result<usize, StorageError> {
        let l1 = self.l1.clear_all();
        self.access.clear();
        let l2 = self.l2.clear().await?;
        Ok(l1.max(l2))
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.keys().await?.len())
    }

    fn name(&self) -> &'static str {
        "hybrid"
    }

    /// L2 holds every entry, so it alone answers. Scanning through `get`
    /// would count as reads and promote.
    async fn tagged_keys(&self, tags: &[String], now_ms: u64) -> Result<Vec<String>, StorageError> {
        self.l2.tagged_keys(tags, now_ms).await
    }

    async fn purge_expired(&self, now_ms: u64) -> Result<Vec<String>, StorageError> {
        for key in self.l1.key_list() {
            if self.l1.get_sync(&key).is_some_and(|e| e.is_expired_at(now_ms)) {
                self.l1.remove_sync(&key);
                self.access.remove(&key);
            }
        }
        self.l2.purge_expired(now_ms).await
    }

    fn tier_stats(&self) -> Option<TierStats> {
        Some(TierStats {
            l1_hits: self.counters.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.counters.l2_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            promotions: self.counters.promotions.load(Ordering::Relaxed),
            demotions: self.counters.demotions.load(Ordering::Relaxed),
            l1_entries: self.l1.count(),
        })
    }
}
