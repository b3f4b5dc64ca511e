// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Counters, rolling latency and periodic snapshots.
//!
//! Counters are always kept. With `statistics.enabled = false` the latency
//! window and the snapshot history stay empty.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::StatisticsConfig;
use crate::entry::now_millis;
use crate::storage::traits::TierStats;
use crate::strategy::EvictionPolicy;

use super::types::CacheState;

/// Point-in-time counters, kept in the history ring.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    /// Epoch millis
    pub timestamp: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub items: usize,
    pub memory_bytes: usize,
    pub evictions: u64,
    pub expirations: u64,
}

/// Answer of [`super::CacheManager::statistics`].
#[derive(Debug, Clone)]
pub struct Statistics {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub errors: u64,
    /// `hits / (hits + misses)`, 0 before any read
    pub hit_rate: f64,
    /// Live entries
    pub size: usize,
    /// Estimated bytes held by the table
    pub memory_bytes: usize,
    pub peak_memory_bytes: usize,
    /// Mean over the rolling latency window
    pub avg_latency: Option<Duration>,
    /// Present when the backing store has tiers
    pub tiers: Option<TierStats>,
    pub history: Vec<StatsSnapshot>,
}

/// Answer of [`super::CacheManager::info`].
#[derive(Debug, Clone)]
pub struct CacheInfo {
    pub state: CacheState,
    /// Backend name, `None` when only the table is used
    pub store: Option<&'static str>,
    pub policy: EvictionPolicy,
    pub partitions: usize,
    pub shard_sizes: Vec<usize>,
    pub max_items: usize,
    pub max_bytes: usize,
    pub size: usize,
    pub memory_bytes: usize,
    pub uptime: Duration,
}

pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[derive(Debug)]
pub(crate) struct StatsRecorder {
    enabled: bool,
    detailed: bool,
    history_size: usize,
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub sets: AtomicU64,
    pub deletes: AtomicU64,
    pub evictions: AtomicU64,
    pub expirations: AtomicU64,
    pub errors: AtomicU64,
    peak_bytes: AtomicUsize,
    latencies: Mutex<VecDeque<Duration>>,
    history: Mutex<VecDeque<StatsSnapshot>>,
    started: Instant,
}

impl StatsRecorder {
    pub(crate) fn new(config: &StatisticsConfig) -> Self {
        Self {
            enabled: config.enabled,
            detailed: config.detailed,
            history_size: config.history_size.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            peak_bytes: AtomicUsize::new(0),
            latencies: Mutex::new(VecDeque::new()),
            history: Mutex::new(VecDeque::new()),
            started: Instant::now(),
        }
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub(crate) fn record_latency(&self, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        let mut window = self.latencies.lock();
        window.push_back(elapsed);
        while window.len() > self.history_size {
            window.pop_front();
        }
    }

    pub(crate) fn avg_latency(&self) -> Option<Duration> {
        let window = self.latencies.lock();
        if window.is_empty() {
            return None;
        }
        let total: Duration = window.iter().sum();
        Some(total / window.len() as u32)
    }

    pub(crate) fn observe_bytes(&self, bytes: usize) {
        self.peak_bytes.fetch_max(bytes, Ordering::Relaxed);
    }

    pub(crate) fn peak_bytes(&self) -> usize {
        self.peak_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn snapshot(&self, items: usize, memory_bytes: usize) -> StatsSnapshot {
        let hits = Self::load(&self.hits);
        let misses = Self::load(&self.misses);
        StatsSnapshot {
            timestamp: now_millis(),
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            items,
            memory_bytes,
            evictions: Self::load(&self.evictions),
            expirations: Self::load(&self.expirations),
        }
    }

    /// Push a snapshot into the history ring (detailed mode only).
    /// Returns whether one was kept.
    pub(crate) fn rollup(&self, items: usize, memory_bytes: usize) -> bool {
        self.observe_bytes(memory_bytes);
        if !(self.enabled && self.detailed) {
            return false;
        }
        let snapshot = self.snapshot(items, memory_bytes);
        let mut history = self.history.lock();
        history.push_back(snapshot);
        while history.len() > self.history_size {
            history.pop_front();
        }
        true
    }

    pub(crate) fn history(&self) -> Vec<StatsSnapshot> {
        self.history.lock().iter().cloned().collect()
    }
}
