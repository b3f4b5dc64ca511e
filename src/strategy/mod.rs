// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Decision logic for the cache engine.
//!
//! Nothing in here touches values. The strategy layer answers three
//! questions for the manager and the hybrid store:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Strategy Module                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ledger.rs     - per-shard recency/frequency/insertion/expiry │
//! │                  indices, one record per live key            │
//! │  eviction.rs   - EvictionPolicy: what to remove               │
//! │  ttl.rs        - TtlStrategy: how long is it valid            │
//! │  partition.rs  - Partitioner: which shard owns a key          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  mod.rs        - Strategy (capacity checks) + TierThresholds  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod eviction;
pub mod ledger;
pub mod partition;
pub mod ttl;

use std::time::Duration;

pub use eviction::{EvictionPolicy, UnknownPolicy};
pub use ledger::{AccessLedger, AccessRecord, Candidate, RECENT_WINDOW_MS};
pub use partition::{PartitionStrategy, Partitioner};
pub use ttl::{ExpirationMode, Expiry, TtlStrategy};

/// L1 is demoted in fifths (20%) under pressure.
const DEMOTE_DIVISOR: usize = 5;

/// Capacity, eviction, TTL and partition decisions for one cache instance.
#[derive(Debug, Clone)]
pub struct Strategy {
    pub policy: EvictionPolicy,
    /// Fraction of the maximum at which eviction starts
    pub threshold: f64,
    pub batch_size: usize,
    /// Remove the whole batch instead of stopping once under threshold
    pub aggressive: bool,
    /// 0 = unbounded
    pub max_items: usize,
    /// 0 = unbounded
    pub max_bytes: usize,
    pub ttl: TtlStrategy,
    pub partitioner: Partitioner,
}

impl Default for Strategy {
    fn default() -> Self {
        Self {
            policy: EvictionPolicy::Lru,
            threshold: 0.9,
            batch_size: 10,
            aggressive: false,
            max_items: 0,
            max_bytes: 0,
            ttl: TtlStrategy::default(),
            partitioner: Partitioner::single(),
        }
    }
}

impl Strategy {
    /// `current ≥ threshold × max` for either bound.
    #[must_use]
    pub fn should_evict(&self, current_items: usize, current_bytes: usize) -> bool {
        let over_items = self.max_items > 0 && current_items as f64 >= self.threshold * self.max_items as f64;
        let over_bytes = self.max_bytes > 0 && current_bytes as f64 >= self.threshold * self.max_bytes as f64;
        over_items || over_bytes
    }

    /// Hard bound: would an entry of `incoming_bytes` exceed `max_bytes`?
    #[must_use]
    pub fn exceeds_hard_limit(&self, current_bytes: usize, incoming_bytes: usize) -> bool {
        self.max_bytes > 0 && current_bytes.saturating_add(incoming_bytes) > self.max_bytes
    }

    /// Victims for one eviction batch, ordered "evict first".
    #[must_use]
    pub fn select_for_eviction(&self, ledgers: &[&AccessLedger], count: usize, now_ms: u64) -> Vec<String> {
        self.policy.select(ledgers, count, now_ms)
    }

    #[must_use]
    pub fn calculate_ttl(&self, expiry: Expiry, access_count: u64) -> Option<Duration> {
        self.ttl.calculate_ttl(expiry, access_count)
    }

    #[must_use]
    pub fn should_refresh(&self, created_at_ms: u64, ttl: Duration, now_ms: u64) -> bool {
        self.ttl.should_refresh(created_at_ms, ttl, now_ms)
    }

    #[must_use]
    pub fn partition_of(&self, key: &str) -> usize {
        self.partitioner.partition_of(key)
    }

    #[must_use]
    pub fn replicas_of(&self, key: &str) -> Vec<usize> {
        self.partitioner.replicas_of(key)
    }
}

/// Promotion/demotion thresholds for the hybrid tier.
#[derive(Debug, Clone, Copy)]
pub struct TierThresholds {
    /// Reads of an L2-resident key before it is copied into L1
    pub promote_threshold: u64,
    /// Fraction of `l1_max_entries` that triggers demotion
    pub demote_threshold: f64,
    pub l1_max_entries: usize,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            promote_threshold: 3,
            demote_threshold: 0.9,
            l1_max_entries: 10_000,
        }
    }
}

impl TierThresholds {
    #[must_use]
    pub fn should_promote(&self, access_count: u64) -> bool {
        access_count >= self.promote_threshold
    }

    /// Would L1 holding `l1_len_after` entries be above the demotion line?
    #[must_use]
    pub fn should_demote(&self, l1_len_after: usize) -> bool {
        l1_len_after as f64 > self.l1_max_entries as f64 * self.demote_threshold
    }

    /// 20% of L1, at least one entry when L1 is not empty.
    #[must_use]
    pub fn demotion_count(&self, l1_len: usize) -> usize {
        if l1_len == 0 {
            return 0;
        }
        l1_len.div_ceil(DEMOTE_DIVISOR).max(1)
    }
}
