// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Lifecycle events.
//!
//! One [`CacheObserver`] is injected per cache instance and shared with the
//! store it composes, so hits, misses, evictions and tier movements all flow
//! through a single callback instead of per-component broadcasters.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use cache_engine::events::{CacheEvent, CacheObserver, RecordingObserver};
//!
//! let observer = Arc::new(RecordingObserver::default());
//! observer.on_event(&CacheEvent::Miss { key: "a".into() });
//! assert_eq!(observer.count(|e| matches!(e, CacheEvent::Miss { .. })), 1);
//! ```

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::strategy::EvictionPolicy;

/// Where a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Manager table
    Table,
    /// Hybrid store, memory tier
    L1,
    /// Hybrid store, persistent tier (or a plain backing store)
    L2,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::L1 => write!(f, "L1"),
            Self::L2 => write!(f, "L2"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Hit { key: String, tier: Tier },
    Miss { key: String },
    Set { key: String, size_bytes: usize },
    Deleted { key: String },
    Expired { key: String },
    Evicted { policy: EvictionPolicy, count: usize },
    Promoted { key: String },
    Demoted { count: usize },
    Cleared { count: usize },
    /// An entry reached its refresh threshold and no loader was available
    RefreshSuggested { key: String },
    /// Shard sizes drifted past the configured imbalance ratio
    PartitionImbalance { sizes: Vec<usize> },
    Error { operation: &'static str, key: Option<String>, message: String },
}

/// Receives every event of one cache instance.
pub trait CacheObserver: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

/// Default observer: forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl CacheObserver for TracingObserver {
    fn on_event(&self, event: &CacheEvent) {
        match event {
            CacheEvent::Hit { key, tier } => debug!(key = %key, tier = %tier, "cache hit"),
            CacheEvent::Miss { key } => debug!(key = %key, "cache miss"),
            CacheEvent::Set { key, size_bytes } => debug!(key = %key, size_bytes, "cache set"),
            CacheEvent::Deleted { key } => debug!(key = %key, "cache delete"),
            CacheEvent::Expired { key } => debug!(key = %key, "entry expired"),
            CacheEvent::Evicted { policy, count } => info!(policy = %policy, count, "evicted entries"),
            CacheEvent::Promoted { key } => debug!(key = %key, "promoted L2 → L1"),
            CacheEvent::Demoted { count } => info!(count, "demoted entries from L1"),
            CacheEvent::Cleared { count } => info!(count, "cache cleared"),
            CacheEvent::RefreshSuggested { key } => debug!(key = %key, "refresh suggested"),
            CacheEvent::PartitionImbalance { sizes } => warn!(?sizes, "partition imbalance detected"),
            CacheEvent::Error { operation, key, message } => {
                warn!(operation, key = ?key, error = %message, "cache operation failed");
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CacheObserver for NoopObserver {
    fn on_event(&self, _event: &CacheEvent) {}
}

/// Keeps every event in memory. Handy for tests and debugging tools.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<CacheEvent>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn count<F>(&self, pred: F) -> usize
    where
        F: Fn(&CacheEvent) -> bool,
    {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl CacheObserver for RecordingObserver {
    fn on_event(&self, event: &CacheEvent) {
        self.events.lock().push(event.clone());
    }
}
