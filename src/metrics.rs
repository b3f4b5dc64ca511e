// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics emitted by the cache.
//!
//! Everything goes through the `metrics` facade; the embedding application
//! installs whichever recorder it wants. Names carry a `cache_engine_`
//! prefix, counters end in `_total` and durations in `_seconds`.
//!
//! | label       | values                                     |
//! |-------------|--------------------------------------------|
//! | `tier`      | table, memory, file, redis, hybrid, loader |
//! | `operation` | get, set, delete, has, mget, mset, ...     |
//! | `status`    | hit, miss, success, error, rejected        |

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// One public operation and how it ended.
pub fn record_operation(tier: &str, operation: &str, status: &str) {
    counter!(
        "cache_engine_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "cache_engine_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Keys touched by one `mget` / `mset` / `mdel`.
pub fn record_batch_size(operation: &str, count: usize) {
    histogram!("cache_engine_batch_size", "operation" => operation.to_string()).record(count as f64);
}

// Table occupancy

pub fn set_cache_bytes(bytes: u64) {
    gauge!("cache_engine_cache_bytes").set(bytes as f64);
}

pub fn set_cache_items(count: usize) {
    gauge!("cache_engine_cache_items").set(count as f64);
}

/// Fraction of `max_size` in use, 0 when there is no byte bound.
pub fn set_memory_pressure(pressure: f64) {
    gauge!("cache_engine_memory_pressure").set(pressure);
}

pub fn record_eviction(policy: &str, count: usize, bytes: u64) {
    counter!("cache_engine_evictions_total", "policy" => policy.to_string()).increment(count as u64);
    counter!("cache_engine_evicted_bytes_total").increment(bytes);
}

pub fn record_expired(count: usize) {
    counter!("cache_engine_expired_total").increment(count as u64);
}

/// Hybrid store promotions (`promote`) and demotions (`demote`).
pub fn record_tier_move(direction: &str, count: usize) {
    counter!("cache_engine_tier_moves_total", "direction" => direction.to_string()).increment(count as u64);
}

// Backends

pub fn record_error(tier: &str, operation: &str, error_type: &str) {
    counter!(
        "cache_engine_errors_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

pub fn record_connection_error(backend: &str) {
    counter!("cache_engine_connection_errors_total", "backend" => backend.to_string()).increment(1);
}

pub fn set_backend_healthy(backend: &str, healthy: bool) {
    gauge!("cache_engine_backend_healthy", "backend" => backend.to_string()).set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_bytes_written(tier: &str, bytes: usize) {
    counter!("cache_engine_bytes_written_total", "tier" => tier.to_string()).increment(bytes as u64);
}

pub fn record_bytes_read(tier: &str, bytes: usize) {
    counter!("cache_engine_bytes_read_total", "tier" => tier.to_string()).increment(bytes as u64);
}

// Lifecycle

pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!("cache_engine_startup_seconds", "phase" => phase.to_string()).record(duration.as_secs_f64());
}

pub fn record_maintenance(duration: Duration) {
    histogram!("cache_engine_maintenance_seconds").record(duration.as_secs_f64());
}

/// Snapshot save or restore; entry count only on success.
pub fn record_snapshot(operation: &str, entries: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "cache_engine_snapshots_total",
        "operation" => operation.to_string(),
        "status" => status
    )
    .increment(1);
    if success {
        histogram!("cache_engine_snapshot_entries", "operation" => operation.to_string()).record(entries as f64);
    }
}

pub fn set_cache_state(state: &str) {
    counter!("cache_engine_state_transitions_total", "state" => state.to_string()).increment(1);
}

/// Records operation latency when dropped.
pub struct LatencyTimer {
    tier: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(tier: &'static str, operation: &'static str) -> Self {
        Self {
            tier,
            operation,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.tier, self.operation, self.start.elapsed());
    }
}
