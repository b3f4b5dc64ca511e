// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache lifecycle: start, maintenance loop, shutdown.
//!
//! ```text
//! Created ──start()──► Warming ──► Running ──shutdown()──► ShuttingDown ──► Stopped
//!                      │ restore snapshot       │ stop + join maintenance
//!                      │ preload keys           │ wait for in-flight ops
//!                      │ spawn maintenance      │ final snapshot, clear tables
//! ```

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::{interval_at, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::events::CacheEvent;
use crate::strategy::partition::is_imbalanced;

use super::types::{CacheError, CacheState, MaintenanceReport};
use super::warming::WarmingStrategy;
use super::CacheManager;

/// Imbalance is not reported below this many entries in total.
const IMBALANCE_MIN_ITEMS: usize = 100;

/// Periods of the maintenance jobs; `None` disables a job.
#[derive(Debug, Clone, Copy)]
struct Schedule {
    sweep: Duration,
    rollup: Option<Duration>,
    refresh: Option<Duration>,
    snapshot: Option<Duration>,
}

fn every(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Tick of an optional interval; never completes when the job is disabled.
async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl CacheManager {
    /// Start the cache: restore the snapshot, preload keys, then spawn the
    /// maintenance task.
    ///
    /// Startup flow:
    /// 1. Restore the snapshot (when persistence is enabled). An unreadable
    ///    snapshot is logged and the cache starts empty.
    /// 2. Preload `warming.preload_keys` (when the `preload` strategy is on)
    /// 3. Spawn the maintenance loop and switch to `Running`
    #[tracing::instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<(), CacheError> {
        let state = self.state();
        if state != CacheState::Created {
            return Err(CacheError::InvalidState(state));
        }
        let startup_start = Instant::now();
        info!("Starting cache manager...");
        self.set_state(CacheState::Warming);

        // ========== PHASE 1: Restore snapshot ==========
        if self.config.persistence.enabled {
            let phase_start = Instant::now();
            match self.restore_snapshot().await {
                Ok(restored) => {
                    crate::metrics::record_startup_phase("snapshot_restore", phase_start.elapsed());
                    info!(restored, "Snapshot phase complete");
                }
                Err(e) => {
                    crate::metrics::record_error("snapshot", "restore", "snapshot");
                    warn!(error = %e, "Snapshot restore failed, starting with an empty table");
                }
            }
        }

        // ========== PHASE 2: Preload ==========
        if self.config.warming.uses(WarmingStrategy::Preload) {
            let phase_start = Instant::now();
            let loaded = self.preload().await;
            crate::metrics::record_startup_phase("preload", phase_start.elapsed());
            debug!(loaded, "Preload phase complete");
        }

        // ========== PHASE 3: Maintenance ==========
        let schedule = self.schedule();
        let handle = tokio::spawn(Self::run_maintenance(
            Arc::downgrade(self),
            self.state_receiver(),
            schedule,
        ));
        *self.task.lock() = Some(handle);

        self.set_state(CacheState::Running);
        crate::metrics::record_startup_phase("total", startup_start.elapsed());
        info!(
            sweep = ?schedule.sweep,
            rollup = ?schedule.rollup,
            refresh = ?schedule.refresh,
            snapshot = ?schedule.snapshot,
            "Cache manager running"
        );
        Ok(())
    }

    fn schedule(&self) -> Schedule {
        let c = &self.config;
        Schedule {
            sweep: Duration::from_millis(c.expiration.check_interval_ms),
            rollup: c
                .statistics
                .enabled
                .then(|| Duration::from_millis(c.statistics.rollup_interval_ms)),
            refresh: c
                .warming
                .uses(WarmingStrategy::Background)
                .then(|| Duration::from_millis(c.warming.background_interval_ms)),
            snapshot: c
                .persistence
                .enabled
                .then(|| Duration::from_millis(c.persistence.interval_ms)),
        }
    }

    /// Run the maintenance loop until the cache leaves the running states
    /// or is dropped.
    async fn run_maintenance(manager: Weak<Self>, mut state_rx: watch::Receiver<CacheState>, schedule: Schedule) {
        let mut sweep = every(schedule.sweep);
        let mut rollup = schedule.rollup.map(every);
        let mut refresh = schedule.refresh.map(every);
        let mut snapshot = schedule.snapshot.map(every);

        loop {
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() || !state_rx.borrow().accepts_operations() {
                        break;
                    }
                }

                _ = sweep.tick() => {
                    let Some(m) = manager.upgrade() else { break };
                    let _guard = m.maintenance.lock().await;
                    m.sweep_expired().await;
                    m.evict_to_threshold().await;
                    m.check_imbalance();
                }

                _ = next_tick(&mut rollup) => {
                    let Some(m) = manager.upgrade() else { break };
                    let _guard = m.maintenance.lock().await;
                    m.rollup();
                }

                _ = next_tick(&mut refresh) => {
                    let Some(m) = manager.upgrade() else { break };
                    let _guard = m.maintenance.lock().await;
                    m.refresh_due().await;
                }

                _ = next_tick(&mut snapshot) => {
                    let Some(m) = manager.upgrade() else { break };
                    let _guard = m.maintenance.lock().await;
                    // Failures are logged and counted by save_snapshot
                    let _ = m.save_snapshot().await;
                }
            }
        }
        debug!("Maintenance loop stopped");
    }

    /// Perform one pass of every enabled maintenance job (for manual control
    /// instead of the run loop). Never overlaps with the background task.
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self) -> MaintenanceReport {
        let _guard = self.maintenance.lock().await;
        if !self.state().accepts_operations() {
            return MaintenanceReport::default();
        }
        let start = Instant::now();

        let expired = self.sweep_expired().await;
        let evicted = self.evict_to_threshold().await;
        let imbalance = self.check_imbalance();
        let refreshed = if self.config.warming.uses(WarmingStrategy::Background) {
            self.refresh_due().await
        } else {
            0
        };
        let snapshot_entries = if self.config.persistence.enabled {
            self.save_snapshot().await.ok()
        } else {
            None
        };
        self.rollup();

        crate::metrics::record_maintenance(start.elapsed());
        MaintenanceReport {
            expired,
            evicted,
            refreshed,
            snapshot_entries,
            imbalance,
        }
    }

    /// Report shard sizes when they drift past `imbalance_ratio`. Detection
    /// only; keys are never moved.
    fn check_imbalance(&self) -> Option<Vec<usize>> {
        let p = &self.config.partitioning;
        if !p.enabled || self.shards.len() < 2 {
            return None;
        }
        let sizes = self.shard_sizes();
        if !is_imbalanced(&sizes, p.imbalance_ratio, IMBALANCE_MIN_ITEMS) {
            return None;
        }
        self.emit(CacheEvent::PartitionImbalance { sizes: sizes.clone() });
        Some(sizes)
    }

    /// Refresh gauges and push a statistics snapshot.
    fn rollup(&self) {
        let items = self.usage.items();
        let bytes = self.usage.bytes();
        crate::metrics::set_cache_items(items);
        crate::metrics::set_cache_bytes(bytes as u64);
        let pressure = if self.strategy.max_bytes > 0 {
            bytes as f64 / self.strategy.max_bytes as f64
        } else if self.strategy.max_items > 0 {
            items as f64 / self.strategy.max_items as f64
        } else {
            0.0
        };
        crate::metrics::set_memory_pressure(pressure);
        self.stats.rollup(items, bytes);
    }

    /// Initiate graceful shutdown.
    ///
    /// New operations are refused from here on. The maintenance task is
    /// stopped and joined, in-flight operations are awaited, a final
    /// snapshot is written when persistence is enabled, and the tables are
    /// cleared. The backing store keeps its contents. Calling it again is
    /// a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), CacheError> {
        if matches!(self.state(), CacheState::ShuttingDown | CacheState::Stopped) {
            return Ok(());
        }
        let shutdown_start = Instant::now();
        info!("Initiating cache shutdown...");
        self.set_state(CacheState::ShuttingDown);

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Maintenance task ended abnormally");
            }
        }

        self.wait_for_quiescence().await;

        let _guard = self.maintenance.lock().await;
        let snapshot = if self.config.persistence.enabled {
            self.save_snapshot().await.map(|entries| {
                info!(entries, "Final snapshot written");
            })
        } else {
            Ok(())
        };

        let cleared = self.clear_tables();
        self.set_state(CacheState::Stopped);
        crate::metrics::record_startup_phase("shutdown", shutdown_start.elapsed());
        info!(cleared, "Cache shutdown complete");
        snapshot
    }

    /// Wait until no public operation is running.
    async fn wait_for_quiescence(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let pending = self.in_flight.load(Ordering::Acquire);
            if pending == 0 {
                return;
            }
            debug!(pending, "Waiting for in-flight operations");
            notified.await;
        }
    }
}
