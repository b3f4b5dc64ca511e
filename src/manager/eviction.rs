// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Capacity check and eviction.
//!
//! Every insert runs the check first: `current ≥ threshold × max` on items
//! or bytes (with the overwritten entry, if any, left out) means room must
//! be made. The common case takes only the owning shard's lock. When room is
//! needed, all shards are locked in index order, victims are chosen across
//! every ledger and removed, and the new entry goes in under the same locks.
//!
//! Removal stops once the check passes (at most `batch_size` victims), or
//! takes the whole batch when `aggressive` is set. The key being written is
//! never its own victim.
//!
//! With several shards, up to one writer per other shard can be inside its
//! fast path at once, so the fast path counts that many extra items before
//! deciding there is room. Bytes get no such reservation: concurrent writers
//! in other shards can push past `max_size` by their in-flight entries until
//! the next insert evicts.

use parking_lot::MutexGuard;
use tracing::{debug, info};

use crate::entry::now_millis;
use crate::events::CacheEvent;
use crate::strategy::{AccessLedger, EvictionPolicy};

use super::shard::{Shard, Slot};
use super::stats::StatsRecorder;
use super::CacheManager;

impl CacheManager {
    /// True when the table must shrink before an entry of `incoming` bytes goes in.
    fn needs_room(&self, items: usize, bytes: usize, incoming: usize) -> bool {
        self.strategy.should_evict(items, bytes) || self.strategy.exceeds_hard_limit(bytes, incoming)
    }

    /// Insert `slot` under `key`, evicting first when at capacity. Returns
    /// the evicted keys.
    pub(super) fn admit(&self, key: &str, slot: Slot) -> Vec<String> {
        let now = now_millis();
        let incoming = slot.meta.size_bytes;
        let idx = self.strategy.partition_of(key) % self.shards.len();

        {
            let mut shard = self.shards[idx].lock();
            let replaced = shard.size_of(key);
            let items = self.usage.items() - usize::from(replaced.is_some());
            let bytes = self.usage.bytes() - replaced.unwrap_or(0);
            let in_flight_elsewhere = self.shards.len() - 1;
            if !self.needs_room(items + in_flight_elsewhere, bytes, incoming) {
                let tick = self.next_tick();
                shard.insert(key, slot, tick, tick, now, &self.usage);
                return Vec::new();
            }
        }

        let mut guards: Vec<MutexGuard<'_, Shard>> = self.shards.iter().map(|s| s.lock()).collect();
        let (victims, freed) = self.evict_locked(&mut guards, Some(key), incoming, now);
        let tick = self.next_tick();
        guards[idx].insert(key, slot, tick, tick, now, &self.usage);
        drop(guards);

        self.report_eviction(&victims, freed, "Evicted entries to make room");
        victims
    }

    /// Capacity pass outside of any insert, run by maintenance under the TTL
    /// policy so entries nearest expiry go before the table fills.
    pub(super) async fn evict_to_threshold(&self) -> usize {
        if self.strategy.policy != EvictionPolicy::Ttl
            || !self.strategy.should_evict(self.usage.items(), self.usage.bytes())
        {
            return 0;
        }
        let (victims, freed) = {
            let mut guards: Vec<MutexGuard<'_, Shard>> = self.shards.iter().map(|s| s.lock()).collect();
            self.evict_locked(&mut guards, None, 0, now_millis())
        };
        self.report_eviction(&victims, freed, "Evicted entries nearest expiry");
        let count = victims.len();
        self.after_eviction(victims).await;
        count
    }

    fn report_eviction(&self, victims: &[String], freed: usize, message: &'static str) {
        if !victims.is_empty() {
            let count = victims.len();
            StatsRecorder::bump(&self.stats.evictions, count as u64);
            crate::metrics::record_eviction(self.strategy.policy.as_str(), count, freed as u64);
            info!(
                policy = %self.strategy.policy,
                count,
                freed_bytes = freed,
                items = self.usage.items(),
                "{message}"
            );
            self.emit(CacheEvent::Evicted {
                policy: self.strategy.policy,
                count,
            });
        }
        crate::metrics::set_cache_items(self.usage.items());
        crate::metrics::set_cache_bytes(self.usage.bytes() as u64);
    }

    /// Remove victims with every shard locked. `key`, the entry being
    /// written, is never chosen. Returns the victims and the bytes they held.
    fn evict_locked(
        &self,
        guards: &mut [MutexGuard<'_, Shard>],
        key: Option<&str>,
        incoming: usize,
        now: u64,
    ) -> (Vec<String>, usize) {
        let replaced = key.and_then(|key| guards.iter().find_map(|g| g.size_of(key)));
        let mut items: usize = guards.iter().map(|g| g.len()).sum::<usize>() - usize::from(replaced.is_some());
        let mut bytes: usize = guards.iter().map(|g| g.bytes()).sum::<usize>() - replaced.unwrap_or(0);

        // Another writer may have made room since the fast path looked
        if !self.needs_room(items, bytes, incoming) {
            return (Vec::new(), 0);
        }

        let batch = self.strategy.batch_size;
        let candidates: Vec<String> = {
            let ledgers: Vec<&AccessLedger> = guards.iter().map(|g| g.ledger()).collect();
            self.strategy
                .select_for_eviction(&ledgers, batch + 1, now)
                .into_iter()
                .filter(|k| Some(k.as_str()) != key)
                .take(batch)
                .collect()
        };

        let mut victims = Vec::with_capacity(candidates.len());
        let mut freed = 0;
        for victim in candidates {
            if !self.strategy.aggressive && !self.needs_room(items, bytes, incoming) {
                break;
            }
            let p = self.strategy.partition_of(&victim) % guards.len();
            if let Some(slot) = guards[p].remove(&victim, &self.usage) {
                items -= 1;
                bytes -= slot.meta.size_bytes;
                freed += slot.meta.size_bytes;
                debug!(key = %victim, policy = %self.strategy.policy, "Evicted");
                victims.push(victim);
            }
        }
        (victims, freed)
    }

    /// Propagate evictions to the backing store when configured to.
    pub(super) async fn after_eviction(&self, victims: Vec<String>) {
        if victims.is_empty() || !self.config.eviction.evict_from_store {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        for key in &victims {
            if let Err(e) = store.delete(key).await {
                self.soft_error("evict", Some(key), &e);
            }
        }
    }
}
