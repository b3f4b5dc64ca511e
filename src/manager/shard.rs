// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One partition of the manager table.
//!
//! A shard owns `{table, ledger, bytes}` and is only ever touched behind
//! its `parking_lot::Mutex`. Every mutation goes through the methods here,
//! which keep the three in step and mirror the deltas into the
//! manager-wide [`Usage`] counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;

use crate::entry::{EntryMetadata, Envelope};
use crate::strategy::AccessLedger;

/// Manager-wide totals, only written while holding a shard lock.
#[derive(Debug, Default)]
pub(crate) struct Usage {
    items: AtomicUsize,
    bytes: AtomicUsize,
}

impl Usage {
    pub(crate) fn items(&self) -> usize {
        self.items.load(Ordering::Acquire)
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    fn add(&self, items: usize, bytes: usize) {
        self.items.fetch_add(items, Ordering::AcqRel);
        self.bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    fn sub(&self, items: usize, bytes: usize) {
        self.items.fetch_sub(items, Ordering::AcqRel);
        self.bytes.fetch_sub(bytes, Ordering::AcqRel);
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub value: Value,
    pub meta: EntryMetadata,
}

impl Slot {
    pub(crate) fn into_envelope(self) -> Envelope {
        Envelope::new(self.value, self.meta)
    }
}

/// Result of a bookkept read.
pub(crate) enum Lookup {
    Hit { slot: Slot, access_count: u64 },
    /// Found past its expiry and removed
    Expired,
    Missing,
}

#[derive(Debug, Default)]
pub(crate) struct Shard {
    table: HashMap<String, Slot>,
    ledger: AccessLedger,
    bytes: usize,
}

impl Shard {
    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn ledger(&self) -> &AccessLedger {
        &self.ledger
    }

    /// Size of the entry under `key`, if present (live or not).
    pub(crate) fn size_of(&self, key: &str) -> Option<usize> {
        self.table.get(key).map(|s| s.meta.size_bytes)
    }

    /// Live entry without touching the ledger.
    pub(crate) fn peek(&self, key: &str, now: u64) -> Option<&Slot> {
        self.table.get(key).filter(|s| !s.meta.is_expired_at(now))
    }

    /// Read with access bookkeeping; an expired entry is removed on the spot.
    pub(crate) fn lookup(&mut self, key: &str, tick: u64, now: u64, usage: &Usage) -> Lookup {
        let expired = match self.table.get(key) {
            None => return Lookup::Missing,
            Some(slot) => slot.meta.is_expired_at(now),
        };
        if expired {
            self.remove(key, usage);
            return Lookup::Expired;
        }
        let access_count = self.ledger.record_access(key, tick, now).unwrap_or(0);
        match self.table.get(key) {
            Some(slot) => Lookup::Hit {
                slot: slot.clone(),
                access_count,
            },
            None => Lookup::Missing,
        }
    }

    /// Insert or overwrite. An overwrite keeps the key's insertion order and
    /// access counters; its size is swapped for the new one.
    pub(crate) fn insert(&mut self, key: &str, slot: Slot, seq: u64, tick: u64, now: u64, usage: &Usage) -> Option<Slot> {
        let expires_at = slot.meta.expires_at;
        let size = slot.meta.size_bytes;
        let old = self.table.insert(key.to_string(), slot);
        match &old {
            Some(prev) => {
                self.bytes -= prev.meta.size_bytes;
                usage.sub(0, prev.meta.size_bytes);
            }
            None => usage.add(1, 0),
        }
        self.ledger.record_insertion(key, seq, tick, now, expires_at);
        self.bytes += size;
        usage.add(0, size);
        old
    }

    pub(crate) fn remove(&mut self, key: &str, usage: &Usage) -> Option<Slot> {
        let slot = self.table.remove(key)?;
        self.ledger.record_removal(key);
        self.bytes -= slot.meta.size_bytes;
        usage.sub(1, slot.meta.size_bytes);
        Some(slot)
    }

    /// Replace the expiry of a live entry. Returns the updated metadata.
    pub(crate) fn set_expiry(&mut self, key: &str, expires_at: Option<u64>, ttl_ms: Option<u64>) -> Option<EntryMetadata> {
        let slot = self.table.get_mut(key)?;
        slot.meta.expires_at = expires_at;
        slot.meta.ttl_ms = ttl_ms;
        self.ledger.set_expiry(key, expires_at);
        Some(slot.meta.clone())
    }

    /// Push out the expiry without changing the requested TTL (sliding mode).
    pub(crate) fn extend_expiry(&mut self, key: &str, expires_at: u64) {
        if let Some(slot) = self.table.get_mut(key) {
            slot.meta.expires_at = Some(expires_at);
            self.ledger.set_expiry(key, Some(expires_at));
        }
    }

    pub(crate) fn expired_keys(&self, now: u64) -> Vec<String> {
        self.ledger.expired(now)
    }

    pub(crate) fn live_keys(&self, now: u64) -> impl Iterator<Item = &String> {
        self.table
            .iter()
            .filter(move |(_, s)| !s.meta.is_expired_at(now))
            .map(|(k, _)| k)
    }

    pub(crate) fn live_count(&self, now: u64) -> usize {
        self.live_keys(now).count()
    }

    pub(crate) fn tagged(&self, tags: &[String], now: u64) -> Vec<String> {
        self.table
            .iter()
            .filter(|(_, s)| !s.meta.is_expired_at(now) && s.meta.has_any_tag(tags))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Live entries as envelopes, for snapshots.
    pub(crate) fn envelopes(&self, now: u64) -> Vec<(String, Envelope)> {
        self.table
            .iter()
            .filter(|(_, s)| !s.meta.is_expired_at(now))
            .map(|(k, s)| (k.clone(), s.clone().into_envelope()))
            .collect()
    }

    /// Live entries past the refresh line: `(key, ttl, metadata)`.
    pub(crate) fn entries_with_ttl(&self, now: u64) -> Vec<(String, u64, EntryMetadata)> {
        self.table
            .iter()
            .filter(|(_, s)| !s.meta.is_expired_at(now))
            .filter_map(|(k, s)| s.meta.ttl_ms.map(|ttl| (k.clone(), ttl, s.meta.clone())))
            .collect()
    }

    pub(crate) fn clear(&mut self, usage: &Usage) -> usize {
        let n = self.table.len();
        usage.sub(n, self.bytes);
        self.table.clear();
        self.ledger.clear();
        self.bytes = 0;
        n
    }

    /// Table, ledger and byte total agree.
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        let bytes: usize = self.table.values().map(|s| s.meta.size_bytes).sum();
        self.ledger.is_consistent()
            && self.ledger.len() == self.table.len()
            && self.table.keys().all(|k| self.ledger.get(k).is_some())
            && bytes == self.bytes
    }
}
