// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Access ledger: ordered indices over one shard's keyspace.
//!
//! Each live key has exactly one [`AccessRecord`] and exactly one slot in
//! every index. All mutation goes through [`AccessLedger::record_insertion`],
//! [`AccessLedger::record_access`], [`AccessLedger::set_expiry`] and
//! [`AccessLedger::record_removal`], which keep the record and its index
//! positions in lockstep.
//!
//! Ordering uses a logical clock (`tick`) supplied by the caller rather than
//! wall time, so two accesses within the same millisecond still order
//! correctly. Ties on every index break by insertion sequence.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Trailing window used for "recent" access counts (adaptive policy).
pub const RECENT_WINDOW_MS: u64 = 5 * 60 * 1000;

/// Cap on remembered access timestamps per key.
const MAX_RECENT_SAMPLES: usize = 256;

/// Access bookkeeping for one key.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    /// Insertion sequence (global, monotonic)
    pub seq: u64,
    /// Logical clock value of the last access (or the insertion)
    pub last_tick: u64,
    /// Wall-clock time of the last access (epoch millis)
    pub last_access_ms: u64,
    pub access_count: u64,
    /// Absolute expiry (epoch millis)
    pub expires_at: Option<u64>,
    recent: VecDeque<u64>,
}

impl AccessRecord {
    /// Number of accesses in `[now - RECENT_WINDOW_MS, now]`.
    #[must_use]
    pub fn recent_count(&self, now_ms: u64) -> usize {
        let since = now_ms.saturating_sub(RECENT_WINDOW_MS);
        self.recent.iter().filter(|&&t| t >= since).count()
    }
}

/// One eviction candidate with the sort key it was ranked by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Candidate {
    pub rank: (u64, u64),
    pub key: String,
}

#[derive(Debug, Default)]
pub struct AccessLedger {
    records: HashMap<String, AccessRecord>,
    /// (last_tick, seq, key)
    by_recency: BTreeSet<(u64, u64, String)>,
    /// (access_count, seq, key)
    by_frequency: BTreeSet<(u64, u64, String)>,
    /// seq → key
    by_insertion: BTreeMap<u64, String>,
    /// (expires_at, seq, key), only keys with an expiry
    by_expiry: BTreeSet<(u64, u64, String)>,
}

impl AccessLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&AccessRecord> {
        self.records.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.records.keys()
    }

    /// Register a new key. An existing key keeps its sequence and counters,
    /// only its expiry is updated.
    pub fn record_insertion(&mut self, key: &str, seq: u64, tick: u64, now_ms: u64, expires_at: Option<u64>) {
        if self.records.contains_key(key) {
            self.set_expiry(key, expires_at);
            return;
        }

        let record = AccessRecord {
            seq,
            last_tick: tick,
            last_access_ms: now_ms,
            access_count: 0,
            expires_at,
            recent: VecDeque::new(),
        };
        self.by_recency.insert((tick, seq, key.to_string()));
        self.by_frequency.insert((0, seq, key.to_string()));
        self.by_insertion.insert(seq, key.to_string());
        if let Some(at) = expires_at {
            self.by_expiry.insert((at, seq, key.to_string()));
        }
        self.records.insert(key.to_string(), record);
    }

    /// Bump recency and frequency. Returns the new access count.
    pub fn record_access(&mut self, key: &str, tick: u64, now_ms: u64) -> Option<u64> {
        let record = self.records.get_mut(key)?;

        self.by_recency.remove(&(record.last_tick, record.seq, key.to_string()));
        self.by_frequency.remove(&(record.access_count, record.seq, key.to_string()));

        record.last_tick = tick;
        record.last_access_ms = now_ms;
        record.access_count = record.access_count.saturating_add(1);
        record.recent.push_back(now_ms);
        let since = now_ms.saturating_sub(RECENT_WINDOW_MS);
        while record.recent.front().is_some_and(|&t| t < since) || record.recent.len() > MAX_RECENT_SAMPLES {
            record.recent.pop_front();
        }

        self.by_recency.insert((record.last_tick, record.seq, key.to_string()));
        self.by_frequency.insert((record.access_count, record.seq, key.to_string()));
        Some(record.access_count)
    }

    /// Move a key in the expiry index.
    pub fn set_expiry(&mut self, key: &str, expires_at: Option<u64>) {
        let Some(record) = self.records.get_mut(key) else {
            return;
        };
        if let Some(old) = record.expires_at {
            self.by_expiry.remove(&(old, record.seq, key.to_string()));
        }
        record.expires_at = expires_at;
        if let Some(at) = expires_at {
            self.by_expiry.insert((at, record.seq, key.to_string()));
        }
    }

    /// Drop a key from every index.
    pub fn record_removal(&mut self, key: &str) -> Option<AccessRecord> {
        let record = self.records.remove(key)?;
        self.by_recency.remove(&(record.last_tick, record.seq, key.to_string()));
        self.by_frequency.remove(&(record.access_count, record.seq, key.to_string()));
        self.by_insertion.remove(&record.seq);
        if let Some(at) = record.expires_at {
            self.by_expiry.remove(&(at, record.seq, key.to_string()));
        }
        Some(record)
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.by_recency.clear();
        self.by_frequency.clear();
        self.by_insertion.clear();
        self.by_expiry.clear();
    }

    /// Least recently accessed first.
    pub fn least_recent(&self, n: usize) -> Vec<Candidate> {
        self.by_recency
            .iter()
            .take(n)
            .map(|(tick, seq, key)| Candidate { rank: (*tick, *seq), key: key.clone() })
            .collect()
    }

    /// Least frequently accessed first.
    pub fn least_frequent(&self, n: usize) -> Vec<Candidate> {
        self.by_frequency
            .iter()
            .take(n)
            .map(|(count, seq, key)| Candidate { rank: (*count, *seq), key: key.clone() })
            .collect()
    }

    /// Oldest insertion first.
    pub fn oldest(&self, n: usize) -> Vec<Candidate> {
        self.by_insertion
            .iter()
            .take(n)
            .map(|(seq, key)| Candidate { rank: (*seq, *seq), key: key.clone() })
            .collect()
    }

    /// Newest insertion first. The rank is inverted so that ascending order
    /// still means "evict first".
    pub fn newest(&self, n: usize) -> Vec<Candidate> {
        self.by_insertion
            .iter()
            .rev()
            .take(n)
            .map(|(seq, key)| Candidate { rank: (u64::MAX - *seq, *seq), key: key.clone() })
            .collect()
    }

    /// Soonest to expire first, among keys that have an expiry.
    pub fn soonest_expiring(&self, n: usize) -> Vec<Candidate> {
        self.by_expiry
            .iter()
            .take(n)
            .map(|(at, seq, key)| Candidate { rank: (*at, *seq), key: key.clone() })
            .collect()
    }

    /// Keys whose expiry is at or before `now_ms`.
    pub fn expired(&self, now_ms: u64) -> Vec<String> {
        self.by_expiry
            .iter()
            .take_while(|(at, _, _)| *at <= now_ms)
            .map(|(_, _, key)| key.clone())
            .collect()
    }

    /// Internal consistency check: every index holds exactly the live keys.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let n = self.records.len();
        let expiring = self.records.values().filter(|r| r.expires_at.is_some()).count();
        self.by_recency.len() == n
            && self.by_frequency.len() == n
            && self.by_insertion.len() == n
            && self.by_expiry.len() == expiring
            && self.by_insertion.values().all(|k| self.records.contains_key(k))
    }
}
