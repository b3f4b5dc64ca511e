// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Eviction candidate selection.
//!
//! Every policy reads the per-shard [`AccessLedger`]s and returns victim keys
//! ordered "evict first". Candidates from several shards are merged by their
//! rank, so selection is global even when the keyspace is partitioned.

use std::collections::HashSet;
use std::str::FromStr;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use super::ledger::{AccessLedger, Candidate};

/// Selectable eviction behaviour, resolved once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Oldest last access
    #[default]
    Lru,
    /// Lowest access count
    Lfu,
    /// Oldest insertion
    Fifo,
    /// Newest insertion
    Lifo,
    /// Uniform, without replacement
    Random,
    /// Soonest expiry, only among keys that have one
    Ttl,
    /// LRU ∪ LFU candidates ranked by accesses in the trailing window
    Adaptive,
}

impl EvictionPolicy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Lfu => "lfu",
            Self::Fifo => "fifo",
            Self::Lifo => "lifo",
            Self::Random => "random",
            Self::Ttl => "ttl",
            Self::Adaptive => "adaptive",
        }
    }

    /// Select up to `count` victims across `ledgers`.
    ///
    /// Returns fewer keys when the ledgers hold fewer entries (or, for
    /// [`EvictionPolicy::Ttl`], fewer entries with an expiry).
    pub fn select(&self, ledgers: &[&AccessLedger], count: usize, now_ms: u64) -> Vec<String> {
        if count == 0 {
            return Vec::new();
        }
        match self {
            Self::Lru => merged(ledgers, count, |l, n| l.least_recent(n)),
            Self::Lfu => merged(ledgers, count, |l, n| l.least_frequent(n)),
            Self::Fifo => merged(ledgers, count, |l, n| l.oldest(n)),
            Self::Lifo => merged(ledgers, count, |l, n| l.newest(n)),
            Self::Ttl => merged(ledgers, count, |l, n| l.soonest_expiring(n)),
            Self::Random => {
                let all: Vec<&String> = ledgers.iter().flat_map(|l| l.keys()).collect();
                all.choose_multiple(&mut rand::thread_rng(), count)
                    .map(|k| (*k).clone())
                    .collect()
            }
            Self::Adaptive => select_adaptive(ledgers, count, now_ms),
        }
    }
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unknown policy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown eviction policy '{0}'")]
pub struct UnknownPolicy(pub String);

impl FromStr for EvictionPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            "fifo" => Ok(Self::Fifo),
            "lifo" => Ok(Self::Lifo),
            "random" => Ok(Self::Random),
            "ttl" => Ok(Self::Ttl),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

/// Take the best `count` from each ledger, then the best `count` overall.
fn merged<F>(ledgers: &[&AccessLedger], count: usize, pick: F) -> Vec<String>
where
    F: Fn(&AccessLedger, usize) -> Vec<Candidate>,
{
    let mut all: Vec<Candidate> = ledgers.iter().flat_map(|l| pick(l, count)).collect();
    all.sort();
    all.into_iter().take(count).map(|c| c.key).collect()
}

/// Union of `2 × count` LRU and `2 × count` LFU candidates, deduplicated,
/// then ranked ascending by accesses inside the trailing window. The sort is
/// stable, so equal recent counts keep union order (LRU order first).
fn select_adaptive(ledgers: &[&AccessLedger], count: usize, now_ms: u64) -> Vec<String> {
    let wide = count.saturating_mul(2);
    let lru = merged(ledgers, wide, |l, n| l.least_recent(n));
    let lfu = merged(ledgers, wide, |l, n| l.least_frequent(n));

    let mut seen = HashSet::new();
    let mut union: Vec<(usize, String)> = Vec::with_capacity(lru.len() + lfu.len());
    for key in lru.into_iter().chain(lfu) {
        if seen.insert(key.clone()) {
            let recent = ledgers
                .iter()
                .find_map(|l| l.get(&key))
                .map_or(0, |r| r.recent_count(now_ms));
            union.push((recent, key));
        }
    }

    union.sort_by_key(|(recent, _)| *recent);
    union.into_iter().take(count).map(|(_, key)| key).collect()
}
