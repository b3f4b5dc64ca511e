// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deterministic key → partition assignment.
//!
//! Three strategies:
//! - `Hash`: `xxh64(key) mod n`
//! - `Range`: first byte of the key split into `n` equal bands
//! - `Consistent`: hash ring with virtual nodes per partition
//!
//! Replicas of a key are the partitions following its primary,
//! `(primary + i) mod n` for `i ∈ [1, replication)`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

/// Virtual nodes per partition on the consistent-hash ring.
const VNODES_PER_PARTITION: usize = 64;

const HASH_SEED: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionStrategy {
    #[default]
    Hash,
    Range,
    Consistent,
}

#[derive(Debug, Clone)]
pub struct Partitioner {
    strategy: PartitionStrategy,
    partitions: usize,
    replication: usize,
    ring: BTreeMap<u64, usize>,
}

impl Partitioner {
    /// `partitions` is clamped to at least 1 and `replication` to `[1, partitions]`.
    #[must_use]
    pub fn new(strategy: PartitionStrategy, partitions: usize, replication: usize) -> Self {
        let partitions = partitions.max(1);
        let replication = replication.clamp(1, partitions);

        let mut ring = BTreeMap::new();
        if strategy == PartitionStrategy::Consistent {
            for p in 0..partitions {
                for v in 0..VNODES_PER_PARTITION {
                    let label = format!("partition-{p}-vnode-{v}");
                    ring.insert(xxh64(label.as_bytes(), HASH_SEED), p);
                }
            }
        }

        Self {
            strategy,
            partitions,
            replication,
            ring,
        }
    }

    /// Single-partition layout (partitioning disabled).
    #[must_use]
    pub fn single() -> Self {
        Self::new(PartitionStrategy::Hash, 1, 1)
    }

    #[must_use]
    pub fn partitions(&self) -> usize {
        self.partitions
    }

    #[must_use]
    pub fn strategy(&self) -> PartitionStrategy {
        self.strategy
    }

    #[must_use]
    pub fn partition_of(&self, key: &str) -> usize {
        if self.partitions == 1 {
            return 0;
        }
        match self.strategy {
            PartitionStrategy::Hash => (xxh64(key.as_bytes(), HASH_SEED) % self.partitions as u64) as usize,
            PartitionStrategy::Range => {
                let first = key.as_bytes().first().copied().unwrap_or(0) as usize;
                (first * self.partitions) / 256
            }
            PartitionStrategy::Consistent => {
                let h = xxh64(key.as_bytes(), HASH_SEED);
                self.ring
                    .range(h..)
                    .next()
                    .or_else(|| self.ring.iter().next())
                    .map_or(0, |(_, p)| *p)
            }
        }
    }

    /// Replica partitions for a key, excluding its primary.
    #[must_use]
    pub fn replicas_of(&self, key: &str) -> Vec<usize> {
        let primary = self.partition_of(key);
        (1..self.replication)
            .map(|i| (primary + i) % self.partitions)
            .collect()
    }
}

/// Imbalance check over shard sizes: true when the largest shard exceeds
/// `ratio` times the mean. Shards with fewer than `min_items` total are
/// never reported.
#[must_use]
pub fn is_imbalanced(sizes: &[usize], ratio: f64, min_items: usize) -> bool {
    let total: usize = sizes.iter().sum();
    if sizes.len() < 2 || total < min_items || total == 0 {
        return false;
    }
    let mean = total as f64 / sizes.len() as f64;
    let max = sizes.iter().copied().max().unwrap_or(0) as f64;
    max > mean * ratio
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_partition_always_zero() {
        let p = Partitioner::single();
        assert_eq!(p.partition_of("anything"), 0);
        assert!(p.replicas_of("anything").is_empty());
    }

    #[test]
    fn test_hash_is_deterministic_and_in_range() {
        let p = Partitioner::new(PartitionStrategy::Hash, 8, 1);
        for i in 0..200 {
            let key = format!("user:{i}");
            let a = p.partition_of(&key);
            assert_eq!(a, p.partition_of(&key));
            assert!(a < 8);
        }
    }

    #[test]
    fn test_range_orders_by_first_byte() {
        let p = Partitioner::new(PartitionStrategy::Range, 4, 1);
        assert_eq!(p.partition_of(""), 0);
        assert!(p.partition_of("A") <= p.partition_of("z"));
        assert_eq!(p.partition_of("\u{7f}"), 1);
    }

    #[test]
    fn test_consistent_spreads_keys() {
        let p = Partitioner::new(PartitionStrategy::Consistent, 4, 1);
        let mut counts = [0usize; 4];
        for i in 0..4_000 {
            counts[p.partition_of(&format!("session:{i}"))] += 1;
        }
        assert!(counts.iter().all(|&c| c > 0), "every partition gets keys: {counts:?}");
    }

    #[test]
    fn test_consistent_is_stable_when_growing() {
        let small = Partitioner::new(PartitionStrategy::Consistent, 4, 1);
        let large = Partitioner::new(PartitionStrategy::Consistent, 5, 1);
        let moved = (0..2_000)
            .filter(|i| {
                let key = format!("k{i}");
                small.partition_of(&key) != large.partition_of(&key)
            })
            .count();
        // Roughly 1/5 of keys should move; plain modulo would move ~4/5
        assert!(moved < 1_000, "moved {moved} of 2000");
    }

    #[test]
    fn test_replicas_follow_primary() {
        let p = Partitioner::new(PartitionStrategy::Hash, 4, 3);
        let key = "order:17";
        let primary = p.partition_of(key);
        assert_eq!(p.replicas_of(key), vec![(primary + 1) % 4, (primary + 2) % 4]);
    }

    #[test]
    fn test_replication_clamped_to_partitions() {
        let p = Partitioner::new(PartitionStrategy::Hash, 2, 10);
        assert_eq!(p.replicas_of("x").len(), 1);
    }

    #[test]
    fn test_imbalance_detection() {
        assert!(!is_imbalanced(&[10, 10, 10, 10], 1.5, 0));
        assert!(is_imbalanced(&[100, 1, 1, 1], 1.5, 0));
        assert!(!is_imbalanced(&[3, 0, 0, 0], 1.5, 10));
        assert!(!is_imbalanced(&[5], 1.5, 0));
    }
}
