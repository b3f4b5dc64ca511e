// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Multi-key, pattern, tag, TTL and typed operations.
//!
//! Batched variants run key by key; they are not atomic.

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::entry::{duration_millis, now_millis, Envelope};
use crate::events::CacheEvent;
use crate::strategy::Expiry;

use super::stats::{hit_rate, CacheInfo, Statistics, StatsRecorder};
use super::types::{BatchResult, CacheError, SetOptions, TtlStatus};
use super::CacheManager;

/// Glob match supporting `*` (any run) and `?` (any one char).
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

impl CacheManager {
    /// Get several keys. Only hits appear in the map.
    #[tracing::instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn mget(&self, keys: &[&str]) -> Result<HashMap<String, Value>, CacheError> {
        let _op = self.begin_op()?;
        crate::metrics::record_batch_size("mget", keys.len());
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get_inner(key).await {
                found.insert((*key).to_string(), value);
            }
        }
        Ok(found)
    }

    /// Set several entries with shared options.
    ///
    /// With a backing store the batch is written in one `put_batch` call,
    /// then admitted entry by entry. Oversized values count as failures
    /// without stopping the batch.
    #[tracing::instrument(skip(self, entries, options), fields(count = entries.len()))]
    pub async fn mset(&self, entries: Vec<(String, Value)>, options: SetOptions) -> Result<BatchResult, CacheError> {
        let _op = self.begin_op()?;
        let total = entries.len();
        crate::metrics::record_batch_size("mset", total);

        let mut prepared = Vec::with_capacity(total);
        let mut failed = 0;
        for (key, value) in entries {
            match self.prepare(&key, value, options.clone()) {
                Ok(slot) => prepared.push((key, slot)),
                Err(e) => {
                    debug!(key = %key, error = %e, "mset entry rejected");
                    failed += 1;
                }
            }
        }

        if let Some(store) = &self.store {
            let envelopes: Vec<(String, Envelope)> = prepared
                .iter()
                .map(|(k, s)| (k.clone(), Envelope::new(s.value.clone(), s.meta.clone())))
                .collect();
            if let Err(e) = store.put_batch(&envelopes).await {
                return Err(self.hard_error("mset", None, e));
            }
        }

        let succeeded = prepared.len();
        for (key, slot) in prepared {
            self.commit(&key, slot).await;
        }
        Ok(BatchResult { total, succeeded, failed })
    }

    /// Delete several keys. Returns how many existed.
    #[tracing::instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn mdel(&self, keys: &[&str]) -> Result<usize, CacheError> {
        let _op = self.begin_op()?;
        crate::metrics::record_batch_size("mdel", keys.len());
        let mut deleted = 0;
        for key in keys {
            if self.delete_inner(key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Empty every shard and the backing store. Returns the larger of the
    /// two removed counts.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self) -> Result<usize, CacheError> {
        let _op = self.begin_op()?;
        let in_table = self.clear_tables();
        let in_store = match &self.store {
            Some(store) => store.clear().await.map_err(|e| self.hard_error("clear", None, e))?,
            None => 0,
        };
        let count = in_table.max(in_store);
        info!(in_table, in_store, "Cache cleared");
        self.emit(CacheEvent::Cleared { count });
        Ok(count)
    }

    /// Drop every table entry, locking shards in index order.
    pub(super) fn clear_tables(&self) -> usize {
        let mut guards: Vec<_> = self.shards.iter().map(|s| s.lock()).collect();
        let removed = guards.iter_mut().map(|g| g.clear(&self.usage)).sum();
        drop(guards);
        crate::metrics::set_cache_items(0);
        crate::metrics::set_cache_bytes(0);
        removed
    }

    /// Live keys matching a glob (`*`, `?`), sorted. `None` matches all.
    pub fn keys(&self, pattern: Option<&str>) -> Result<Vec<String>, CacheError> {
        let _op = self.begin_op()?;
        let now = now_millis();
        let mut keys: Vec<String> = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .lock()
                    .live_keys(now)
                    .filter(|k| pattern.map_or(true, |p| glob_match(p, k)))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }

    /// Number of live entries in the table.
    #[must_use]
    pub fn size(&self) -> usize {
        self.live_count(now_millis())
    }

    /// Change the expiry of a live entry. Returns false when there is none.
    /// The backing store copy is rewritten with the new expiry; an entry
    /// held only by the store is updated there without re-admission.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn expire(&self, key: &str, expiry: Expiry) -> Result<bool, CacheError> {
        let _op = self.begin_op()?;
        let now = now_millis();
        let ttl = self.strategy.calculate_ttl(expiry, 0);
        let ttl_ms = ttl.map(duration_millis);
        let expires_at = ttl_ms.map(|ms| now.saturating_add(ms));

        let updated = {
            let mut shard = self.shard(key).lock();
            if shard.peek(key, now).is_none() {
                None
            } else {
                shard
                    .set_expiry(key, expires_at, ttl_ms)
                    .and_then(|meta| shard.peek(key, now).map(|s| Envelope::new(s.value.clone(), meta)))
            }
        };
        let envelope = match updated {
            Some(envelope) => envelope,
            None => match self.stored_live(key, now, "expire").await {
                Some(mut envelope) => {
                    envelope.metadata.expires_at = expires_at;
                    envelope.metadata.ttl_ms = ttl_ms;
                    envelope
                }
                None => return Ok(false),
            },
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.put(key, &envelope).await {
                return Err(self.hard_error("expire", Some(key), e));
            }
        }
        debug!(key = %key, ttl_ms = ?ttl_ms, "Expiry updated");
        Ok(true)
    }

    /// Time left on a live entry, from the table or else the backing store.
    pub async fn ttl(&self, key: &str) -> Result<TtlStatus, CacheError> {
        let _op = self.begin_op()?;
        let now = now_millis();
        let in_table = self
            .shard(key)
            .lock()
            .peek(key, now)
            .map(|slot| slot.meta.remaining_at(now));
        let remaining = match in_table {
            Some(remaining) => remaining,
            None => match self.stored_live(key, now, "ttl").await {
                Some(envelope) => envelope.metadata.remaining_at(now),
                None => return Ok(TtlStatus::Missing),
            },
        };
        Ok(match remaining {
            None => TtlStatus::NoExpiry,
            Some(left) => TtlStatus::Remaining(left),
        })
    }

    /// Live keys carrying any of `tags`, sorted. Entries evicted from the
    /// table but still in the backing store are included.
    pub async fn find_by_tags(&self, tags: &[String]) -> Result<Vec<String>, CacheError> {
        let _op = self.begin_op()?;
        Ok(self.tagged_keys(tags).await)
    }

    async fn tagged_keys(&self, tags: &[String]) -> Vec<String> {
        let now = now_millis();
        let mut keys: Vec<String> = self
            .shards
            .iter()
            .flat_map(|shard| shard.lock().tagged(tags, now))
            .collect();
        if let Some(store) = &self.store {
            match store.tagged_keys(tags, now).await {
                Ok(stored) => keys.extend(stored),
                Err(e) => self.soft_error("find_by_tags", None, &e),
            }
        }
        keys.sort_unstable();
        keys.dedup();
        keys
    }

    /// Delete every live entry carrying any of `tags`. Returns the result of
    /// each delete, keyed by entry.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_by_tags(&self, tags: &[String]) -> Result<Vec<(String, bool)>, CacheError> {
        let _op = self.begin_op()?;
        let keys = self.tagged_keys(tags).await;
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            let deleted = match self.delete_inner(&key).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(key = %key, error = %e, "Tag invalidation could not delete entry");
                    false
                }
            };
            results.push((key, deleted));
        }
        info!(?tags, invalidated = results.iter().filter(|(_, ok)| *ok).count(), "Invalidated by tags");
        Ok(results)
    }

    /// Delete every entry past its expiry. Returns how many were removed.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup(&self) -> Result<usize, CacheError> {
        let _op = self.begin_op()?;
        Ok(self.sweep_expired().await)
    }

    /// Sweep the table, then have the backing store drop its own expired
    /// entries (evicted ones never come back through the table).
    pub(super) async fn sweep_expired(&self) -> usize {
        let now = now_millis();
        let mut removed = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.lock();
            for key in shard.expired_keys(now) {
                if shard.remove(&key, &self.usage).is_some() {
                    removed.push(key);
                }
            }
        }
        for key in &removed {
            self.note_expired(key);
            self.forget_in_store(key).await;
        }

        let mut count = removed.len();
        if let Some(store) = &self.store {
            match store.purge_expired(now).await {
                Ok(purged) => {
                    for key in purged {
                        // A sliding entry may outlive its store copy; it is not gone
                        if self.shard(&key).lock().peek(&key, now).is_none() {
                            self.note_expired(&key);
                            count += 1;
                        }
                    }
                }
                Err(e) => self.soft_error("cleanup", None, &e),
            }
        }
        if count > 0 {
            debug!(count, "Expired entries swept");
        }
        count
    }

    /// Counters, hit rate, memory and latency.
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        let hits = StatsRecorder::load(&self.stats.hits);
        let misses = StatsRecorder::load(&self.stats.misses);
        let memory_bytes = self.usage.bytes();
        self.stats.observe_bytes(memory_bytes);
        Statistics {
            hits,
            misses,
            sets: StatsRecorder::load(&self.stats.sets),
            deletes: StatsRecorder::load(&self.stats.deletes),
            evictions: StatsRecorder::load(&self.stats.evictions),
            expirations: StatsRecorder::load(&self.stats.expirations),
            errors: StatsRecorder::load(&self.stats.errors),
            hit_rate: hit_rate(hits, misses),
            size: self.size(),
            memory_bytes,
            peak_memory_bytes: self.stats.peak_bytes(),
            avg_latency: self.stats.avg_latency(),
            tiers: self.store.as_ref().and_then(|s| s.tier_stats()),
            history: self.stats.history(),
        }
    }

    /// Shape and state of this instance.
    #[must_use]
    pub fn info(&self) -> CacheInfo {
        CacheInfo {
            state: self.state(),
            store: self.store.as_ref().map(|s| s.name()),
            policy: self.strategy.policy,
            partitions: self.shards.len(),
            shard_sizes: self.shard_sizes(),
            max_items: self.strategy.max_items,
            max_bytes: self.strategy.max_bytes,
            size: self.size(),
            memory_bytes: self.usage.bytes(),
            uptime: self.stats.uptime(),
        }
    }

    /// Get and deserialize. A value of the wrong shape is an error, not a miss.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and set.
    pub async fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: SetOptions) -> Result<(), CacheError> {
        let value = serde_json::to_value(value)?;
        self.set(key, value, options).await
    }

    /// Set with a plain TTL.
    pub async fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        self.set(key, value, SetOptions::ttl(ttl)).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{assert_consistent, manager, manager_with_store, BrokenStore};
    use super::*;
    use crate::config::CacheConfig;
    use crate::storage::memory::InMemoryStore;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;

    fn tags(t: &[&str]) -> Vec<String> {
        t.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", ""));
        assert!(glob_match("user:*", "user:42"));
        assert!(glob_match("user:?", "user:4"));
        assert!(!glob_match("user:?", "user:42"));
        assert!(glob_match("*:42", "user:42"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }

    #[tokio::test]
    async fn test_batch_operations() {
        let (cache, _) = manager(CacheConfig::default());
        let result = cache
            .mset(vec![("a".into(), json!(1)), ("b".into(), json!(2))], SetOptions::default())
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.succeeded, 2);

        let got = cache.mget(&["a", "b", "c"]).await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got["b"], json!(2));

        assert_eq!(cache.mdel(&["a", "c"]).await.unwrap(), 1);
        assert_eq!(cache.size(), 1);
        assert_consistent(&cache);
    }

    #[tokio::test]
    async fn test_mset_counts_rejected_entries() {
        let mut config = CacheConfig::default();
        config.storage.max_size = 200;
        let store = Arc::new(InMemoryStore::new());
        let (cache, _) = manager_with_store(config, store.clone());

        let result = cache
            .mset(
                vec![("ok".into(), json!(1)), ("huge".into(), json!("x".repeat(500)))],
                SetOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(result, BatchResult { total: 2, succeeded: 1, failed: 1 });
        assert!(store.contains("ok"));
        assert!(!store.contains("huge"));
    }

    #[tokio::test]
    async fn test_keys_pattern_and_size() {
        let (cache, _) = manager(CacheConfig::default());
        for k in ["user:1", "user:2", "order:1"] {
            cache.set(k, json!(k), SetOptions::default()).await.unwrap();
        }
        assert_eq!(cache.keys(Some("user:*")).unwrap(), vec!["user:1", "user:2"]);
        assert_eq!(cache.keys(Some("*:1")).unwrap(), vec!["order:1", "user:1"]);
        assert_eq!(cache.keys(None).unwrap().len(), 3);
        assert_eq!(cache.size(), 3);
    }

    #[tokio::test]
    async fn test_expire_and_ttl() {
        let (cache, _) = manager(CacheConfig::default());
        cache.set("k", json!(1), SetOptions::never_expire()).await.unwrap();
        assert_eq!(cache.ttl("k").await.unwrap(), TtlStatus::NoExpiry);
        assert_eq!(cache.ttl("nope").await.unwrap(), TtlStatus::Missing);

        assert!(cache.expire("k", Expiry::After(Duration::from_secs(30))).await.unwrap());
        match cache.ttl("k").await.unwrap() {
            TtlStatus::Remaining(left) => assert!(left <= Duration::from_secs(30) && left > Duration::from_secs(25)),
            other => panic!("unexpected {other:?}"),
        }

        assert!(cache.expire("k", Expiry::Never).await.unwrap());
        assert_eq!(cache.ttl("k").await.unwrap(), TtlStatus::NoExpiry);
        assert!(!cache.expire("nope", Expiry::Never).await.unwrap());
        assert_consistent(&cache);
    }

    #[tokio::test]
    async fn test_expire_rewrites_store_copy() {
        let store = Arc::new(InMemoryStore::new());
        let (cache, _) = manager_with_store(CacheConfig::default(), store.clone());
        cache.set("k", json!(1), SetOptions::never_expire()).await.unwrap();
        cache.expire("k", Expiry::After(Duration::from_secs(5))).await.unwrap();

        let stored = store.get_sync("k").unwrap();
        assert!(stored.metadata.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_tags_find_and_invalidate() {
        let (cache, observer) = manager(CacheConfig::default());
        cache.set("a", json!(1), SetOptions::default().with_tags(["red", "big"])).await.unwrap();
        cache.set("b", json!(2), SetOptions::default().with_tags(["red"])).await.unwrap();
        cache.set("c", json!(3), SetOptions::default().with_tags(["blue"])).await.unwrap();
        cache.set("d", json!(4), SetOptions::default()).await.unwrap();

        assert_eq!(cache.find_by_tags(&tags(&["red"])).await.unwrap(), vec!["a", "b"]);
        assert_eq!(cache.find_by_tags(&tags(&["big", "blue"])).await.unwrap(), vec!["a", "c"]);

        let results = cache.invalidate_by_tags(&tags(&["red"])).await.unwrap();
        assert_eq!(results, vec![("a".to_string(), true), ("b".to_string(), true)]);
        assert!(cache.find_by_tags(&tags(&["red"])).await.unwrap().is_empty());
        assert!(cache.has("c").await.unwrap());
        assert!(cache.has("d").await.unwrap());
        assert_eq!(observer.count(|e| matches!(e, CacheEvent::Deleted { .. })), 2);
        assert_consistent(&cache);
    }

    #[tokio::test]
    async fn test_cleanup_sweeps_expired() {
        let (cache, observer) = manager(CacheConfig::default());
        cache.set("short", json!(1), SetOptions::ttl(Duration::from_millis(10))).await.unwrap();
        cache.set("long", json!(1), SetOptions::ttl(Duration::from_secs(60))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.cleanup().await.unwrap(), 1);
        assert_eq!(cache.cleanup().await.unwrap(), 0);
        assert_eq!(cache.size(), 1);
        assert_eq!(observer.count(|e| matches!(e, CacheEvent::Expired { .. })), 1);
        assert_consistent(&cache);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let (cache, _) = manager_with_store(CacheConfig::default(), store.clone());
        cache.set("a", json!(1), SetOptions::default()).await.unwrap();
        cache.set("b", json!(2), SetOptions::default()).await.unwrap();

        assert_eq!(cache.clear().await.unwrap(), 2);
        assert_eq!(cache.clear().await.unwrap(), 0);
        assert_eq!(cache.size(), 0);
        assert_eq!(store.count(), 0);
        assert_consistent(&cache);
    }

    #[tokio::test]
    async fn test_statistics_and_info() {
        let (cache, _) = manager(CacheConfig::default());
        cache.set("a", json!(1), SetOptions::default()).await.unwrap();
        cache.get("a").await.unwrap();
        cache.get("a").await.unwrap();
        cache.get("b").await.unwrap();

        let stats = cache.statistics();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.size, 1);
        assert!(stats.memory_bytes > 0);
        assert!(stats.peak_memory_bytes >= stats.memory_bytes);
        assert!(stats.avg_latency.is_some());
        assert!(stats.tiers.is_none());

        let info = cache.info();
        assert_eq!(info.partitions, 1);
        assert_eq!(info.store, None);
        assert_eq!(info.size, 1);
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct User {
            id: u32,
            name: String,
        }
        let (cache, _) = manager(CacheConfig::default());
        let user = User { id: 7, name: "Ada".into() };
        cache.set_as("u", &user, SetOptions::default()).await.unwrap();
        assert_eq!(cache.get_as::<User>("u").await.unwrap(), Some(user));
        assert!(cache.get_as::<User>("none").await.unwrap().is_none());

        cache.set("n", json!(5), SetOptions::default()).await.unwrap();
        assert!(matches!(cache.get_as::<User>("n").await, Err(CacheError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_nothing_to_invalidate() {
        let (cache, _) = manager_with_store(CacheConfig::default(), Arc::new(BrokenStore));
        assert!(cache.set("a", json!(1), SetOptions::default().with_tags(["t"])).await.is_err());
        assert!(cache.invalidate_by_tags(&tags(&["t"])).await.unwrap().is_empty());
    }
}
