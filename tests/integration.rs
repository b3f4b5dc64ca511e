// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration Tests for Cache Engine
//!
//! Backends exercised for real: Redis through testcontainers (no external
//! docker-compose required), and the file store plus snapshots on a temp
//! directory.
//!
//! # Running Tests
//! ```bash
//! # File and snapshot tests only
//! cargo test --test integration
//!
//! # Everything, including the Redis tests (requires Docker)
//! cargo test --test integration -- --include-ignored
//!
//! # Only failure scenario tests
//! cargo test --test integration failure -- --include-ignored
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: lifecycle, write-through, read-through, tiers
//! - `failure_*` - Failure scenarios: unreachable or dying Redis

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use cache_engine::storage::codec::EnvelopeCodec;
use cache_engine::storage::redis::RedisStore;
use cache_engine::{
    CacheConfig, CacheError, CacheEvent, CacheManager, CacheState, CacheStore, RecordingObserver, SetOptions,
    SnapshotFormat, StoreKind, Tier,
};

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

// =============================================================================
// Container Helpers
// =============================================================================

/// Create a Redis container with health check
fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

fn redis_url(container: &Container<'_, GenericImage>) -> String {
    format!("redis://127.0.0.1:{}", container.get_host_port_ipv4(6379))
}

fn remote_config(url: String, prefix: &str) -> CacheConfig {
    let mut config = CacheConfig::default();
    config.storage.kind = StoreKind::Remote;
    config.storage.redis_url = Some(url);
    config.storage.key_prefix = prefix.to_string();
    config
}

async fn observed(config: CacheConfig) -> (Arc<CacheManager>, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::default());
    let cache = CacheManager::with_observer(config, observer.clone())
        .await
        .expect("Failed to open cache");
    (Arc::new(cache), observer)
}

// =============================================================================
// Happy Path Tests - Redis
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_remote_lifecycle_and_read_through() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);

    let (writer, _) = observed(remote_config(url.clone(), "it:")).await;
    writer.start().await.expect("Failed to start");
    assert_eq!(writer.state(), CacheState::Running);

    writer.set("user:1", json!({"name": "ada"}), SetOptions::default().with_tags(["user"])).await.unwrap();
    writer.set("user:2", json!({"name": "bob"}), SetOptions::ttl(Duration::from_secs(60))).await.unwrap();
    writer.shutdown().await.unwrap();
    assert_eq!(writer.state(), CacheState::Stopped);

    // A fresh cache over the same prefix starts empty and reads through
    let (reader, observer) = observed(remote_config(url, "it:")).await;
    assert_eq!(reader.size(), 0);
    assert_eq!(reader.get("user:1").await.unwrap(), Some(json!({"name": "ada"})));
    assert_eq!(observer.count(|e| matches!(e, CacheEvent::Hit { tier: Tier::L2, .. })), 1);

    // Second read is served by the table
    reader.get("user:1").await.unwrap();
    assert_eq!(observer.count(|e| matches!(e, CacheEvent::Hit { tier: Tier::Table, .. })), 1);

    // Tags travel with the stored envelope
    assert_eq!(reader.find_by_tags(&["user".to_string()]).await.unwrap(), vec!["user:1"]);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_prefixes_isolate_caches() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);

    let (a, _) = observed(remote_config(url.clone(), "a:")).await;
    let (b, _) = observed(remote_config(url.clone(), "b:")).await;

    a.mset(vec![("k1".into(), json!(1)), ("k2".into(), json!(2))], SetOptions::default()).await.unwrap();
    b.set("k1", json!("other"), SetOptions::default()).await.unwrap();

    assert_eq!(a.clear().await.unwrap(), 2);
    assert_eq!(b.get("k1").await.unwrap(), Some(json!("other")));

    let raw = RedisStore::with_prefix(&url, Some("b:"), EnvelopeCodec::plain()).await.unwrap();
    assert_eq!(raw.keys().await.unwrap(), vec!["k1"]);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_redis_expires_entries_on_its_own() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);

    let (cache, _) = observed(remote_config(url.clone(), "ttl:")).await;
    cache.set("short", json!(1), SetOptions::ttl(Duration::from_millis(200))).await.unwrap();

    let raw = RedisStore::with_prefix(&url, Some("ttl:"), EnvelopeCodec::plain()).await.unwrap();
    assert!(raw.exists("short").await.unwrap());
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!raw.exists("short").await.unwrap());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn happy_hybrid_promotes_hot_keys_from_redis() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);

    // Seed L2 directly so the hybrid only finds it there
    let raw = RedisStore::with_prefix(&url, Some("hy:"), EnvelopeCodec::plain()).await.unwrap();
    let value = json!("hot");
    let meta = cache_engine::EntryMetadata::new("hot", &value, None).unwrap();
    raw.put("hot", &cache_engine::Envelope::new(value, meta)).await.unwrap();

    let mut config = remote_config(url, "hy:");
    config.storage.kind = StoreKind::Hybrid;
    config.storage.promote_threshold = 3;
    // A one-slot table keeps evicting, so reads keep reaching the store
    config.storage.max_items = 1;
    let (cache, observer) = observed(config).await;

    for i in 0..3 {
        assert_eq!(cache.get("hot").await.unwrap(), Some(json!("hot")));
        cache.set(&format!("filler{i}"), json!(i), SetOptions::default()).await.unwrap();
    }

    let tiers = cache.statistics().tiers.expect("hybrid tier stats");
    assert_eq!(tiers.promotions, 1);
    assert_eq!(observer.count(|e| matches!(e, CacheEvent::Promoted { key } if key == "hot")), 1);
}

// =============================================================================
// Failure Scenario Tests - Redis
// =============================================================================

#[tokio::test]
#[ignore] // Slow: waits out the startup retry schedule
async fn failure_redis_unavailable_at_startup() {
    let config = remote_config("redis://127.0.0.1:1".into(), "none:");

    // Use a timeout because connection to a dead port can hang
    let result = tokio::time::timeout(Duration::from_secs(60), CacheManager::new(config)).await;
    match result {
        Ok(Err(CacheError::Storage(_))) => {}
        Ok(Ok(_)) => panic!("cache opened against a dead Redis"),
        Ok(Err(other)) => panic!("unexpected error: {other}"),
        Err(_) => {} // Timed out connecting; also a refusal to start
    }
}

#[tokio::test]
#[ignore] // Requires Docker
async fn failure_redis_dies_mid_operation() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);

    let (cache, observer) = observed(remote_config(url, "dies:")).await;
    cache.set("before", json!(1), SetOptions::default()).await.unwrap();

    drop(redis);
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Writes fail loudly and leave the table untouched
    let err = cache.set("after", json!(2), SetOptions::default()).await.unwrap_err();
    assert!(matches!(err, CacheError::Storage(_)));
    assert!(!cache.keys(None).unwrap().contains(&"after".to_string()));

    // Reads of resident entries keep working; cold misses degrade to a miss
    assert_eq!(cache.get("before").await.unwrap(), Some(json!(1)));
    assert_eq!(cache.get("cold").await.unwrap(), None);
    assert!(cache.statistics().errors >= 2);
    assert!(observer.count(|e| matches!(e, CacheEvent::Error { .. })) >= 2);
}

// =============================================================================
// Happy Path Tests - File store and snapshots (no Docker)
// =============================================================================

#[tokio::test]
async fn happy_file_store_with_snapshot_lifecycle() {
    let data = tempfile::tempdir().unwrap();
    let snapshots = tempfile::tempdir().unwrap();

    let config = || {
        let mut config = CacheConfig::default();
        config.storage.kind = StoreKind::File;
        config.storage.path = Some(data.path().join("store"));
        config.storage.compression = true;
        config.persistence.enabled = true;
        config.persistence.path = Some(snapshots.path().join("cache.ndjson"));
        config.persistence.format = SnapshotFormat::Ndjson;
        config.persistence.compression = true;
        config
    };

    let (first, _) = observed(config()).await;
    first.start().await.unwrap();
    for i in 0..50 {
        first.set(&format!("item:{i}"), json!({"n": i}), SetOptions::default()).await.unwrap();
    }
    first.delete("item:0").await.unwrap();
    first.shutdown().await.unwrap();

    // The snapshot refills the table before any read reaches the store
    let (second, observer) = observed(config()).await;
    second.start().await.unwrap();
    assert_eq!(second.size(), 49);
    assert_eq!(second.get("item:7").await.unwrap(), Some(json!({"n": 7})));
    assert_eq!(observer.count(|e| matches!(e, CacheEvent::Hit { tier: Tier::Table, .. })), 1);
    assert_eq!(second.get("item:0").await.unwrap(), None);
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn happy_encrypted_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = CacheConfig::default();
    config.storage.kind = StoreKind::File;
    config.storage.path = Some(dir.path().to_path_buf());
    config.storage.encryption_key = Some("11".repeat(32));

    let (cache, _) = observed(config.clone()).await;
    cache.set("secret", json!("plaintext-marker"), SetOptions::default()).await.unwrap();

    // Nothing on disk carries the value in the clear
    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let path = entry.unwrap().path();
        if !path.is_file() {
            continue;
        }
        let bytes = std::fs::read(path).unwrap();
        assert!(!String::from_utf8_lossy(&bytes).contains("plaintext-marker"));
    }

    // A second cache with the same key reads it back
    let (reader, _) = observed(config).await;
    assert_eq!(reader.get("secret").await.unwrap(), Some(json!("plaintext-marker")));
}
