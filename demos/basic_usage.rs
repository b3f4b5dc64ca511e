// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic cache-engine usage example.
//!
//! Demonstrates:
//! 1. Configuring a bounded LRU cache backed by a file store
//! 2. Writing 5 JSON entries with TTLs and tags
//! 3. Checking existence and remaining TTLs
//! 4. Fetching entries back (table hits vs. read-through)
//! 5. Tag invalidation and eviction under pressure
//! 6. Displaying statistics and raw metrics
//! 7. Clean shutdown with a final snapshot
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use cache_engine::{CacheConfig, CacheManager, EvictionPolicy, SetOptions, SnapshotFormat, StoreKind, TtlStatus};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install metrics recorder (captures everything the cache emits)
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt().with_target(false).compact().init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           cache-engine: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the cache
    // ─────────────────────────────────────────────────────────────────────────
    let workdir = std::env::temp_dir().join(format!("cache-engine-demo-{}", std::process::id()));
    println!("📦 Configuring cache-engine in {}", workdir.display());

    let mut config = CacheConfig::default();
    config.storage.kind = StoreKind::File;
    config.storage.path = Some(workdir.join("store"));
    config.storage.max_items = 8;
    config.eviction.policy = EvictionPolicy::Lru;
    config.persistence.enabled = true;
    config.persistence.path = Some(workdir.join("snapshot.ndjson"));
    config.persistence.format = SnapshotFormat::Ndjson;

    let cache = Arc::new(CacheManager::new(config).await?);
    println!("   State: {}", cache.state());
    cache.start().await?;
    println!("   ✅ Cache running! State: {}", cache.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Write 5 entries (with timing)
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Writing 5 sample entries...");
    let entries = vec![
        ("user:alice", json!({"name": "Alice", "role": "admin"}), "user"),
        ("user:bob", json!({"name": "Bob", "role": "user"}), "user"),
        ("user:carol", json!({"name": "Carol", "role": "user"}), "user"),
        ("config:app", json!({"theme": "dark", "version": "2.0"}), "config"),
        ("stats:daily", json!({"requests": 42000, "latency_p99": 12}), "stats"),
    ];

    for (key, value, tag) in &entries {
        let start = Instant::now();
        cache
            .set(key, value.clone(), SetOptions::ttl(Duration::from_secs(300)).with_tags([*tag]))
            .await?;
        println!("   └─ {key} → {value} ({:?})", start.elapsed());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Existence and TTLs
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔍 Checking existence...");
    println!("   └─ has('user:alice'): {}", cache.has("user:alice").await?);
    println!("   └─ has('user:nobody'): {}", cache.has("user:nobody").await?);
    match cache.ttl("config:app").await? {
        TtlStatus::Remaining(left) => println!("   └─ ttl('config:app'): {left:?}"),
        other => println!("   └─ ttl('config:app'): {other:?}"),
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Fetch entries back
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📖 Fetching entries back (with timing)...");
    for (key, _, _) in &entries {
        let start = Instant::now();
        let value = cache.get(key).await?;
        println!("   └─ {key} → {value:?} ({:?})", start.elapsed());
    }
    println!("   └─ keys('user:*'): {:?}", cache.keys(Some("user:*"))?);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Tags and eviction
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🏷️  Invalidating tag 'user'...");
    for (key, removed) in cache.invalidate_by_tags(&["user".to_string()]).await? {
        println!("   └─ {key}: removed={removed}");
    }

    println!("\n♻️  Writing 20 more entries into an 8-slot table...");
    for i in 0..20 {
        cache.set(&format!("burst:{i}"), json!(i), SetOptions::default()).await?;
    }
    println!("   └─ Table size: {}", cache.size());
    // Evicted entries stay in the file store and come back on demand
    println!("   └─ get('burst:0') via read-through: {:?}", cache.get("burst:0").await?);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Statistics and metrics
    // ─────────────────────────────────────────────────────────────────────────
    let stats = cache.statistics();
    println!("\n📊 Cache Statistics:");
    println!("   ┌─ Hits / misses: {} / {} ({:.1}% hit rate)", stats.hits, stats.misses, stats.hit_rate * 100.0);
    println!("   ├─ Sets / deletes: {} / {}", stats.sets, stats.deletes);
    println!("   ├─ Evictions / expirations: {} / {}", stats.evictions, stats.expirations);
    println!("   ├─ Size: {} entries, {} bytes (peak {})", stats.size, stats.memory_bytes, stats.peak_memory_bytes);
    println!("   └─ Avg latency: {:?}", stats.avg_latency);

    let report = cache.tick().await;
    println!("\n🧹 Manual maintenance pass: {report:?}");

    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 7. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    cache.shutdown().await?;
    println!("   ✅ Shutdown complete! State: {}", cache.state());

    if let Err(e) = std::fs::remove_dir_all(&workdir) {
        println!("   └─ Warning: could not remove {}: {e}", workdir.display());
    }

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");
    Ok(())
}

/// Print every captured metric, grouped by kind
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = Vec::new();
    let mut gauges = Vec::new();
    let mut histograms = Vec::new();

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() {
            String::new()
        } else {
            format!("{{{}}}", labels.join(","))
        };
        let name = format!("{}{}", key.name(), label_str);

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                let avg = if count > 0 { sum / count as f64 } else { 0.0 };
                histograms.push((name, count, avg));
            }
        }
    }
    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    println!("   ┌─ Counters (cumulative)");
    for (name, value) in &counters {
        println!("   │  └─ {name} = {value}");
    }
    println!("   ├─ Gauges (current value)");
    for (name, value) in &gauges {
        println!("   │  └─ {name} = {value:.2}");
    }
    println!("   └─ Histograms (count, avg)");
    for (name, count, avg) in &histograms {
        println!("      └─ {name} = {count} samples, avg {avg:.6}");
    }
}
