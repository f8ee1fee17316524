// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic tiered-cache usage example.
//!
//! Demonstrates:
//! 1. Starting the cache against Redis (or running L1-only if it is down)
//! 2. Writing small and large values (the large one is compressed remotely)
//! 3. Reading back through L1 and through the remote tier
//! 4. Caching an operation result with `ResponseCache`
//! 5. Printing the security report and captured metrics
//! 6. Clean disconnect
//!
//! # Run
//!
//! ```bash
//! docker run --rm -p 6379:6379 redis:7-alpine
//! REDIS_URL=redis://localhost:6379 cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use tiered_cache::{CacheConfig, ResponseCache, TieredCache};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║            tiered-cache: Basic Usage Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start
    // ─────────────────────────────────────────────────────────────────────────
    let config = CacheConfig {
        redis_url: Some(std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into())),
        auth_password: std::env::var("REDIS_PASSWORD").ok(),
        key_prefix: "demo:".into(),
        max_retries: 2,
        connection_timeout_ms: 1_000,
        ..Default::default()
    };
    let cache = Arc::new(TieredCache::start(config).await?);
    println!("📦 Cache started in {} mode", cache.mode());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Write
    // ─────────────────────────────────────────────────────────────────────────
    let ttl = Duration::from_secs(300);
    let article = "Lorem ipsum dolor sit amet. ".repeat(200).into_bytes();
    cache.set("greeting", b"hello, world".to_vec(), ttl).await?;
    if let Err(e) = cache.set("article", article.clone(), ttl).await {
        // Non-fatal: the value is still in L1
        println!("⚠️  {}", e);
    }
    println!("✍️  Wrote greeting (12 bytes) and article ({} bytes)", article.len());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Read
    // ─────────────────────────────────────────────────────────────────────────
    if let Some(value) = cache.get("greeting").await? {
        println!("🔎 greeting (L1) = {}", String::from_utf8_lossy(&value));
    }
    cache.l1().clear();
    match cache.get("article").await? {
        Some(value) => println!("🔎 article via remote tier: {} bytes, intact = {}", value.len(), value == article),
        None => println!("🔎 article not found (L1 cleared, remote tier unavailable)"),
    }
    println!("❓ exists(greeting) = {}", cache.exists("greeting").await?);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Response cache
    // ─────────────────────────────────────────────────────────────────────────
    let responses = ResponseCache::new(Arc::clone(&cache));
    let params = [("text", "The quick brown fox jumps over the lazy dog"), ("max_words", "4")];
    for attempt in 1..=2 {
        let summary: String = responses
            .cached_json("summarize", &params, || async {
                println!("   └─ computing summary (attempt {})", attempt);
                Ok::<_, tiered_cache::CacheError>("Quick fox, lazy dog".to_string())
            })
            .await?;
        println!("📝 summary #{} = {}", attempt, summary);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Security and metrics
    // ─────────────────────────────────────────────────────────────────────────
    match cache.validate_security() {
        Some(result) => println!("\n{}", cache.generate_security_report(&result)),
        None => println!("\n🔒 No remote connection, nothing to assess"),
    }
    let stats = cache.stats();
    println!(
        "📊 L1 {}/{} entries, hit rate {:.0}%, circuit {}, remote hits {}",
        stats.l1.entries,
        stats.l1.capacity,
        stats.l1.hit_rate() * 100.0,
        stats.circuit.state,
        stats.remote_hits
    );
    println!("\n📈 Captured metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Disconnect
    // ─────────────────────────────────────────────────────────────────────────
    cache.disconnect().await?;
    println!("\n👋 Disconnected, now in {} mode", cache.mode());

    Ok(())
}

/// Print every captured metric, sorted by name.
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<(String, String)> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let name = if labels.is_empty() {
                key.name().to_string()
            } else {
                format!("{}{{{}}}", key.name(), labels.join(","))
            };
            let rendered = match value {
                DebugValue::Counter(v) => v.to_string(),
                DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
                DebugValue::Histogram(samples) => {
                    let count = samples.len();
                    let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                    format!("count={} sum={:.4}", count, sum)
                }
            };
            (name, rendered)
        })
        .collect();
    lines.sort();

    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
    for (name, value) in lines {
        println!("   └─ {} = {}", name, value);
    }
}
