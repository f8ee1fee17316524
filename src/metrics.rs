// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for tiered-cache.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `tiered_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for size counters
//!
//! # Labels
//! - `tier`: L1, L2
//! - `operation`: get, set, delete, exists
//! - `status`: hit, miss, success, error, rejected

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::compression::CompressionStats;

/// Record a cache operation outcome
pub fn record_operation(tier: &str, operation: &str, status: &str) {
    counter!(
        "tiered_cache_operations_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(tier: &str, operation: &str, duration: Duration) {
    histogram!(
        "tiered_cache_operation_seconds",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Set current L1 entry count
pub fn set_l1_entries(count: usize) {
    gauge!("tiered_cache_l1_entries").set(count as f64);
}

/// Record LRU evictions from L1
pub fn record_eviction(count: usize) {
    counter!("tiered_cache_evictions_total").increment(count as u64);
}

/// Record TTL expirations removed from L1
pub fn record_expiration(count: usize) {
    counter!("tiered_cache_expirations_total").increment(count as u64);
}

/// Record circuit breaker state change (0 = closed, 1 = half-open, 2 = open)
pub fn set_circuit_state(circuit: &str, state: u8) {
    gauge!(
        "tiered_cache_circuit_breaker_state",
        "circuit" => circuit.to_string()
    )
    .set(state as f64);
}

/// Record circuit breaker call
pub fn record_circuit_call(circuit: &str, outcome: &str) {
    counter!(
        "tiered_cache_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a compression pass
pub fn record_compression(stats: &CompressionStats) {
    counter!("tiered_cache_compressed_original_bytes_total").increment(stats.original_bytes as u64);
    counter!("tiered_cache_compressed_stored_bytes_total").increment(stats.compressed_bytes as u64);
    histogram!("tiered_cache_compression_ratio").record(stats.ratio);
}

/// Record a codec failure (value treated as a miss)
pub fn record_codec_error(operation: &str) {
    counter!(
        "tiered_cache_codec_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a timeout
pub fn record_timeout(tier: &str, operation: &str) {
    counter!(
        "tiered_cache_timeouts_total",
        "tier" => tier.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a remote connection attempt (`success`, `auth_failed`, `tls_failed`, `timeout`, `error`)
pub fn record_connection_attempt(outcome: &str) {
    counter!(
        "tiered_cache_connection_attempts_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set the most recent security assessment score (0-100)
pub fn set_security_score(score: u8) {
    gauge!("tiered_cache_security_score").set(score as f64);
}

/// Set whether the remote tier is connected
pub fn set_remote_connected(connected: bool) {
    gauge!("tiered_cache_remote_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record bytes written to a tier
pub fn record_bytes_written(tier: &str, bytes: usize) {
    counter!(
        "tiered_cache_bytes_written_total",
        "tier" => tier.to_string()
    )
    .increment(bytes as u64);
}

/// Record bytes read from a tier
pub fn record_bytes_read(tier: &str, bytes: usize) {
    counter!(
        "tiered_cache_bytes_read_total",
        "tier" => tier.to_string()
    )
    .increment(bytes as u64);
}

/// A timer guard that records operation latency when dropped.
pub struct LatencyTimer {
    tier: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(tier: &'static str, operation: &'static str) -> Self {
        Self {
            tier,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.tier, self.operation, self.start.elapsed());
    }
}
