// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tiered cache orchestrator.
//!
//! The [`TieredCache`] ties together:
//! - L1: bounded in-process LRU with per-entry TTL
//! - L2: remote store reached only through the [`SecurityManager`]
//! - A circuit breaker around every remote call
//! - zstd compression for large values crossing into L2
//!
//! Reads check L1 first and fall back to L2, refilling L1 on a remote hit.
//! Writes always land in L1; the remote write is best-effort. When the
//! remote tier is down, the circuit is open, or the cache was disconnected,
//! every operation quietly runs against L1 alone.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tiered_cache::{CacheConfig, TieredCache};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CacheConfig::from_file("cache.toml")?;
//! let cache = TieredCache::start(config).await?;
//!
//! cache.set("user:42", b"profile".to_vec(), Duration::from_secs(60)).await?;
//! assert_eq!(cache.get("user:42").await?, Some(b"profile".to_vec()));
//!
//! cache.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod types;
mod api;
mod lifecycle;
pub mod response;

pub use types::{CacheError, CacheMode, CacheStats};

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::compression::Codec;
use crate::config::CacheConfig;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitError};
use crate::security::types::{SecurityValidationResult, StatusSnapshot};
use crate::security::SecurityManager;
use crate::storage::local::LocalTierCache;
use crate::storage::traits::{RemoteStore, StorageError};

/// Why a remote call produced no result.
#[derive(Debug)]
pub(crate) enum RemoteFailure {
    /// No live connection
    Offline,
    /// Circuit breaker rejected the call
    CircuitOpen,
    Error(StorageError),
}

impl std::fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offline => write!(f, "remote tier offline"),
            Self::CircuitOpen => write!(f, "circuit open"),
            Self::Error(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Default)]
pub(crate) struct RemoteCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) errors: AtomicU64,
    pub(crate) codec_errors: AtomicU64,
}

/// Two-tier cache. Construct once and share behind an `Arc`.
///
/// # Thread Safety
///
/// `Send + Sync`. There is no cache-wide lock: L1 and the circuit breaker
/// each guard their own state, and the remote connection is shared.
pub struct TieredCache {
    pub(super) config: CacheConfig,
    pub(super) l1: Arc<LocalTierCache>,
    pub(super) security: Arc<SecurityManager>,
    pub(super) circuit: CircuitBreaker,
    pub(super) codec: Codec,
    pub(super) operation_timeout: Duration,
    /// L1 expiry sweep (absent when disabled or disconnected)
    pub(super) sweeper: Mutex<Option<JoinHandle<()>>>,
    pub(super) counters: RemoteCounters,
}

impl TieredCache {
    /// Build the cache around an existing manager. Starts in
    /// [`CacheMode::LocalOnly`] unless `security` already holds a live
    /// connection; call [`connect`](Self::connect) to attach the remote tier.
    pub fn new(config: CacheConfig, security: Arc<SecurityManager>) -> Result<Self, CacheError> {
        config.validate()?;

        let cache = Self {
            l1: Arc::new(LocalTierCache::new(config.l1_max_entries, config.l1_default_ttl())),
            circuit: CircuitBreaker::new("remote", config.circuit_config()),
            codec: config.codec(),
            operation_timeout: config.operation_timeout(),
            sweeper: Mutex::new(None),
            counters: RemoteCounters::default(),
            security,
            config,
        };
        cache.spawn_sweeper();
        Ok(cache)
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[must_use]
    pub fn mode(&self) -> CacheMode {
        if self.security.connection().is_some() {
            CacheMode::Tiered
        } else {
            CacheMode::LocalOnly
        }
    }

    /// The L1 tier (for inspection and manual sweeps).
    #[must_use]
    pub fn l1(&self) -> &LocalTierCache {
        &self.l1
    }

    #[must_use]
    pub fn security(&self) -> &Arc<SecurityManager> {
        &self.security
    }

    #[must_use]
    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            mode: self.mode(),
            l1: self.l1.stats(),
            circuit: self.circuit.snapshot(),
            connection: self.security.state(),
            remote_hits: self.counters.hits.load(Ordering::Relaxed),
            remote_misses: self.counters.misses.load(Ordering::Relaxed),
            remote_errors: self.counters.errors.load(Ordering::Relaxed),
            codec_errors: self.counters.codec_errors.load(Ordering::Relaxed),
        }
    }

    /// Last-known connection security state.
    #[must_use]
    pub fn security_status(&self) -> StatusSnapshot {
        self.security.security_status()
    }

    /// Assess the live connection, if there is one.
    pub fn validate_security(&self) -> Option<SecurityValidationResult> {
        self.security
            .connection()
            .map(|conn| self.security.validate_connection_security(&conn))
    }

    #[must_use]
    pub fn generate_security_report(&self, result: &SecurityValidationResult) -> String {
        self.security.generate_security_report(result)
    }

    /// Dry-run the configured security settings against `address` without
    /// touching the live connection.
    pub async fn test_security_configuration(&self, address: &str) -> (bool, String) {
        self.security.test_security_configuration(address).await
    }

    /// Key as stored in the remote tier.
    pub(super) fn remote_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Run `f` against the live connection, through the circuit breaker and
    /// bounded by the operation timeout. Timeouts count as circuit failures.
    pub(super) async fn remote_call<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, RemoteFailure>
    where
        F: FnOnce(Arc<dyn RemoteStore>) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let Some(conn) = self.security.connection() else {
            return Err(RemoteFailure::Offline);
        };
        let store = Arc::clone(conn.store());
        let timeout = self.operation_timeout;
        let _timer = crate::metrics::LatencyTimer::new("remote", op);

        let result = self
            .circuit
            .call(|| async move {
                match tokio::time::timeout(timeout, f(store)).await {
                    Ok(result) => result,
                    Err(_) => {
                        crate::metrics::record_timeout("remote", op);
                        Err(StorageError::Timeout { operation: op, after: timeout })
                    }
                }
            })
            .await;

        match result {
            Ok(value) => {
                crate::metrics::record_operation("remote", op, "success");
                Ok(value)
            }
            Err(CircuitError::Rejected) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_operation("remote", op, "rejected");
                debug!(op, "Remote call skipped, circuit open");
                Err(RemoteFailure::CircuitOpen)
            }
            Err(CircuitError::Inner(e)) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_operation("remote", op, "error");
                Err(RemoteFailure::Error(e))
            }
        }
    }
}

impl Drop for TieredCache {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("mode", &self.mode())
            .field("l1", &self.l1)
            .field("circuit", &self.circuit)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}
