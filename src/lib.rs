// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Tiered Cache
//!
//! A two-tier cache: a bounded in-process LRU in front of a secured,
//! Redis-compatible remote store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TieredCache                          │
//! │  • get / set / delete / exists                             │
//! │  • Degrades to L1-only when the remote tier is unavailable │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    L1: LocalTierCache                       │
//! │  • LRU eviction, per-entry TTL                             │
//! │  • Never touches the network                               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                     (L1 miss / every write)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │           Circuit breaker + per-operation timeout           │
//! │  • Fails fast while the remote tier is unhealthy           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   L2: Remote store (Redis)                  │
//! │  • Connection owned by the SecurityManager (AUTH/ACL/TLS)  │
//! │  • zstd-compressed values above a size threshold           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tiered_cache::{CacheConfig, TieredCache};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tiered_cache::CacheError> {
//!     let config = CacheConfig {
//!         redis_url: Some("rediss://cache.internal:6380".into()),
//!         acl_username: Some("cache-svc".into()),
//!         acl_password: std::env::var("CACHE_ACL_PASSWORD").ok(),
//!         tls_enabled: true,
//!         ..Default::default()
//!     };
//!
//!     let cache = TieredCache::start(config).await?;
//!     cache.set("greeting", b"hello".to_vec(), Duration::from_secs(60)).await?;
//!
//!     if let Some(value) = cache.get("greeting").await? {
//!         println!("{}", String::from_utf8_lossy(&value));
//!     }
//!
//!     let status = cache.security_status();
//!     println!("connection: {}, last score: {:?}", status.state, status.last_score);
//!
//!     cache.disconnect().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`cache`]: The [`TieredCache`] orchestrator and [`ResponseCache`]
//! - [`security`]: [`SecurityManager`], connection retry and security scoring
//! - [`storage`]: L1, the remote-store seam, Redis and in-memory backends
//! - [`resilience`]: Circuit breaker and retry with backoff
//! - [`key`]: Deterministic cache keys
//! - [`compression`]: zstd codec for remote entries

pub mod cache;
pub mod compression;
pub mod config;
pub mod entry;
pub mod key;
pub mod metrics;
pub mod resilience;
pub mod security;
pub mod storage;

pub use cache::response::ResponseCache;
pub use cache::{CacheError, CacheMode, CacheStats, TieredCache};
pub use compression::{Codec, CompressionError};
pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use key::{KeyError, KeyGenerator};
pub use metrics::LatencyTimer;
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, CircuitSnapshot, CircuitState};
pub use resilience::retry::RetryConfig;
pub use security::config::{SecurityConfig, TlsVerifyMode};
pub use security::error::SecurityError;
pub use security::types::{
    AuthMethod, ConnectionState, SecurityLevel, SecurityValidationResult, Severity, StatusSnapshot,
    Vulnerability, VulnerabilityKind,
};
pub use security::report::SecurityReport;
pub use security::{SecureConnection, SecurityManager};
pub use storage::local::{FillGuard, L1Stats, LocalTierCache, Lookup};
pub use storage::memory::{InMemoryConnector, MemoryServer};
pub use storage::redis::RedisConnector;
pub use storage::traits::{Connector, RemoteStore, StorageError};
