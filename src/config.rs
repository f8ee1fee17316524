// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the tiered cache.
//!
//! # Example
//!
//! ```
//! use tiered_cache::CacheConfig;
//!
//! // Minimal config (uses defaults, L1 only)
//! let config = CacheConfig::default();
//! assert_eq!(config.l1_max_entries, 10_000);
//! assert_eq!(config.compression_threshold, 1024);
//!
//! // From TOML
//! let config = CacheConfig::from_toml_str(r#"
//!     redis_url = "rediss://cache.internal:6380"
//!     acl_username = "cache-svc"
//!     acl_password = "change-me"
//!     tls_enabled = true
//!     compression_level = 6
//! "#).unwrap();
//! assert_eq!(config.compression_level, 6);
//! assert_eq!(config.max_retries, 3);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::types::CacheError;
use crate::compression::Codec;
use crate::resilience::circuit_breaker::CircuitConfig;
use crate::resilience::retry::RetryConfig;
use crate::security::config::{SecurityConfig, TlsVerifyMode};

/// Configuration for the tiered cache.
///
/// All fields have sensible defaults. Without `redis_url` the cache runs
/// L1-only. `Debug` output never contains password values.
#[derive(Clone, Deserialize)]
pub struct CacheConfig {
    /// Remote store address (e.g., "redis://localhost:6379"). Keep
    /// credentials in the fields below, not in the URL.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Password-only AUTH
    #[serde(default)]
    pub auth_password: Option<String>,

    /// ACL identity (takes precedence over `auth_password`)
    #[serde(default)]
    pub acl_username: Option<String>,
    #[serde(default)]
    pub acl_password: Option<String>,

    #[serde(default)]
    pub tls_enabled: bool,
    /// Client certificate for mutual TLS (requires `tls_key_path`)
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub tls_key_path: Option<PathBuf>,
    /// CA bundle (system roots when unset)
    #[serde(default)]
    pub tls_ca_path: Option<PathBuf>,
    /// `none`, `peer` or `peer_and_host` (default)
    #[serde(default)]
    pub tls_verify_mode: TlsVerifyMode,

    /// Bound on each connection attempt, handshake and AUTH included (default: 5s)
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Total connection attempts (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay, doubled per attempt (default: 100ms)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Backoff cap (default: 5s)
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Bound on each remote read/write once connected (default: 2s)
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// L1 capacity in entries (default: 10,000)
    #[serde(default = "default_l1_max_entries")]
    pub l1_max_entries: usize,
    /// TTL used when a caller gives none (default: 300s)
    #[serde(default = "default_l1_default_ttl_secs")]
    pub l1_default_ttl_secs: u64,
    /// Background expiry sweep interval (0 = lazy expiry only, default: 60s)
    #[serde(default = "default_l1_sweep_interval_secs")]
    pub l1_sweep_interval_secs: u64,

    /// Values at least this large are compressed on the way to the remote tier (default: 1 KB)
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,
    /// zstd level 1-22 (default: 3)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Consecutive remote failures that open the circuit (default: 5)
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,
    /// How long the circuit stays open (default: 30s)
    #[serde(default = "default_circuit_recovery_timeout_ms")]
    pub circuit_recovery_timeout_ms: u64,
    /// Failures older than this stop counting (default: 60s)
    #[serde(default = "default_circuit_failure_window_ms")]
    pub circuit_failure_window_ms: u64,

    /// Namespace prepended to every remote key (e.g., "myapp:")
    #[serde(default)]
    pub key_prefix: String,
    /// Canonical key text longer than this is hashed (default: 1000)
    #[serde(default = "default_key_hash_threshold")]
    pub key_hash_threshold: usize,
}

fn default_connection_timeout_ms() -> u64 { 5_000 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 100 }
fn default_retry_max_delay_ms() -> u64 { 5_000 }
fn default_operation_timeout_ms() -> u64 { 2_000 }
fn default_l1_max_entries() -> usize { 10_000 }
fn default_l1_default_ttl_secs() -> u64 { 300 }
fn default_l1_sweep_interval_secs() -> u64 { 60 }
fn default_compression_threshold() -> usize { crate::compression::DEFAULT_COMPRESSION_THRESHOLD }
fn default_compression_level() -> i32 { crate::compression::DEFAULT_COMPRESSION_LEVEL }
fn default_circuit_failure_threshold() -> u32 { 5 }
fn default_circuit_recovery_timeout_ms() -> u64 { 30_000 }
fn default_circuit_failure_window_ms() -> u64 { 60_000 }
fn default_key_hash_threshold() -> usize { crate::key::DEFAULT_HASH_THRESHOLD }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            auth_password: None,
            acl_username: None,
            acl_password: None,
            tls_enabled: false,
            tls_cert_path: None,
            tls_key_path: None,
            tls_ca_path: None,
            tls_verify_mode: TlsVerifyMode::default(),
            connection_timeout_ms: default_connection_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
            l1_max_entries: default_l1_max_entries(),
            l1_default_ttl_secs: default_l1_default_ttl_secs(),
            l1_sweep_interval_secs: default_l1_sweep_interval_secs(),
            compression_threshold: default_compression_threshold(),
            compression_level: default_compression_level(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_recovery_timeout_ms: default_circuit_recovery_timeout_ms(),
            circuit_failure_window_ms: default_circuit_failure_window_ms(),
            key_prefix: String::new(),
            key_hash_threshold: default_key_hash_threshold(),
        }
    }
}

impl std::fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConfig")
            .field("redis_url", &self.redis_url.as_deref().map(crate::security::config::sanitize_address))
            .field("auth_password", &self.auth_password.as_ref().map(|_| "***"))
            .field("acl_username", &self.acl_username)
            .field("acl_password", &self.acl_password.as_ref().map(|_| "***"))
            .field("tls_enabled", &self.tls_enabled)
            .field("tls_verify_mode", &self.tls_verify_mode)
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("l1_max_entries", &self.l1_max_entries)
            .field("l1_default_ttl_secs", &self.l1_default_ttl_secs)
            .field("compression_threshold", &self.compression_threshold)
            .field("compression_level", &self.compression_level)
            .field("circuit_failure_threshold", &self.circuit_failure_threshold)
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl CacheConfig {
    /// Parse TOML. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, CacheError> {
        toml::from_str(text).map_err(|e| CacheError::Configuration(format!("invalid TOML: {}", e.message())))
    }

    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject settings that cannot work. Called by every cache constructor.
    pub fn validate(&self) -> Result<(), CacheError> {
        self.security_config().validate()?;

        if self.l1_max_entries == 0 {
            return Err(CacheError::Configuration("l1_max_entries must be at least 1".into()));
        }
        if self.l1_default_ttl_secs == 0 {
            return Err(CacheError::Configuration("l1_default_ttl_secs must be non-zero".into()));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(CacheError::Configuration(format!(
                "compression_level must be within 1..=22, got {}",
                self.compression_level
            )));
        }
        if self.operation_timeout_ms == 0 {
            return Err(CacheError::Configuration("operation_timeout_ms must be non-zero".into()));
        }
        if self.circuit_failure_threshold == 0 {
            return Err(CacheError::Configuration("circuit_failure_threshold must be at least 1".into()));
        }
        if self.redis_url.as_deref() == Some("") {
            return Err(CacheError::Configuration("redis_url must not be empty".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn security_config(&self) -> SecurityConfig {
        SecurityConfig {
            auth_password: self.auth_password.clone(),
            acl_username: self.acl_username.clone(),
            acl_password: self.acl_password.clone(),
            tls_enabled: self.tls_enabled,
            tls_cert_path: self.tls_cert_path.clone(),
            tls_key_path: self.tls_key_path.clone(),
            tls_ca_path: self.tls_ca_path.clone(),
            tls_verify_mode: self.tls_verify_mode,
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        self.security_config().retry_config()
    }

    #[must_use]
    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.circuit_failure_threshold,
            recovery_timeout: Duration::from_millis(self.circuit_recovery_timeout_ms),
            failure_window: Duration::from_millis(self.circuit_failure_window_ms),
        }
    }

    #[must_use]
    pub fn codec(&self) -> Codec {
        Codec::new(self.compression_threshold, self.compression_level)
    }

    #[must_use]
    pub fn l1_default_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_default_ttl_secs)
    }

    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}
