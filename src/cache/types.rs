// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the tiered cache.

use serde::Serialize;
use thiserror::Error;

use crate::key::KeyError;
use crate::resilience::circuit_breaker::CircuitSnapshot;
use crate::security::error::SecurityError;
use crate::security::types::ConnectionState;
use crate::storage::local::L1Stats;
use crate::storage::traits::StorageError;

/// Errors surfaced by the public cache contract.
///
/// Remote outages never show up here on read paths; they degrade to L1.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Empty, oversized or otherwise malformed key
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid ttl: {0}")]
    InvalidTtl(String),

    /// Unusable configuration (fatal at startup)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connection security failure that must not be silently degraded past
    #[error(transparent)]
    Security(#[from] SecurityError),

    /// The L1 write succeeded but the remote write did not
    #[error("remote write failed for {key}: {reason}")]
    RemoteWrite { key: String, reason: String },

    /// Value could not be (de)serialized by a typed helper
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    /// True for errors that should stop the process at startup.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Security(_))
    }
}

impl From<KeyError> for CacheError {
    fn from(e: KeyError) -> Self {
        Self::InvalidKey(e.to_string())
    }
}

impl From<StorageError> for CacheError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidKey(reason) => Self::InvalidKey(reason),
            other => Self::Configuration(other.to_string()),
        }
    }
}

/// Which tiers are currently serving requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheMode {
    /// L1 plus a live remote connection
    Tiered,
    /// No remote connection (never connected, disconnected, or start failed)
    LocalOnly,
}

impl std::fmt::Display for CacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tiered => write!(f, "Tiered"),
            Self::LocalOnly => write!(f, "LocalOnly"),
        }
    }
}

/// Which tier answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ServedBy {
    L1,
    Remote,
    Miss,
}

impl ServedBy {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::L1 => "l1",
            Self::Remote => "remote",
            Self::Miss => "miss",
        }
    }
}

/// Point-in-time view of the cache for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub mode: CacheMode,
    pub l1: L1Stats,
    pub circuit: CircuitSnapshot,
    pub connection: ConnectionState,
    /// Reads answered by the remote tier
    pub remote_hits: u64,
    /// Remote reads that found nothing
    pub remote_misses: u64,
    /// Remote calls that failed, timed out or were rejected by the circuit
    pub remote_errors: u64,
    /// Remote entries that could not be decoded (treated as misses)
    pub codec_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(CacheError::Configuration("bad".into()).is_fatal());
        assert!(CacheError::Security(SecurityError::Configuration("bad".into())).is_fatal());
        assert!(!CacheError::InvalidKey("".into()).is_fatal());
        assert!(!CacheError::RemoteWrite { key: "k".into(), reason: "down".into() }.is_fatal());
    }

    #[test]
    fn test_storage_invalid_key_maps_to_invalid_key() {
        let err: CacheError = StorageError::InvalidKey("empty key".into()).into();
        assert!(matches!(err, CacheError::InvalidKey(_)));
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(CacheMode::Tiered.to_string(), "Tiered");
        assert_eq!(CacheMode::LocalOnly.to_string(), "LocalOnly");
    }
}
