// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::entry::CacheEntry;
use crate::security::config::SecurityConfig;
use crate::security::types::NegotiatedSecurity;

#[derive(Error, Debug, Clone)]
pub enum StorageError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    #[error("{method} authentication rejected by remote store")]
    Authentication { method: &'static str },
    #[error("TLS failure: {reason}")]
    Tls { reason: String, transient: bool },
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// The address and security settings cannot work together
    #[error("invalid remote store configuration: {0}")]
    Configuration(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// The remote (L2) tier as seen by the cache.
///
/// Implementations are connection handles: cheap to share behind an `Arc`,
/// safe for concurrent callers.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch an entry. The returned entry's `ttl` is the remaining TTL.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError>;

    /// Store an entry with `entry.ttl` as its expiry. Value, flags and
    /// expiry are written atomically.
    async fn set(&self, entry: &CacheEntry) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Confirm the server accepts this connection's identity.
    async fn auth_handshake(&self) -> Result<(), StorageError>;

    /// Security properties negotiated when the connection was made.
    fn negotiated(&self) -> &NegotiatedSecurity;

    /// Release the connection. Further calls may fail.
    async fn close(&self) {}
}

/// Opens [`RemoteStore`] connections. The security manager is the only caller.
#[async_trait]
pub trait Connector: Send + Sync {
    /// One connection attempt, TLS and credentials applied. No retries.
    async fn connect(
        &self,
        address: &str,
        config: &SecurityConfig,
    ) -> Result<Arc<dyn RemoteStore>, StorageError>;
}
