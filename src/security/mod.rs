// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Secure connection management for the remote tier.
//!
//! The [`SecurityManager`] is the only component that opens remote
//! connections. It applies TLS and credentials through a [`Connector`],
//! retries transient failures with exponential backoff, bounds every attempt
//! with the connection timeout, and scores what the live connection actually
//! negotiated.
//!
//! # Connection state
//!
//! ```text
//! Disconnected → Connecting → Connected → Authenticating → Ready
//!                    ↑                          │
//!                    └──────── Failed ←─────────┘   (retry until exhausted)
//! ```
//!
//! Every transition of the live connection is published on a
//! [`tokio::sync::watch`] channel; see [`SecurityManager::state_receiver`].
//!
//! # Example
//!
//! ```rust,no_run
//! use tiered_cache::{SecurityConfig, SecurityManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SecurityConfig {
//!     acl_username: Some("cache-svc".into()),
//!     acl_password: Some(std::env::var("CACHE_ACL_PASSWORD")?),
//!     tls_enabled: true,
//!     ..Default::default()
//! };
//! let manager = SecurityManager::redis(config)?;
//! let conn = manager.connect("rediss://cache.internal:6380").await?;
//!
//! let result = manager.validate_connection_security(&conn);
//! println!("{}", manager.generate_security_report(&result));
//! # Ok(())
//! # }
//! ```

pub mod assessment;
pub mod config;
pub mod error;
pub mod report;
pub mod types;

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::entry::epoch_millis;
use crate::resilience::retry::retry;
use crate::storage::redis::RedisConnector;
use crate::storage::traits::{Connector, RemoteStore, StorageError};

use config::{sanitize_address, SecurityConfig};
use error::SecurityError;
use types::{
    AuthMethod, ConnectionState, NegotiatedSecurity, SecurityLevel, SecurityValidationResult,
    StatusSnapshot,
};

/// An established, authenticated remote connection.
///
/// Cheap to clone; clones share the underlying connection.
#[derive(Clone)]
pub struct SecureConnection {
    id: String,
    address: String,
    store: Arc<dyn RemoteStore>,
    established_at: i64,
}

impl SecureConnection {
    /// Unique id for logs and status output
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remote address with credentials stripped
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// Epoch millis
    #[must_use]
    pub fn established_at(&self) -> i64 {
        self.established_at
    }

    #[must_use]
    pub fn negotiated(&self) -> &NegotiatedSecurity {
        self.store.negotiated()
    }
}

impl std::fmt::Debug for SecureConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureConnection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("negotiated", self.negotiated())
            .field("established_at", &self.established_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct LastValidation {
    at: i64,
    score: u8,
    level: SecurityLevel,
}

/// Owns the remote connection lifecycle and its security posture.
pub struct SecurityManager {
    config: SecurityConfig,
    connector: Arc<dyn Connector>,

    /// Live connection state (broadcast to watchers)
    state: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,

    live: RwLock<Option<SecureConnection>>,
    /// Raw address of the last `connect`, kept for `reconnect`
    last_address: RwLock<Option<String>>,
    last_validation: RwLock<Option<LastValidation>>,

    /// Serializes connect/reconnect/disconnect
    lifecycle: Mutex<()>,
}

impl SecurityManager {
    /// Build a manager. Fails fast on invalid configuration.
    pub fn new(config: SecurityConfig, connector: Arc<dyn Connector>) -> Result<Self, SecurityError> {
        config.validate()?;
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            config,
            connector,
            state: state_tx,
            state_rx,
            live: RwLock::new(None),
            last_address: RwLock::new(None),
            last_validation: RwLock::new(None),
            lifecycle: Mutex::new(()),
        })
    }

    /// Manager backed by real Redis connections.
    pub fn redis(config: SecurityConfig) -> Result<Self, SecurityError> {
        Self::new(config, Arc::new(RedisConnector::new()))
    }

    #[must_use]
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Current state of the live connection.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to live connection state transitions.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// The live connection, if one is established.
    #[must_use]
    pub fn connection(&self) -> Option<SecureConnection> {
        self.live.read().clone()
    }

    /// Open a connection with retry and backoff, without touching the
    /// manager's live connection or state.
    #[tracing::instrument(skip(self, address, config), fields(address = %sanitize_address(address)))]
    pub async fn create_secure_connection(
        &self,
        address: &str,
        config: &SecurityConfig,
    ) -> Result<SecureConnection, SecurityError> {
        config.validate()?;
        self.establish(address, config, None).await
    }

    /// Establish the live connection, replacing any existing one, and
    /// record its security assessment.
    #[tracing::instrument(skip(self, address), fields(address = %sanitize_address(address)))]
    pub async fn connect(&self, address: &str) -> Result<SecureConnection, SecurityError> {
        let _lifecycle = self.lifecycle.lock().await;
        *self.last_address.write() = Some(address.to_string());

        let previous = self.live.write().take();
        if let Some(previous) = previous {
            debug!(connection_id = %previous.id, "Closing previous connection");
            previous.store.close().await;
            crate::metrics::set_remote_connected(false);
        }

        let conn = self.establish(address, &self.config, Some(&self.state)).await?;
        *self.live.write() = Some(conn.clone());
        self.state.send_replace(ConnectionState::Ready);
        crate::metrics::set_remote_connected(true);

        let result = self.validate_connection_security(&conn);
        info!(
            connection_id = %conn.id,
            address = %conn.address,
            auth = %conn.negotiated().auth,
            tls = conn.negotiated().tls_active(),
            score = result.score(),
            level = %result.level(),
            "Remote connection ready"
        );
        if result.level() == SecurityLevel::Insecure {
            warn!(
                vulnerabilities = result.vulnerabilities().len(),
                "Remote connection is insecure; see the security report"
            );
        }
        Ok(conn)
    }

    /// Reconnect to the address of the last [`connect`](Self::connect).
    pub async fn reconnect(&self) -> Result<SecureConnection, SecurityError> {
        let address = self.last_address.read().clone();
        match address {
            Some(address) => self.connect(&address).await,
            None => Err(SecurityError::Configuration(
                "reconnect requested before any connect".into(),
            )),
        }
    }

    /// Close the live connection. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let live = self.live.write().take();
        if let Some(conn) = live {
            conn.store.close().await;
            info!(connection_id = %conn.id, "Remote connection closed");
        }
        self.state.send_replace(ConnectionState::Disconnected);
        crate::metrics::set_remote_connected(false);
    }

    /// Score what `conn` actually negotiated and remember the outcome for
    /// [`security_status`](Self::security_status).
    pub fn validate_connection_security(&self, conn: &SecureConnection) -> SecurityValidationResult {
        let result = assessment::assess(conn.negotiated(), epoch_millis());
        *self.last_validation.write() = Some(LastValidation {
            at: result.checked_at(),
            score: result.score(),
            level: result.level(),
        });
        crate::metrics::set_security_score(result.score());
        debug!(
            connection_id = %conn.id,
            score = result.score(),
            level = %result.level(),
            vulnerabilities = result.vulnerabilities().len(),
            "Connection security validated"
        );
        result
    }

    /// Human-readable report for a validation result.
    #[must_use]
    pub fn generate_security_report(&self, result: &SecurityValidationResult) -> String {
        report::render(result)
    }

    /// Non-blocking snapshot for monitoring.
    #[must_use]
    pub fn security_status(&self) -> StatusSnapshot {
        let live = self.live.read().clone();
        let last = *self.last_validation.read();
        let (auth_method, tls_enabled) = match &live {
            Some(conn) => (conn.negotiated().auth.clone(), conn.negotiated().tls_active()),
            None => (configured_auth(&self.config), self.config.tls_enabled),
        };
        StatusSnapshot {
            state: self.state(),
            auth_method,
            tls_enabled,
            connection_id: live.as_ref().map(|c| c.id.clone()),
            address: live.as_ref().map(|c| c.address.clone()),
            last_validated_at: last.map(|l| l.at),
            last_score: last.map(|l| l.score),
            last_level: last.map(|l| l.level),
        }
    }

    /// End-to-end check against `address` on a throwaway connection.
    ///
    /// Passes when the connection succeeds and authentication is active
    /// (no critical finding). The live connection is never touched.
    #[tracing::instrument(skip(self, address), fields(address = %sanitize_address(address)))]
    pub async fn test_security_configuration(&self, address: &str) -> (bool, String) {
        match self.establish(address, &self.config, None).await {
            Ok(conn) => {
                let result = assessment::assess(conn.negotiated(), epoch_millis());
                conn.store.close().await;
                let passed = !result.has_critical();
                let detail = format!(
                    "{}: score {}/100 ({}), {} vulnerabilit{} found",
                    if passed { "passed" } else { "failed" },
                    result.score(),
                    result.level(),
                    result.vulnerabilities().len(),
                    if result.vulnerabilities().len() == 1 { "y" } else { "ies" },
                );
                info!(passed, score = result.score(), "Security configuration test finished");
                (passed, detail)
            }
            Err(e) => {
                warn!(error = %e, "Security configuration test could not connect");
                (false, format!("failed: {}", e))
            }
        }
    }

    /// Run the retry loop. State transitions are published only when
    /// `state` is given (the live connection).
    async fn establish(
        &self,
        address: &str,
        config: &SecurityConfig,
        state: Option<&watch::Sender<ConnectionState>>,
    ) -> Result<SecureConnection, SecurityError> {
        let outcome = retry(
            "remote_connect",
            &config.retry_config(),
            || self.attempt(address, config, state),
            |e: &SecurityError| !matches!(e, SecurityError::Configuration(_) | SecurityError::TlsHandshake { .. }),
        )
        .await;

        match outcome {
            Ok(store) => Ok(SecureConnection {
                id: uuid::Uuid::new_v4().to_string(),
                address: sanitize_address(address),
                store,
                established_at: epoch_millis(),
            }),
            Err(failure) => {
                let err = match failure.error {
                    SecurityError::Authentication { method, .. } => SecurityError::Authentication {
                        method,
                        attempts: failure.attempts,
                    },
                    other if failure.exhausted => SecurityError::ExhaustedRetries {
                        attempts: failure.attempts,
                        last: Box::new(other),
                    },
                    other => other,
                };
                error!(attempts = failure.attempts, error = %err, "Could not establish remote connection");
                Err(err)
            }
        }
    }

    /// One attempt, bounded by the connection timeout.
    async fn attempt(
        &self,
        address: &str,
        config: &SecurityConfig,
        state: Option<&watch::Sender<ConnectionState>>,
    ) -> Result<Arc<dyn RemoteStore>, SecurityError> {
        let publish = |next: ConnectionState| {
            if let Some(tx) = state {
                tx.send_replace(next);
            }
        };

        publish(ConnectionState::Connecting);
        let handshake = async {
            let store = self.connector.connect(address, config).await?;
            publish(ConnectionState::Connected);
            publish(ConnectionState::Authenticating);
            store.auth_handshake().await?;
            Ok::<_, StorageError>(store)
        };

        let result = match tokio::time::timeout(config.connection_timeout, handshake).await {
            Ok(Ok(store)) => Ok(store),
            Ok(Err(e)) => Err(to_security_error(e, config)),
            Err(_) => Err(SecurityError::Timeout { after: config.connection_timeout }),
        };

        match &result {
            Ok(_) => crate::metrics::record_connection_attempt("success"),
            Err(SecurityError::Timeout { .. }) => {
                publish(ConnectionState::Failed);
                crate::metrics::record_connection_attempt("timeout");
            }
            Err(_) => {
                publish(ConnectionState::Failed);
                crate::metrics::record_connection_attempt("failure");
            }
        }
        result
    }
}

impl std::fmt::Debug for SecurityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityManager")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("connection", &self.live.read().as_ref().map(|c| c.id.clone()))
            .finish()
    }
}

fn configured_auth(config: &SecurityConfig) -> AuthMethod {
    match (&config.acl_username, &config.auth_password) {
        (Some(username), _) => AuthMethod::Acl { username: username.clone() },
        (None, Some(_)) => AuthMethod::Password,
        (None, None) => AuthMethod::None,
    }
}

/// Storage failures onto the security taxonomy, secrets masked.
///
/// Transient TLS failures become `Connection` so they are retried;
/// certificate problems stay `TlsHandshake` and are not.
fn to_security_error(err: StorageError, config: &SecurityConfig) -> SecurityError {
    match err {
        StorageError::Authentication { method } => SecurityError::Authentication { method, attempts: 1 },
        StorageError::Tls { reason, transient: false } => SecurityError::TlsHandshake {
            reason: config.redact(&reason),
        },
        StorageError::Tls { reason, transient: true } => {
            SecurityError::Connection(config.redact(&format!("TLS: {}", reason)))
        }
        StorageError::Timeout { after, .. } => SecurityError::Timeout { after },
        StorageError::Configuration(reason) => SecurityError::Configuration(config.redact(&reason)),
        other => SecurityError::Connection(config.redact(&other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::config::TlsVerifyMode;
    use crate::storage::memory::{InMemoryConnector, MemoryServer};
    use std::time::Duration;

    const ADDR: &str = "memory://cache";

    fn manager(server: &Arc<MemoryServer>, config: SecurityConfig) -> SecurityManager {
        SecurityManager::new(config, Arc::new(InMemoryConnector::new(Arc::clone(server)))).unwrap()
    }

    #[tokio::test]
    async fn test_connect_reaches_ready() {
        let server = MemoryServer::new();
        let mgr = manager(&server, SecurityConfig::default());
        let mut rx = mgr.state_receiver();
        assert_eq!(mgr.state(), ConnectionState::Disconnected);

        let conn = mgr.connect(ADDR).await.unwrap();

        assert_eq!(mgr.state(), ConnectionState::Ready);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Ready);
        assert_eq!(mgr.connection().unwrap().id(), conn.id());
        assert_eq!(server.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_backoff_then_success() {
        let server = MemoryServer::new();
        server.fail_next_connects(2);
        let mgr = manager(&server, SecurityConfig {
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            ..Default::default()
        });
        let start = tokio::time::Instant::now();

        mgr.connect(ADDR).await.unwrap();

        assert_eq!(server.connect_attempts(), 3);
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(mgr.state(), ConnectionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_leave_failed_state() {
        let server = MemoryServer::new();
        server.set_available(false);
        let mgr = manager(&server, SecurityConfig::default());

        let err = mgr.connect(ADDR).await.unwrap_err();

        assert!(matches!(err, SecurityError::ExhaustedRetries { attempts: 3, .. }));
        assert_eq!(mgr.state(), ConnectionState::Failed);
        assert!(mgr.connection().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_password_is_authentication_error() {
        let server = MemoryServer::new();
        server.require_password("right-password");
        let mgr = manager(&server, SecurityConfig {
            auth_password: Some("hunter2-wrong".into()),
            ..Default::default()
        });

        let err = mgr.connect(ADDR).await.unwrap_err();

        assert!(matches!(err, SecurityError::Authentication { method: "AUTH", attempts: 3 }));
        assert!(!err.to_string().contains("hunter2-wrong"));
        assert!(!format!("{:?}", err).contains("hunter2-wrong"));
        assert_eq!(server.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_certificate_failure_not_retried() {
        let server = MemoryServer::new();
        server.reject_certificates(true);
        let mgr = manager(&server, SecurityConfig { tls_enabled: true, ..Default::default() });

        let err = mgr.connect(ADDR).await.unwrap_err();

        assert!(matches!(err, SecurityError::TlsHandshake { .. }));
        assert_eq!(server.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_is_bounded_by_timeout() {
        let server = MemoryServer::new();
        server.set_latency(Duration::from_secs(30));
        let mgr = manager(&server, SecurityConfig {
            connection_timeout: Duration::from_secs(1),
            max_retries: 2,
            ..Default::default()
        });
        let start = tokio::time::Instant::now();

        let err = mgr.connect(ADDR).await.unwrap_err();

        match err {
            SecurityError::ExhaustedRetries { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, SecurityError::Timeout { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let server = MemoryServer::new();
        let mgr = manager(&server, SecurityConfig::default());
        mgr.connect(ADDR).await.unwrap();

        mgr.disconnect().await;
        mgr.disconnect().await;

        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert!(mgr.connection().is_none());
    }

    #[tokio::test]
    async fn test_reconnect_reuses_address() {
        let server = MemoryServer::new();
        let mgr = manager(&server, SecurityConfig::default());
        assert!(matches!(mgr.reconnect().await, Err(SecurityError::Configuration(_))));

        let first = mgr.connect(ADDR).await.unwrap();
        mgr.disconnect().await;
        let second = mgr.reconnect().await.unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(mgr.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_status_reflects_validation() {
        let server = MemoryServer::new();
        server.add_acl_user("svc", "pw");
        let mgr = manager(&server, SecurityConfig {
            acl_username: Some("svc".into()),
            acl_password: Some("pw".into()),
            ..Default::default()
        });

        let before = mgr.security_status();
        assert_eq!(before.state, ConnectionState::Disconnected);
        assert!(before.last_score.is_none());

        mgr.connect(ADDR).await.unwrap();
        let after = mgr.security_status();

        assert_eq!(after.state, ConnectionState::Ready);
        assert_eq!(after.auth_method, AuthMethod::Acl { username: "svc".into() });
        assert!(!after.tls_enabled);
        assert!(after.connection_id.is_some());
        assert_eq!(after.last_level, Some(SecurityLevel::Basic));
    }

    #[tokio::test]
    async fn test_configuration_check_leaves_live_state_alone() {
        let server = MemoryServer::new();
        server.require_password("pw");
        let mgr = manager(&server, SecurityConfig {
            auth_password: Some("pw".into()),
            tls_enabled: true,
            tls_verify_mode: TlsVerifyMode::PeerAndHost,
            ..Default::default()
        });

        let (passed, detail) = mgr.test_security_configuration(ADDR).await;

        assert!(passed, "{detail}");
        assert!(detail.contains("Standard"));
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert!(mgr.connection().is_none());
        assert!(mgr.security_status().last_score.is_none());
    }

    #[tokio::test]
    async fn test_configuration_check_fails_without_auth() {
        let server = MemoryServer::new();
        let mgr = manager(&server, SecurityConfig::default());

        let (passed, detail) = mgr.test_security_configuration(ADDR).await;

        assert!(!passed);
        assert!(detail.contains("Insecure"));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_construction() {
        let server = MemoryServer::new();
        let result = SecurityManager::new(
            SecurityConfig { max_retries: 0, ..Default::default() },
            Arc::new(InMemoryConnector::new(server)),
        );
        assert!(matches!(result, Err(SecurityError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_create_secure_connection_with_other_config() {
        let server = MemoryServer::new();
        server.require_password("pw");
        let mgr = manager(&server, SecurityConfig::default());
        let other = SecurityConfig { auth_password: Some("pw".into()), ..Default::default() };

        let conn = mgr.create_secure_connection(ADDR, &other).await.unwrap();

        assert_eq!(conn.negotiated().auth, AuthMethod::Password);
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_storage_configuration_error_is_fatal_misconfiguration() {
        let err = to_security_error(
            StorageError::Configuration("unix socket with TLS".into()),
            &SecurityConfig::default(),
        );
        assert!(matches!(err, SecurityError::Configuration(_)));
        assert!(err.is_misconfiguration());
    }
}
