// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory remote tier for tests and local development.
//!
//! [`MemoryServer`] plays the part of the remote store: it holds the data,
//! enforces credentials and TLS policy, and can be told to misbehave.
//! [`InMemoryConnector`] opens [`InMemoryStore`] connections to it, so the
//! whole connect/retry/circuit path runs exactly as it would against Redis.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::traits::{Connector, RemoteStore, StorageError};
use crate::entry::CacheEntry;
use crate::security::config::{SecurityConfig, TlsVerifyMode};
use crate::security::types::{AuthMethod, NegotiatedSecurity, TlsDetails};

struct StoredValue {
    value: Vec<u8>,
    compressed: bool,
    size_bytes: usize,
    created_at: i64,
    expires_at: Instant,
}

/// Shared state of a fake remote store.
#[derive(Default)]
pub struct MemoryServer {
    data: DashMap<String, StoredValue>,
    unavailable: AtomicBool,
    connect_failures: AtomicUsize,
    op_failures: AtomicUsize,
    latency: Mutex<Duration>,
    password: Mutex<Option<String>>,
    acl_users: DashMap<String, String>,
    reject_certificates: AtomicBool,
    calls: AtomicU64,
    connect_attempts: AtomicU64,
}

impl MemoryServer {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Require AUTH with this password.
    pub fn require_password(&self, password: impl Into<String>) {
        *self.password.lock() = Some(password.into());
    }

    /// Register an ACL user. Any registered user makes authentication mandatory.
    pub fn add_acl_user(&self, username: impl Into<String>, password: impl Into<String>) {
        self.acl_users.insert(username.into(), password.into());
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    /// Fail the next `n` connection attempts with a transient error.
    pub fn fail_next_connects(&self, n: usize) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` data operations with a backend error.
    pub fn fail_next_ops(&self, n: usize) {
        self.op_failures.store(n, Ordering::SeqCst);
    }

    /// Delay applied to every connect and data operation.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Present a certificate clients cannot verify.
    pub fn reject_certificates(&self, reject: bool) {
        self.reject_certificates.store(reject, Ordering::SeqCst);
    }

    /// Data operations that reached the server (successful or not).
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Number of keys held, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn flush(&self) {
        self.data.clear();
    }

    /// Read an entry exactly as stored, bypassing connections and counters.
    #[must_use]
    pub fn raw_entry(&self, key: &str) -> Option<CacheEntry> {
        let now = Instant::now();
        self.data.get(key).filter(|v| now < v.expires_at).map(|v| {
            CacheEntry::reconstruct(
                key.to_string(),
                v.value.clone(),
                v.expires_at - now,
                v.created_at,
                v.compressed,
                v.size_bytes,
            )
        })
    }

    /// Store an entry directly, bypassing connections and counters.
    pub fn insert_raw(&self, entry: &CacheEntry) {
        self.store(entry);
    }

    fn store(&self, entry: &CacheEntry) {
        self.data.insert(
            entry.key.clone(),
            StoredValue {
                value: entry.value.clone(),
                compressed: entry.compressed,
                size_bytes: entry.size_bytes,
                created_at: entry.created_at,
                expires_at: super::local::deadline(entry.ttl),
            },
        );
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn requires_auth(&self) -> bool {
        self.password.lock().is_some() || !self.acl_users.is_empty()
    }

    fn authenticate(&self, auth: &AuthMethod, config: &SecurityConfig) -> Result<(), StorageError> {
        match auth {
            AuthMethod::Acl { username } => {
                let accepted = self
                    .acl_users
                    .get(username)
                    .is_some_and(|pass| config.acl_password.as_deref() == Some(pass.as_str()));
                if accepted { Ok(()) } else { Err(StorageError::Authentication { method: "ACL" }) }
            }
            AuthMethod::Password => {
                let required = self.password.lock().clone();
                match required {
                    Some(required) if config.auth_password.as_deref() != Some(required.as_str()) => {
                        Err(StorageError::Authentication { method: "AUTH" })
                    }
                    _ => Ok(()),
                }
            }
            AuthMethod::None if self.requires_auth() => {
                Err(StorageError::Authentication { method: "none" })
            }
            AuthMethod::None => Ok(()),
        }
    }
}

/// A connection to a [`MemoryServer`].
pub struct InMemoryStore {
    server: Arc<MemoryServer>,
    config: SecurityConfig,
    negotiated: NegotiatedSecurity,
    closed: AtomicBool,
}

impl InMemoryStore {
    #[must_use]
    pub fn server(&self) -> &Arc<MemoryServer> {
        &self.server
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), StorageError> {
        self.server.calls.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(StorageError::Unavailable("connection closed".into()));
        }
        self.server.simulate_latency().await;
        if !self.server.is_available() {
            return Err(StorageError::Unavailable("connection reset by peer".into()));
        }
        if MemoryServer::take_one(&self.server.op_failures) {
            return Err(StorageError::Backend("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        self.enter().await?;
        let entry = self.server.raw_entry(key);
        if entry.is_none() {
            // Drop it if it was merely expired
            let now = Instant::now();
            self.server.data.remove_if(key, |_, v| now >= v.expires_at);
        }
        Ok(entry)
    }

    async fn set(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        self.enter().await?;
        self.server.store(entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.enter().await?;
        self.server.data.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.enter().await?;
        Ok(self.server.raw_entry(key).is_some())
    }

    async fn auth_handshake(&self) -> Result<(), StorageError> {
        self.enter().await?;
        self.server.authenticate(&self.negotiated.auth, &self.config)
    }

    fn negotiated(&self) -> &NegotiatedSecurity {
        &self.negotiated
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Opens connections to a shared [`MemoryServer`].
#[derive(Clone)]
pub struct InMemoryConnector {
    server: Arc<MemoryServer>,
}

impl InMemoryConnector {
    #[must_use]
    pub fn new(server: Arc<MemoryServer>) -> Self {
        Self { server }
    }

    #[must_use]
    pub fn server(&self) -> &Arc<MemoryServer> {
        &self.server
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(
        &self,
        address: &str,
        config: &SecurityConfig,
    ) -> Result<Arc<dyn RemoteStore>, StorageError> {
        let server = &self.server;
        server.connect_attempts.fetch_add(1, Ordering::SeqCst);
        server.simulate_latency().await;

        if !server.is_available() {
            return Err(StorageError::Unavailable(format!("connection refused ({})", address)));
        }
        if MemoryServer::take_one(&server.connect_failures) {
            return Err(StorageError::Unavailable("injected connect failure".into()));
        }

        let tls = if config.tls_enabled {
            if config.tls_verify_mode != TlsVerifyMode::None
                && server.reject_certificates.load(Ordering::SeqCst)
            {
                return Err(StorageError::Tls {
                    reason: "certificate verify failed: unknown issuer".into(),
                    transient: false,
                });
            }
            Some(TlsDetails {
                verify_mode: config.tls_verify_mode,
                custom_ca: config.tls_ca_path.is_some(),
                client_certificate: config.tls_cert_path.is_some(),
            })
        } else {
            None
        };

        let auth = match (&config.acl_username, &config.auth_password) {
            (Some(username), _) => AuthMethod::Acl { username: username.clone() },
            (None, Some(_)) => AuthMethod::Password,
            (None, None) => AuthMethod::None,
        };
        server.authenticate(&auth, config)?;

        debug!(address = %address, auth = %auth, tls = tls.is_some(), "In-memory connection opened");
        Ok(Arc::new(InMemoryStore {
            server: Arc::clone(server),
            config: config.clone(),
            negotiated: NegotiatedSecurity { auth, tls },
            closed: AtomicBool::new(false),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(server: &Arc<MemoryServer>, config: &SecurityConfig) -> Arc<dyn RemoteStore> {
        InMemoryConnector::new(Arc::clone(server))
            .connect("memory://test", config)
            .await
            .unwrap()
    }

    fn entry(key: &str, value: &[u8]) -> CacheEntry {
        CacheEntry::new(key, value.to_vec(), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let server = MemoryServer::new();
        let store = open(&server, &SecurityConfig::default()).await;

        store.set(&entry("k", b"v")).await.unwrap();
        let got = store.get("k").await.unwrap().unwrap();
        assert_eq!(got.value, b"v");
        assert!(store.exists("k").await.unwrap());

        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(server.calls(), 5);
    }

    #[tokio::test]
    async fn test_flags_survive_storage() {
        let server = MemoryServer::new();
        let store = open(&server, &SecurityConfig::default()).await;
        let mut e = entry("k", b"zz");
        e.compressed = true;
        e.size_bytes = 4096;

        store.set(&e).await.unwrap();
        let raw = server.raw_entry("k").unwrap();
        assert!(raw.compressed);
        assert_eq!(raw.size_bytes, 4096);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_ttl_expiry() {
        let server = MemoryServer::new();
        let store = open(&server, &SecurityConfig::default()).await;
        store
            .set(&CacheEntry::new("k", vec![1], Duration::from_secs(1)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(400)).await;
        let got = store.get("k").await.unwrap().unwrap();
        assert_eq!(got.ttl, Duration::from_millis(600));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("k").await.unwrap().is_none());
        assert!(server.is_empty());
    }

    #[tokio::test]
    async fn test_outage_and_injected_failures() {
        let server = MemoryServer::new();
        let store = open(&server, &SecurityConfig::default()).await;

        server.fail_next_ops(1);
        assert!(matches!(store.get("k").await, Err(StorageError::Backend(_))));
        assert!(store.get("k").await.is_ok());

        server.set_available(false);
        assert!(matches!(store.get("k").await, Err(StorageError::Unavailable(_))));
        let connector = InMemoryConnector::new(Arc::clone(&server));
        assert!(connector.connect("memory://test", &SecurityConfig::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_password_enforced() {
        let server = MemoryServer::new();
        server.require_password("s3cret");
        let connector = InMemoryConnector::new(Arc::clone(&server));

        let anonymous = connector.connect("memory://test", &SecurityConfig::default()).await;
        assert!(matches!(anonymous, Err(StorageError::Authentication { .. })));

        let wrong = SecurityConfig { auth_password: Some("nope".into()), ..Default::default() };
        assert!(matches!(
            connector.connect("memory://test", &wrong).await,
            Err(StorageError::Authentication { method: "AUTH" })
        ));

        let right = SecurityConfig { auth_password: Some("s3cret".into()), ..Default::default() };
        let store = connector.connect("memory://test", &right).await.unwrap();
        assert_eq!(store.negotiated().auth, AuthMethod::Password);
        store.auth_handshake().await.unwrap();
    }

    #[tokio::test]
    async fn test_acl_enforced() {
        let server = MemoryServer::new();
        server.add_acl_user("cache-svc", "pw");
        let connector = InMemoryConnector::new(Arc::clone(&server));

        let wrong = SecurityConfig {
            acl_username: Some("cache-svc".into()),
            acl_password: Some("bad".into()),
            ..Default::default()
        };
        assert!(matches!(
            connector.connect("memory://test", &wrong).await,
            Err(StorageError::Authentication { method: "ACL" })
        ));

        let right = SecurityConfig { acl_password: Some("pw".into()), ..wrong };
        let store = connector.connect("memory://test", &right).await.unwrap();
        assert!(store.negotiated().acl_active());
    }

    #[tokio::test]
    async fn test_certificate_rejection_is_not_transient() {
        let server = MemoryServer::new();
        server.reject_certificates(true);
        let connector = InMemoryConnector::new(Arc::clone(&server));
        let config = SecurityConfig { tls_enabled: true, ..Default::default() };

        let err = connector.connect("memory://test", &config).await.err().unwrap();
        assert!(matches!(err, StorageError::Tls { transient: false, .. }));

        // Verification disabled accepts any certificate
        let lax = SecurityConfig { tls_verify_mode: TlsVerifyMode::None, ..config };
        let store = connector.connect("memory://test", &lax).await.unwrap();
        assert!(store.negotiated().tls_active());
        assert!(!store.negotiated().certificate_verified());
    }

    #[tokio::test]
    async fn test_closed_connection_fails() {
        let server = MemoryServer::new();
        let store = open(&server, &SecurityConfig::default()).await;
        store.close().await;
        assert!(matches!(store.get("k").await, Err(StorageError::Unavailable(_))));
    }
}
