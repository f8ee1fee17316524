// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis backend for the remote (L2) tier.
//!
//! Each entry is a Redis HASH so the compression flag travels with the bytes:
//!
//! | field | content                                   |
//! |-------|-------------------------------------------|
//! | `v`   | stored bytes (compressed when `c` = 1)    |
//! | `c`   | compression flag, `0` or `1`              |
//! | `n`   | original payload length                   |
//! | `t`   | creation time, epoch millis               |
//!
//! Writes replace the hash and set its expiry in one `MULTI`/`EXEC` pipeline,
//! so a reader never sees a value without its flag or without a TTL.
//!
//! Credentials are applied to the connection info from [`SecurityConfig`],
//! never embedded in URLs, and never appear in error messages.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{Client, ConnectionAddr, ConnectionInfo, ErrorKind, IntoConnectionInfo, RedisError};
use tracing::{debug, warn};

use super::traits::{Connector, RemoteStore, StorageError};
use crate::entry::CacheEntry;
use crate::security::config::{sanitize_address, SecurityConfig, TlsVerifyMode};
use crate::security::types::{AuthMethod, NegotiatedSecurity, TlsDetails};

const FIELD_VALUE: &str = "v";
const FIELD_COMPRESSED: &str = "c";
const FIELD_SIZE: &str = "n";
const FIELD_CREATED: &str = "t";

/// A live Redis connection (multiplexed, reconnecting).
pub struct RedisStore {
    connection: ConnectionManager,
    negotiated: NegotiatedSecurity,
    auth_method: &'static str,
}

impl RedisStore {
    fn decode(key: &str, mut fields: HashMap<String, Vec<u8>>, pttl: i64) -> Result<CacheEntry, StorageError> {
        let value = fields
            .remove(FIELD_VALUE)
            .ok_or_else(|| StorageError::Backend(format!("entry '{}' has no value field", key)))?;
        let compressed = match fields.get(FIELD_COMPRESSED).map(Vec::as_slice) {
            Some(b"1") => true,
            Some(b"0") | None => false,
            Some(_) => {
                return Err(StorageError::Backend(format!("entry '{}' has a malformed compression flag", key)));
            }
        };
        let size_bytes = parse_field::<usize>(&fields, FIELD_SIZE).unwrap_or(value.len());
        let created_at = parse_field::<i64>(&fields, FIELD_CREATED).unwrap_or(0);
        // -1: no expiry; treat as a long-lived entry
        let ttl = if pttl > 0 { Duration::from_millis(pttl as u64) } else { Duration::MAX };

        Ok(CacheEntry::reconstruct(key.to_string(), value, ttl, created_at, compressed, size_bytes))
    }

    fn map_err(&self, err: RedisError) -> StorageError {
        classify(err, self.auth_method)
    }
}

fn parse_field<T: std::str::FromStr>(fields: &HashMap<String, Vec<u8>>, name: &str) -> Option<T> {
    fields
        .get(name)
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .and_then(|s| s.parse().ok())
}

/// Map a Redis error onto the storage taxonomy.
fn classify(err: RedisError, auth_method: &'static str) -> StorageError {
    if err.kind() == ErrorKind::AuthenticationFailed
        || matches!(err.code(), Some("WRONGPASS") | Some("NOAUTH"))
    {
        return StorageError::Authentication { method: auth_method };
    }

    let text = err.to_string();
    let lower = text.to_ascii_lowercase();
    if lower.contains("certificate") || lower.contains("unknownissuer") || lower.contains("notvalidforname") {
        return StorageError::Tls { reason: text, transient: false };
    }
    if lower.contains("tls") || lower.contains("handshake") {
        return StorageError::Tls { reason: text, transient: true };
    }
    if err.is_timeout() || err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
        return StorageError::Unavailable(text);
    }
    StorageError::Backend(text)
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let mut conn = self.connection.clone();
        let (fields, pttl): (HashMap<String, Vec<u8>>, i64) = redis::pipe()
            .atomic()
            .hgetall(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_err(e))?;

        if fields.is_empty() {
            return Ok(None);
        }
        Self::decode(key, fields, pttl).map(Some)
    }

    async fn set(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let ttl_ms = entry.ttl.as_millis().clamp(1, i64::MAX as u128) as i64;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(&entry.key)
            .ignore()
            .cmd("HSET")
            .arg(&entry.key)
            .arg(FIELD_VALUE)
            .arg(entry.value.as_slice())
            .arg(FIELD_COMPRESSED)
            .arg(if entry.compressed { "1" } else { "0" })
            .arg(FIELD_SIZE)
            .arg(entry.size_bytes)
            .arg(FIELD_CREATED)
            .arg(entry.created_at)
            .ignore()
            .cmd("PEXPIRE")
            .arg(&entry.key)
            .arg(ttl_ms)
            .ignore();

        let _: () = pipe.query_async(&mut conn).await.map_err(|e| self.map_err(e))?;
        debug!(key = %entry.key, bytes = entry.value.len(), compressed = entry.compressed, "Redis HSET");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let mut conn = self.connection.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(exists)
    }

    async fn auth_handshake(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        match &self.negotiated.auth {
            AuthMethod::Acl { username } => {
                let whoami: String = redis::cmd("ACL")
                    .arg("WHOAMI")
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| self.map_err(e))?;
                if &whoami != username {
                    warn!(expected = %username, actual = %whoami, "Server reports a different ACL identity");
                    return Err(StorageError::Authentication { method: "ACL" });
                }
            }
            AuthMethod::Password | AuthMethod::None => {
                let _: String = redis::cmd("PING")
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| self.map_err(e))?;
            }
        }
        Ok(())
    }

    fn negotiated(&self) -> &NegotiatedSecurity {
        &self.negotiated
    }
}

/// Opens [`RedisStore`] connections with TLS and credentials applied.
#[derive(Debug, Clone, Default)]
pub struct RedisConnector;

impl RedisConnector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parse `address` and apply credentials and TLS settings from `config`.
    ///
    /// Returns the connection info plus what will be negotiated.
    fn connection_info(
        address: &str,
        config: &SecurityConfig,
    ) -> Result<(ConnectionInfo, NegotiatedSecurity), StorageError> {
        let mut info: ConnectionInfo = address.into_connection_info().map_err(|e| {
            StorageError::Backend(format!("invalid address '{}': {}", sanitize_address(address), e))
        })?;

        if let (Some(user), Some(pass)) = (&config.acl_username, &config.acl_password) {
            info.redis.username = Some(user.clone());
            info.redis.password = Some(pass.clone());
        } else if let Some(pass) = &config.auth_password {
            info.redis.username = None;
            info.redis.password = Some(pass.clone());
        }

        let insecure = config.tls_verify_mode == TlsVerifyMode::None;
        info.addr = match info.addr {
            ConnectionAddr::Tcp(host, port) if config.tls_enabled => ConnectionAddr::TcpTls {
                host,
                port,
                insecure,
                tls_params: None,
            },
            ConnectionAddr::TcpTls { host, port, tls_params, .. } if config.tls_enabled => {
                ConnectionAddr::TcpTls { host, port, insecure, tls_params }
            }
            ConnectionAddr::TcpTls { .. } => {
                return Err(StorageError::Tls {
                    reason: "address requires TLS (rediss://) but tls_enabled is false".into(),
                    transient: false,
                });
            }
            ConnectionAddr::Unix(_) if config.tls_enabled => {
                return Err(StorageError::Configuration(
                    "tls_enabled is set but unix socket addresses cannot use TLS".into(),
                ));
            }
            other => other,
        };

        let tls = match &info.addr {
            ConnectionAddr::TcpTls { .. } => {
                let verify_mode = match config.tls_verify_mode {
                    TlsVerifyMode::Peer => {
                        debug!("Redis TLS verifies host names with the chain; upgrading peer to peer_and_host");
                        TlsVerifyMode::PeerAndHost
                    }
                    mode => mode,
                };
                Some(TlsDetails {
                    verify_mode,
                    custom_ca: config.tls_ca_path.is_some(),
                    client_certificate: config.tls_cert_path.is_some(),
                })
            }
            _ => None,
        };

        let auth = match (&info.redis.username, &info.redis.password) {
            (Some(username), Some(_)) => AuthMethod::Acl { username: username.clone() },
            (None, Some(_)) => AuthMethod::Password,
            _ => AuthMethod::None,
        };

        Ok((info, NegotiatedSecurity { auth, tls }))
    }

    async fn read_pem(path: &std::path::Path, what: &str) -> Result<Vec<u8>, StorageError> {
        tokio::fs::read(path).await.map_err(|e| StorageError::Tls {
            reason: format!("cannot read {} '{}': {}", what, path.display(), e),
            transient: false,
        })
    }

    async fn build_client(
        info: ConnectionInfo,
        config: &SecurityConfig,
        tls: bool,
    ) -> Result<Client, StorageError> {
        if !tls || (config.tls_ca_path.is_none() && config.tls_cert_path.is_none()) {
            return Client::open(info).map_err(|e| StorageError::Backend(e.to_string()));
        }

        let root_cert = match &config.tls_ca_path {
            Some(path) => Some(Self::read_pem(path, "CA bundle").await?),
            None => None,
        };
        let client_tls = match (&config.tls_cert_path, &config.tls_key_path) {
            (Some(cert), Some(key)) => Some(redis::ClientTlsConfig {
                client_cert: Self::read_pem(cert, "client certificate").await?,
                client_key: Self::read_pem(key, "client key").await?,
            }),
            _ => None,
        };

        Client::build_with_tls(info, redis::TlsCertificates { client_tls, root_cert })
            .map_err(|e| StorageError::Tls { reason: e.to_string(), transient: false })
    }
}

#[async_trait]
impl Connector for RedisConnector {
    async fn connect(
        &self,
        address: &str,
        config: &SecurityConfig,
    ) -> Result<Arc<dyn RemoteStore>, StorageError> {
        let (info, negotiated) = Self::connection_info(address, config)?;
        let client = Self::build_client(info, config, negotiated.tls_active()).await?;

        // One attempt per call: the security manager owns the retry policy.
        let manager_config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(config.connection_timeout)
            .set_response_timeout(config.connection_timeout);

        let connection = ConnectionManager::new_with_config(client, manager_config)
            .await
            .map_err(|e| classify(e, config.auth_method_label()))?;

        debug!(
            address = %sanitize_address(address),
            auth = %negotiated.auth,
            tls = negotiated.tls_active(),
            "Redis connection established"
        );

        Ok(Arc::new(RedisStore {
            connection,
            negotiated,
            auth_method: config.auth_method_label(),
        }))
    }
}
