// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Security settings for remote connections.

use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::SecurityError;
use crate::resilience::retry::RetryConfig;

/// How strictly the server certificate is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsVerifyMode {
    /// Accept any certificate
    None,
    /// Verify the certificate chain
    Peer,
    /// Verify the chain and that the certificate matches the host name
    #[default]
    PeerAndHost,
}

impl std::fmt::Display for TlsVerifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Peer => write!(f, "peer"),
            Self::PeerAndHost => write!(f, "peer_and_host"),
        }
    }
}

/// Connection security settings.
///
/// Built once at startup (usually via [`crate::CacheConfig::security_config`])
/// and copied into the [`super::SecurityManager`]. `Debug` output never
/// contains password values.
#[derive(Clone)]
pub struct SecurityConfig {
    pub auth_password: Option<String>,
    pub acl_username: Option<String>,
    pub acl_password: Option<String>,
    pub tls_enabled: bool,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_verify_mode: TlsVerifyMode,
    /// Bounds each connection attempt, TLS handshake and AUTH included
    pub connection_timeout: Duration,
    /// Total connection attempts before giving up
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt
    pub retry_delay: Duration,
    /// Cap for the doubled delay
    pub max_retry_delay: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            auth_password: None,
            acl_username: None,
            acl_password: None,
            tls_enabled: false,
            tls_cert_path: None,
            tls_key_path: None,
            tls_ca_path: None,
            tls_verify_mode: TlsVerifyMode::default(),
            connection_timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(5),
        }
    }
}

impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("auth_password", &self.auth_password.as_ref().map(|_| "***"))
            .field("acl_username", &self.acl_username)
            .field("acl_password", &self.acl_password.as_ref().map(|_| "***"))
            .field("tls_enabled", &self.tls_enabled)
            .field("tls_cert_path", &self.tls_cert_path)
            .field("tls_key_path", &self.tls_key_path)
            .field("tls_ca_path", &self.tls_ca_path)
            .field("tls_verify_mode", &self.tls_verify_mode)
            .field("connection_timeout", &self.connection_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("max_retry_delay", &self.max_retry_delay)
            .finish()
    }
}

impl SecurityConfig {
    /// Reject combinations that can never produce a working connection.
    pub fn validate(&self) -> Result<(), SecurityError> {
        if self.auth_password.as_deref() == Some("") {
            return Err(SecurityError::Configuration("auth_password must not be empty".into()));
        }
        match (&self.acl_username, &self.acl_password) {
            (Some(user), Some(pass)) => {
                if user.is_empty() || pass.is_empty() {
                    return Err(SecurityError::Configuration(
                        "acl_username and acl_password must not be empty".into(),
                    ));
                }
            }
            (Some(_), None) => {
                return Err(SecurityError::Configuration(
                    "acl_username is set but acl_password is missing".into(),
                ));
            }
            (None, Some(_)) => {
                return Err(SecurityError::Configuration(
                    "acl_password is set but acl_username is missing".into(),
                ));
            }
            (None, None) => {}
        }

        if self.max_retries == 0 {
            return Err(SecurityError::Configuration("max_retries must be at least 1".into()));
        }
        if self.connection_timeout.is_zero() {
            return Err(SecurityError::Configuration("connection_timeout must be non-zero".into()));
        }

        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(_), None) => {
                return Err(SecurityError::Configuration(
                    "tls_cert_path is set but tls_key_path is missing".into(),
                ));
            }
            (None, Some(_)) => {
                return Err(SecurityError::Configuration(
                    "tls_key_path is set but tls_cert_path is missing".into(),
                ));
            }
            _ => {}
        }

        if self.tls_enabled {
            for (name, path) in [
                ("tls_cert_path", &self.tls_cert_path),
                ("tls_key_path", &self.tls_key_path),
                ("tls_ca_path", &self.tls_ca_path),
            ] {
                if let Some(path) = path {
                    if !path.exists() {
                        return Err(SecurityError::Configuration(format!(
                            "{} does not exist: {}",
                            name,
                            path.display()
                        )));
                    }
                }
            }
        } else {
            if self.tls_cert_path.is_some() || self.tls_ca_path.is_some() {
                warn!("TLS certificate paths configured but tls_enabled is false; they will be ignored");
            }
            if self.has_credentials() {
                warn!(
                    auth = self.auth_method_label(),
                    "Credentials configured without TLS; they will cross the network unencrypted"
                );
            }
        }

        Ok(())
    }

    /// True when AUTH or ACL credentials are configured.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.auth_password.is_some() || self.acl_username.is_some()
    }

    /// `"ACL"`, `"AUTH"` or `"none"`.
    #[must_use]
    pub fn auth_method_label(&self) -> &'static str {
        if self.acl_username.is_some() {
            "ACL"
        } else if self.auth_password.is_some() {
            "AUTH"
        } else {
            "none"
        }
    }

    /// Mask every configured secret inside `text`.
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in [&self.auth_password, &self.acl_password].into_iter().flatten() {
            if !secret.is_empty() {
                out = out.replace(secret.as_str(), "***");
            }
        }
        out
    }

    /// Retry policy for connection establishment.
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            initial_delay: self.retry_delay,
            max_delay: self.max_retry_delay.max(self.retry_delay),
            factor: 2.0,
            max_retries: Some(self.max_retries.max(1) as usize),
        }
    }
}

/// Strip `user:password@` from a connection URL so it can be logged.
#[must_use]
pub fn sanitize_address(address: &str) -> String {
    let (scheme, rest) = match address.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, address),
    };
    let host_part = match rest.rsplit_once('@') {
        Some((_, host)) => host,
        None => rest,
    };
    match scheme {
        Some(scheme) => format!("{}://{}", scheme, host_part),
        None => host_part.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SecurityConfig::default().validate().is_ok());
    }

    #[test]
    fn test_acl_requires_both_halves() {
        let config = SecurityConfig {
            acl_username: Some("cache".into()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SecurityError::Configuration(_))));

        let config = SecurityConfig {
            acl_password: Some("secret".into()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SecurityError::Configuration(_))));
    }

    #[test]
    fn test_tls_missing_cert_file_is_fatal() {
        let config = SecurityConfig {
            tls_enabled: true,
            tls_ca_path: Some(PathBuf::from("/definitely/not/here/ca.pem")),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tls_ca_path"));
    }

    #[test]
    fn test_client_cert_requires_key() {
        let config = SecurityConfig {
            tls_cert_path: Some(PathBuf::from("client.pem")),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SecurityError::Configuration(_))));
    }

    #[test]
    fn test_tls_with_existing_files_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("ca.pem");
        std::fs::write(&ca, b"-----BEGIN CERTIFICATE-----").unwrap();

        let config = SecurityConfig {
            tls_enabled: true,
            tls_ca_path: Some(ca),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_retries_rejected() {
        let config = SecurityConfig { max_retries: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_without_tls_permitted() {
        let config = SecurityConfig {
            auth_password: Some("hunter2".into()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_hides_passwords() {
        let config = SecurityConfig {
            auth_password: Some("hunter2".into()),
            acl_username: Some("cache".into()),
            acl_password: Some("s3cr3t-acl".into()),
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("s3cr3t-acl"));
        assert!(debug.contains("cache"));
    }

    #[test]
    fn test_redact() {
        let config = SecurityConfig {
            auth_password: Some("hunter2".into()),
            ..Default::default()
        };
        assert_eq!(config.redact("WRONGPASS hunter2 rejected"), "WRONGPASS *** rejected");
    }

    #[test]
    fn test_sanitize_address() {
        assert_eq!(sanitize_address("redis://:pw@localhost:6379/0"), "redis://localhost:6379/0");
        assert_eq!(sanitize_address("rediss://user:pw@cache.internal"), "rediss://cache.internal");
        assert_eq!(sanitize_address("localhost:6379"), "localhost:6379");
    }

    #[test]
    fn test_retry_config_mapping() {
        let config = SecurityConfig {
            max_retries: 4,
            retry_delay: Duration::from_millis(250),
            max_retry_delay: Duration::from_secs(2),
            ..Default::default()
        };
        let retry = config.retry_config();
        assert_eq!(retry.max_retries, Some(4));
        assert_eq!(retry.initial_delay, Duration::from_millis(250));
        assert_eq!(retry.max_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_verify_mode_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: TlsVerifyMode,
        }
        let parsed: Wrapper = toml::from_str("mode = \"peer_and_host\"").unwrap();
        assert_eq!(parsed.mode, TlsVerifyMode::PeerAndHost);
        let parsed: Wrapper = toml::from_str("mode = \"none\"").unwrap();
        assert_eq!(parsed.mode, TlsVerifyMode::None);
    }
}
