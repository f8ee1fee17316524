// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the security manager.

use serde::Serialize;

use super::config::TlsVerifyMode;

/// Connection establishment state.
///
/// ```text
/// Disconnected → Connecting → Connected (TLS done) → Authenticating → Ready
///                     ↑                                   │
///                     └───────────── Failed ←─────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Ready,
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// How the connection authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AuthMethod {
    None,
    /// Password-only AUTH
    Password,
    /// Username-scoped ACL identity
    Acl { username: String },
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Password => write!(f, "AUTH password"),
            Self::Acl { username } => write!(f, "ACL user '{}'", username),
        }
    }
}

/// TLS properties of an established connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TlsDetails {
    pub verify_mode: TlsVerifyMode,
    /// Custom CA bundle in use (otherwise system roots)
    pub custom_ca: bool,
    /// Client certificate presented (mutual TLS)
    pub client_certificate: bool,
}

/// What a live connection actually negotiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NegotiatedSecurity {
    pub auth: AuthMethod,
    pub tls: Option<TlsDetails>,
}

impl NegotiatedSecurity {
    /// Plaintext, unauthenticated connection.
    #[must_use]
    pub fn plaintext() -> Self {
        Self { auth: AuthMethod::None, tls: None }
    }

    #[must_use]
    pub fn auth_active(&self) -> bool {
        !matches!(self.auth, AuthMethod::None)
    }

    #[must_use]
    pub fn acl_active(&self) -> bool {
        matches!(self.auth, AuthMethod::Acl { .. })
    }

    #[must_use]
    pub fn tls_active(&self) -> bool {
        self.tls.is_some()
    }

    #[must_use]
    pub fn certificate_verified(&self) -> bool {
        self.tls
            .as_ref()
            .is_some_and(|tls| tls.verify_mode != TlsVerifyMode::None)
    }

    #[must_use]
    pub fn hostname_verified(&self) -> bool {
        self.tls
            .as_ref()
            .is_some_and(|tls| tls.verify_mode == TlsVerifyMode::PeerAndHost)
    }
}

/// Coarse security band derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum SecurityLevel {
    /// 0-29
    Insecure,
    /// 30-59
    Basic,
    /// 60-79
    Standard,
    /// 80-100
    Comprehensive,
}

impl SecurityLevel {
    #[must_use]
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=29 => Self::Insecure,
            30..=59 => Self::Basic,
            60..=79 => Self::Standard,
            _ => Self::Comprehensive,
        }
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insecure => write!(f, "Insecure"),
            Self::Basic => write!(f, "Basic"),
            Self::Standard => write!(f, "Standard"),
            Self::Comprehensive => write!(f, "Comprehensive"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VulnerabilityKind {
    NoAuthentication,
    NoEncryption,
    CredentialsOverPlaintext,
    CertificateVerificationDisabled,
    HostnameVerificationDisabled,
    NoAclGranularity,
}

/// A missing or weakened control found on a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vulnerability {
    pub kind: VulnerabilityKind,
    pub severity: Severity,
    pub description: String,
}

/// Outcome of one security validation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityValidationResult {
    score: u8,
    level: SecurityLevel,
    vulnerabilities: Vec<Vulnerability>,
    recommendations: Vec<String>,
    checked_at: i64,
    negotiated: NegotiatedSecurity,
}

impl SecurityValidationResult {
    pub(crate) fn new(
        score: u8,
        vulnerabilities: Vec<Vulnerability>,
        recommendations: Vec<String>,
        checked_at: i64,
        negotiated: NegotiatedSecurity,
    ) -> Self {
        let score = score.min(100);
        Self {
            score,
            level: SecurityLevel::from_score(score),
            vulnerabilities,
            recommendations,
            checked_at,
            negotiated,
        }
    }

    /// 0-100
    #[must_use]
    pub fn score(&self) -> u8 {
        self.score
    }

    #[must_use]
    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    #[must_use]
    pub fn vulnerabilities(&self) -> &[Vulnerability] {
        &self.vulnerabilities
    }

    #[must_use]
    pub fn recommendations(&self) -> &[String] {
        &self.recommendations
    }

    /// Epoch millis
    #[must_use]
    pub fn checked_at(&self) -> i64 {
        self.checked_at
    }

    /// The connection properties the score was computed from.
    #[must_use]
    pub fn negotiated(&self) -> &NegotiatedSecurity {
        &self.negotiated
    }

    #[must_use]
    pub fn has_critical(&self) -> bool {
        self.vulnerabilities.iter().any(|v| v.severity == Severity::Critical)
    }
}

/// Cheap point-in-time view of the manager for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    /// Auth method of the live connection, or the configured one if none
    pub auth_method: AuthMethod,
    pub tls_enabled: bool,
    pub connection_id: Option<String>,
    /// Remote address with credentials stripped
    pub address: Option<String>,
    /// Epoch millis of the last validation
    pub last_validated_at: Option<i64>,
    pub last_score: Option<u8>,
    pub last_level: Option<SecurityLevel>,
}
