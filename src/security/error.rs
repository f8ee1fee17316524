// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;
use thiserror::Error;

/// Errors from building or validating a secure connection.
///
/// Messages never contain credential values.
#[derive(Error, Debug, Clone)]
pub enum SecurityError {
    /// Invalid security settings (fatal at startup)
    #[error("invalid security configuration: {0}")]
    Configuration(String),

    /// AUTH or ACL credentials rejected
    #[error("{method} authentication rejected after {attempts} attempt(s)")]
    Authentication { method: &'static str, attempts: usize },

    /// Certificate or verification failure
    #[error("TLS handshake failed: {reason}")]
    TlsHandshake { reason: String },

    /// A single attempt exceeded the connection timeout
    #[error("connection attempt timed out after {after:?}")]
    Timeout { after: Duration },

    /// Transport-level failure (refused, reset, DNS)
    #[error("connection failed: {0}")]
    Connection(String),

    /// Every allowed attempt failed
    #[error("gave up after {attempts} attempt(s): {last}")]
    ExhaustedRetries {
        attempts: usize,
        last: Box<SecurityError>,
    },
}

impl SecurityError {
    /// True for failures that point at a misconfiguration rather than an outage.
    #[must_use]
    pub fn is_misconfiguration(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Authentication { .. } | Self::TlsHandshake { .. }
        )
    }
}
