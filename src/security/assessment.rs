// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Security posture scoring.
//!
//! Weights (sum 100): authentication 30, ACL identity 20, TLS 30,
//! certificate verification 15, hostname verification 5.
//!
//! Two caps keep the bands honest:
//! - no authentication: at most 29 (Insecure)
//! - anything short of ACL + TLS + verified certificate: at most 79 (Standard)

use super::types::{
    AuthMethod, NegotiatedSecurity, SecurityValidationResult, Severity, Vulnerability,
    VulnerabilityKind,
};

const WEIGHT_AUTH: u8 = 30;
const WEIGHT_ACL: u8 = 20;
const WEIGHT_TLS: u8 = 30;
const WEIGHT_CERT_VERIFY: u8 = 15;
const WEIGHT_HOST_VERIFY: u8 = 5;

const CAP_UNAUTHENTICATED: u8 = 29;
const CAP_BELOW_COMPREHENSIVE: u8 = 79;

/// Weighted score for a set of negotiated properties.
#[must_use]
pub fn score(negotiated: &NegotiatedSecurity) -> u8 {
    let mut score = 0u8;
    if negotiated.auth_active() {
        score += WEIGHT_AUTH;
    }
    if negotiated.acl_active() {
        score += WEIGHT_ACL;
    }
    if negotiated.tls_active() {
        score += WEIGHT_TLS;
    }
    if negotiated.certificate_verified() {
        score += WEIGHT_CERT_VERIFY;
    }
    if negotiated.hostname_verified() {
        score += WEIGHT_HOST_VERIFY;
    }

    if !negotiated.auth_active() {
        score = score.min(CAP_UNAUTHENTICATED);
    }
    let comprehensive = negotiated.acl_active()
        && negotiated.tls_active()
        && negotiated.certificate_verified();
    if !comprehensive {
        score = score.min(CAP_BELOW_COMPREHENSIVE);
    }
    score
}

/// Score the connection and list every missing control with a fix.
#[must_use]
pub fn assess(negotiated: &NegotiatedSecurity, checked_at: i64) -> SecurityValidationResult {
    let mut vulnerabilities = Vec::new();
    let mut recommendations = Vec::new();
    let mut flag = |kind, severity, description: &str, recommendation: &str| {
        vulnerabilities.push(Vulnerability {
            kind,
            severity,
            description: description.to_string(),
        });
        recommendations.push(recommendation.to_string());
    };

    match negotiated.auth {
        AuthMethod::None => flag(
            VulnerabilityKind::NoAuthentication,
            Severity::Critical,
            "Remote store accepts unauthenticated connections",
            "Configure an ACL user (acl_username/acl_password) or at least an AUTH password (auth_password)",
        ),
        AuthMethod::Password => flag(
            VulnerabilityKind::NoAclGranularity,
            Severity::Medium,
            "Password-only AUTH grants the default user's full permissions",
            "Create a dedicated ACL user limited to the cache key space and commands, then set acl_username/acl_password",
        ),
        AuthMethod::Acl { .. } => {}
    }

    if !negotiated.tls_active() {
        flag(
            VulnerabilityKind::NoEncryption,
            Severity::High,
            "Traffic to the remote store is not encrypted",
            "Enable TLS (tls_enabled = true) and connect with a rediss:// URL",
        );
        if negotiated.auth_active() {
            flag(
                VulnerabilityKind::CredentialsOverPlaintext,
                Severity::High,
                "Credentials are sent over an unencrypted channel",
                "Enable TLS before sending AUTH/ACL credentials",
            );
        }
    } else if !negotiated.certificate_verified() {
        flag(
            VulnerabilityKind::CertificateVerificationDisabled,
            Severity::Medium,
            "Server certificate is not verified; the connection is open to interception",
            "Set tls_verify_mode = \"peer_and_host\" and provide tls_ca_path if the server uses a private CA",
        );
    } else if !negotiated.hostname_verified() {
        flag(
            VulnerabilityKind::HostnameVerificationDisabled,
            Severity::Low,
            "Server certificate chain is verified but its host name is not",
            "Set tls_verify_mode = \"peer_and_host\"",
        );
    }

    SecurityValidationResult::new(
        score(negotiated),
        vulnerabilities,
        recommendations,
        checked_at,
        negotiated.clone(),
    )
}
