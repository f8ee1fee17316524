// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Plain-text security report.

use std::fmt;

use super::types::{AuthMethod, SecurityValidationResult};

/// Human-readable view of a validation result.
///
/// Never includes credential values; only the auth method and ACL user name.
pub struct SecurityReport<'a> {
    result: &'a SecurityValidationResult,
}

impl<'a> SecurityReport<'a> {
    #[must_use]
    pub fn new(result: &'a SecurityValidationResult) -> Self {
        Self { result }
    }
}

/// Render a validation result as a report string.
#[must_use]
pub fn render(result: &SecurityValidationResult) -> String {
    SecurityReport::new(result).to_string()
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "NO" }
}

impl fmt::Display for SecurityReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = self.result;
        let negotiated = result.negotiated();

        writeln!(f, "Remote Store Security Report")?;
        writeln!(f, "============================")?;
        writeln!(f, "Score:          {}/100", result.score())?;
        writeln!(f, "Level:          {}", result.level())?;
        writeln!(f, "Checked at:     {} (epoch ms)", result.checked_at())?;
        writeln!(f)?;

        match &negotiated.auth {
            AuthMethod::None => writeln!(f, "Authentication: DISABLED")?,
            method => writeln!(f, "Authentication: enabled ({})", method)?,
        }

        match &negotiated.tls {
            Some(tls) => {
                writeln!(f, "Encryption:     TLS enabled")?;
                writeln!(f, "  Verification:       {}", tls.verify_mode)?;
                writeln!(f, "  Certificate check:  {}", yes_no(negotiated.certificate_verified()))?;
                writeln!(f, "  Hostname check:     {}", yes_no(negotiated.hostname_verified()))?;
                writeln!(
                    f,
                    "  Trust roots:        {}",
                    if tls.custom_ca { "custom CA bundle" } else { "system roots" }
                )?;
                writeln!(
                    f,
                    "  Client certificate: {}",
                    if tls.client_certificate { "presented (mutual TLS)" } else { "none" }
                )?;
            }
            None => writeln!(f, "Encryption:     DISABLED (plaintext)")?,
        }

        writeln!(f)?;
        if result.vulnerabilities().is_empty() {
            writeln!(f, "Vulnerabilities: none found")?;
        } else {
            writeln!(f, "Vulnerabilities ({}):", result.vulnerabilities().len())?;
            for vuln in result.vulnerabilities() {
                writeln!(f, "  [{}] {}", vuln.severity, vuln.description)?;
            }
        }

        if !result.recommendations().is_empty() {
            writeln!(f)?;
            writeln!(f, "Recommendations:")?;
            for (i, rec) in result.recommendations().iter().enumerate() {
                writeln!(f, "  {}. {}", i + 1, rec)?;
            }
        }
        Ok(())
    }
}
