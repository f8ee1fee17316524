// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deterministic cache-key construction.
//!
//! Keys are built from an operation name plus a parameter set. Parameters are
//! sorted by name (then value) and serialized as a JSON array of pairs, which
//! keeps the canonical text unambiguous no matter what characters the values
//! contain. Canonical text longer than the hash threshold is replaced by its
//! SHA-256 digest behind a `hash:` marker.
//!
//! # Example
//!
//! ```
//! use tiered_cache::KeyGenerator;
//!
//! let keys = KeyGenerator::default();
//!
//! let short = keys.generate_key(&[("text", "hi")], "summarize").unwrap();
//! assert_eq!(short, r#"summarize:[["text","hi"]]"#);
//!
//! let long_text = "A".repeat(2000);
//! let long = keys.generate_key(&[("text", long_text.as_str())], "summarize").unwrap();
//! assert!(long.starts_with("summarize:hash:"));
//! assert!(long.len() < 200);
//! ```

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Canonical text longer than this is hashed (bytes)
pub const DEFAULT_HASH_THRESHOLD: usize = 1000;

/// Marker placed in front of hashed key bodies
pub const HASH_MARKER: &str = "hash:";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("operation name must not be empty")]
    EmptyOperation,
}

/// Builds stable cache keys from request parameters.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    prefix: String,
    hash_threshold: usize,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new("", DEFAULT_HASH_THRESHOLD)
    }
}

impl KeyGenerator {
    /// Create a generator. `prefix` namespaces every key (e.g. `"app:"`).
    pub fn new(prefix: impl Into<String>, hash_threshold: usize) -> Self {
        Self {
            prefix: prefix.into(),
            hash_threshold,
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn hash_threshold(&self) -> usize {
        self.hash_threshold
    }

    /// Build the key for `operation` applied to `params`.
    ///
    /// Parameter order does not matter; duplicate names are kept.
    pub fn generate_key<K, V>(&self, params: &[(K, V)], operation: &str) -> Result<String, KeyError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let operation = operation.trim();
        if operation.is_empty() {
            return Err(KeyError::EmptyOperation);
        }

        let canonical = canonical_text(params, operation);
        if canonical.len() > self.hash_threshold {
            let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
            Ok(format!("{}{}:{}{}", self.prefix, operation, HASH_MARKER, digest))
        } else {
            Ok(format!("{}{}", self.prefix, canonical))
        }
    }
}

/// `operation:[[name,value],...]` with pairs sorted by name then value.
fn canonical_text<K, V>(params: &[(K, V)], operation: &str) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (k.as_ref(), v.as_ref()))
        .collect();
    pairs.sort_unstable();

    // Serializing a Vec of &str tuples cannot fail
    let body = serde_json::to_string(&pairs).unwrap_or_default();
    format!("{}:{}", operation, body)
}
