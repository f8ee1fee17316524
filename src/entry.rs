// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache entry data structure.
//!
//! A [`CacheEntry`] is the unit each tier stores. Tiers never share an entry by
//! reference: L1 keeps its own clone, and the remote tier keeps whatever bytes
//! were written over the wire.

use std::time::Duration;
use serde::{Deserialize, Serialize};

/// A single cached value plus the metadata needed to decode it.
///
/// # Example
///
/// ```
/// use tiered_cache::CacheEntry;
/// use std::time::Duration;
///
/// let entry = CacheEntry::new("summary:42", b"hello".to_vec(), Duration::from_secs(60));
///
/// assert_eq!(entry.size_bytes, 5);
/// assert!(!entry.compressed);
/// assert!(entry.is_consistent());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Fully qualified cache key
    pub key: String,
    /// Stored bytes (compressed bytes when `compressed` is set)
    pub value: Vec<u8>,
    /// Time to live. On entries read back from the remote tier this is the
    /// remaining TTL reported by the store.
    pub ttl: Duration,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
    /// Whether `value` went through the compressor
    pub compressed: bool,
    /// Length of the original, uncompressed payload
    pub size_bytes: usize,
}

impl CacheEntry {
    /// Create an uncompressed entry stamped with the current time.
    pub fn new(key: impl Into<String>, value: Vec<u8>, ttl: Duration) -> Self {
        let size_bytes = value.len();
        Self {
            key: key.into(),
            value,
            ttl,
            created_at: epoch_millis(),
            compressed: false,
            size_bytes,
        }
    }

    /// Rebuild an entry from its stored parts (used by remote backends).
    pub fn reconstruct(
        key: String,
        value: Vec<u8>,
        ttl: Duration,
        created_at: i64,
        compressed: bool,
        size_bytes: usize,
    ) -> Self {
        Self { key, value, ttl, created_at, compressed, size_bytes }
    }

    /// True when an uncompressed entry's recorded size matches its payload.
    ///
    /// Compressed entries are only checked after decoding, so this returns
    /// `true` for them unconditionally.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.compressed || self.size_bytes == self.value.len()
    }
}

/// Current wall-clock time as epoch millis.
pub(crate) fn epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_records_size() {
        let entry = CacheEntry::new("k", vec![1, 2, 3, 4], Duration::from_secs(1));
        assert_eq!(entry.size_bytes, 4);
        assert!(!entry.compressed);
        assert!(entry.created_at > 0);
        assert!(entry.is_consistent());
    }

    #[test]
    fn test_inconsistent_entry_detected() {
        let entry = CacheEntry::reconstruct(
            "k".into(), vec![1, 2], Duration::from_secs(1), 0, false, 10,
        );
        assert!(!entry.is_consistent());
    }
}
