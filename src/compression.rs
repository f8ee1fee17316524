// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Size-based compression for the remote tier.
//!
//! Payloads at or above the configured threshold are zstd-compressed before
//! they are written to Redis. The entry's `compressed` flag is the only thing
//! consulted on read; payload bytes are never sniffed for magic headers.
//!
//! L1 always holds plain bytes, so the codec sits between the tiers.
//!
//! # Example
//!
//! ```
//! use tiered_cache::{CacheEntry, compression::Codec};
//! use std::time::Duration;
//!
//! let codec = Codec::new(16, 3);
//! let entry = CacheEntry::new("k", vec![b'x'; 4096], Duration::from_secs(60));
//!
//! let stored = codec.encode(entry.clone()).unwrap();
//! assert!(stored.compressed);
//! assert!(stored.value.len() < 4096);
//!
//! let restored = codec.decode(stored).unwrap();
//! assert_eq!(restored.value, entry.value);
//! ```

use std::io::Read;

use crate::entry::CacheEntry;

/// Default compression level (3 is a good balance of speed/ratio)
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Default size at which values are compressed (bytes)
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Compression error types
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    /// Failed to compress data
    #[error("compression failed: {0}")]
    CompressFailed(String),

    /// Failed to decompress data
    #[error("decompression failed: {0}")]
    DecompressFailed(String),

    /// Decompression produced more bytes than the recorded size; stopped early
    #[error("decoded payload for '{key}' exceeds its recorded size of {limit} bytes")]
    ExceedsRecordedSize { key: String, limit: usize },

    /// Decoded payload length differs from the recorded size
    #[error("decoded size mismatch for '{key}': expected {expected} bytes, got {actual}")]
    SizeMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },
}

/// Compress bytes with a level (1-22).
///
/// Higher levels = smaller output but more CPU.
pub fn compress_bytes_with_level(data: &[u8], level: i32) -> Result<Vec<u8>, CompressionError> {
    zstd::encode_all(data, level)
        .map_err(|e| CompressionError::CompressFailed(e.to_string()))
}

/// Decompress zstd bytes, reading at most `limit + 1` bytes of output.
///
/// The extra byte lets callers tell "exactly `limit`" from "more than `limit`"
/// without inflating the whole frame.
pub fn decompress_bytes(data: &[u8], limit: usize) -> Result<Vec<u8>, CompressionError> {
    let decoder = zstd::stream::read::Decoder::new(data)
        .map_err(|e| CompressionError::DecompressFailed(e.to_string()))?;
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let mut out = Vec::with_capacity(limit.min(data.len().saturating_mul(4)));
    decoder
        .take(cap)
        .read_to_end(&mut out)
        .map_err(|e| CompressionError::DecompressFailed(e.to_string()))?;
    Ok(out)
}

/// Compression statistics for a single operation.
#[derive(Debug, Clone, Copy)]
pub struct CompressionStats {
    /// Original size in bytes
    pub original_bytes: usize,
    /// Compressed size in bytes
    pub compressed_bytes: usize,
    /// Compression ratio (original / compressed)
    pub ratio: f64,
    /// Space saved as percentage (0.0 - 1.0)
    pub savings: f64,
}

impl CompressionStats {
    /// Calculate stats from original and compressed sizes.
    #[must_use]
    pub fn new(original_bytes: usize, compressed_bytes: usize) -> Self {
        let ratio = if compressed_bytes > 0 {
            original_bytes as f64 / compressed_bytes as f64
        } else {
            0.0
        };
        let savings = if original_bytes > 0 {
            1.0 - (compressed_bytes as f64 / original_bytes as f64)
        } else {
            0.0
        };
        Self {
            original_bytes,
            compressed_bytes,
            ratio,
            savings,
        }
    }
}

/// Threshold + level pair applied to entries crossing into the remote tier.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    threshold: usize,
    level: i32,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_THRESHOLD, DEFAULT_COMPRESSION_LEVEL)
    }
}

impl Codec {
    /// A threshold of 0 compresses every value.
    pub fn new(threshold: usize, level: i32) -> Self {
        Self { threshold, level }
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    #[must_use]
    pub fn level(&self) -> i32 {
        self.level
    }

    #[inline]
    #[must_use]
    pub fn should_compress(&self, len: usize) -> bool {
        len >= self.threshold
    }

    /// Compress the entry if it is large enough. `size_bytes` keeps the
    /// original length either way.
    pub fn encode(&self, entry: CacheEntry) -> Result<CacheEntry, CompressionError> {
        if entry.compressed || !self.should_compress(entry.value.len()) {
            return Ok(entry);
        }

        let compressed = compress_bytes_with_level(&entry.value, self.level)?;
        let stats = CompressionStats::new(entry.value.len(), compressed.len());
        crate::metrics::record_compression(&stats);

        Ok(CacheEntry {
            value: compressed,
            compressed: true,
            ..entry
        })
    }

    /// Undo [`encode`](Self::encode). Uncompressed entries pass through after
    /// the size check.
    ///
    /// Output is bounded by the entry's recorded `size_bytes`.
    pub fn decode(&self, entry: CacheEntry) -> Result<CacheEntry, CompressionError> {
        let value = if entry.compressed {
            let value = decompress_bytes(&entry.value, entry.size_bytes)?;
            if value.len() > entry.size_bytes {
                return Err(CompressionError::ExceedsRecordedSize {
                    key: entry.key,
                    limit: entry.size_bytes,
                });
            }
            value
        } else {
            entry.value
        };

        if value.len() != entry.size_bytes {
            return Err(CompressionError::SizeMismatch {
                key: entry.key,
                expected: entry.size_bytes,
                actual: value.len(),
            });
        }

        Ok(CacheEntry {
            value,
            compressed: false,
            ..entry
        })
    }
}
