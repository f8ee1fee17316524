// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public cache operations: get, set, delete, exists.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{debug, warn};

use super::types::ServedBy;
use super::{CacheError, RemoteFailure, TieredCache};
use crate::entry::CacheEntry;
use crate::metrics::{self, LatencyTimer};
use crate::storage::local::{validate_key, Lookup};

impl TieredCache {
    /// Look up `key`, L1 first.
    ///
    /// Remote outages, an open circuit and undecodable remote entries all
    /// read as a miss. Only a malformed key is an error.
    ///
    /// A remote hit refills L1 only if no `set` or `delete` of the key ran
    /// while the remote read was in flight.
    #[tracing::instrument(skip(self), fields(tier))]
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        validate_key(key)?;
        let _timer = LatencyTimer::new("cache", "get");

        let fill = match self.l1.get_or_begin_fill(key)? {
            Lookup::Hit(value) => {
                record_served(ServedBy::L1);
                metrics::record_operation("l1", "get", "hit");
                return Ok(Some(value));
            }
            Lookup::Miss(fill) => fill,
        };
        metrics::record_operation("l1", "get", "miss");

        let remote_key = self.remote_key(key);
        let found = match self
            .remote_call("get", move |store| async move { store.get(&remote_key).await })
            .await
        {
            Ok(found) => found,
            Err(RemoteFailure::Offline) => {
                record_served(ServedBy::Miss);
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "Remote read failed, serving miss");
                record_served(ServedBy::Miss);
                return Ok(None);
            }
        };

        let Some(entry) = found else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            record_served(ServedBy::Miss);
            return Ok(None);
        };

        let remaining = entry.ttl;
        let entry = match self.codec.decode(entry) {
            Ok(entry) => entry,
            Err(e) => {
                self.counters.codec_errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_codec_error("decode");
                warn!(error = %e, "Undecodable remote entry, treating as miss");
                record_served(ServedBy::Miss);
                return Ok(None);
            }
        };

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_bytes_read("remote", entry.size_bytes);
        record_served(ServedBy::Remote);

        // L1 never outlives the remote copy
        let l1_ttl = remaining.min(self.l1.default_ttl());
        if !l1_ttl.is_zero() && !fill.commit(entry.value.clone(), l1_ttl) {
            metrics::record_operation("l1", "fill", "superseded");
        }
        Ok(Some(entry.value))
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// L1 is written first and kept even if the remote write fails; that
    /// failure comes back as the non-fatal [`CacheError::RemoteWrite`].
    /// With no live connection or an open circuit the write is L1-only and
    /// returns `Ok`.
    #[tracing::instrument(skip(self, value), fields(len = value.len()))]
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        validate_key(key)?;
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl("ttl must be non-zero".into()));
        }
        let _timer = LatencyTimer::new("cache", "set");

        self.l1.set(key, value.clone(), Some(ttl))?;
        metrics::record_operation("l1", "set", "success");

        let entry = CacheEntry::new(self.remote_key(key), value, ttl);
        let entry = self.codec.encode(entry).map_err(|e| {
            metrics::record_codec_error("encode");
            warn!(error = %e, "Compression failed, remote write skipped");
            CacheError::RemoteWrite { key: key.to_string(), reason: e.to_string() }
        })?;
        let stored_bytes = entry.value.len();

        match self
            .remote_call("set", move |store| async move { store.set(&entry).await })
            .await
        {
            Ok(()) => {
                metrics::record_bytes_written("remote", stored_bytes);
                Ok(())
            }
            Err(RemoteFailure::Offline) => Ok(()),
            Err(RemoteFailure::CircuitOpen) => {
                debug!("Remote write skipped, circuit open");
                Ok(())
            }
            Err(RemoteFailure::Error(e)) => {
                warn!(error = %e, "Remote write failed, value kept in L1");
                Err(CacheError::RemoteWrite { key: key.to_string(), reason: e.to_string() })
            }
        }
    }

    /// Remove `key` from both tiers.
    ///
    /// L1 is always cleared, both before and after the remote delete. A failed
    /// remote delete is reported as [`CacheError::RemoteWrite`]; the remote
    /// copy then lives until its TTL.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        validate_key(key)?;
        let _timer = LatencyTimer::new("cache", "delete");

        self.l1.delete(key)?;
        metrics::record_operation("l1", "delete", "success");

        let remote_key = self.remote_key(key);
        let outcome = match self
            .remote_call("delete", move |store| async move { store.delete(&remote_key).await })
            .await
        {
            Ok(()) | Err(RemoteFailure::Offline) | Err(RemoteFailure::CircuitOpen) => Ok(()),
            Err(RemoteFailure::Error(e)) => {
                warn!(error = %e, "Remote delete failed, copy remains until expiry");
                Err(CacheError::RemoteWrite { key: key.to_string(), reason: e.to_string() })
            }
        };

        // A read that missed L1 meanwhile may have refilled it from the old remote copy
        self.l1.delete(key)?;
        outcome
    }

    /// Whether `key` is live in either tier. Remote failures read as `false`.
    ///
    /// The only error is [`CacheError::InvalidKey`]; for any well-formed key
    /// this always returns `Ok`.
    #[tracing::instrument(skip(self), fields(tier))]
    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        validate_key(key)?;

        if self.l1.exists(key)? {
            record_served(ServedBy::L1);
            return Ok(true);
        }

        let remote_key = self.remote_key(key);
        match self
            .remote_call("exists", move |store| async move { store.exists(&remote_key).await })
            .await
        {
            Ok(found) => {
                record_served(if found { ServedBy::Remote } else { ServedBy::Miss });
                Ok(found)
            }
            Err(e) => {
                debug!(error = %e, "Remote exists check failed");
                record_served(ServedBy::Miss);
                Ok(false)
            }
        }
    }
}

fn record_served(by: ServedBy) {
    tracing::Span::current().record("tier", by.as_str());
}
