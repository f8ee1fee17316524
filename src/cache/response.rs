// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Operation-result cache built on a shared [`TieredCache`].
//!
//! Keys come from a [`KeyGenerator`], so callers address entries by
//! operation name and request parameters rather than by raw key.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tiered_cache::{CacheConfig, ResponseCache, TieredCache};
//!
//! # async fn example() -> Result<(), tiered_cache::CacheError> {
//! let cache = Arc::new(TieredCache::start(CacheConfig::default()).await?);
//! let responses = ResponseCache::new(Arc::clone(&cache));
//!
//! let params = [("text", "hello world"), ("lang", "en")];
//! let summary: String = responses
//!     .cached_json("summarize", &params, || async {
//!         Ok::<_, tiered_cache::CacheError>("hello".to_string())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::{CacheError, TieredCache};
use crate::key::KeyGenerator;

/// Caches results of named operations.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    cache: Arc<TieredCache>,
    keys: KeyGenerator,
    ttl: Duration,
}

impl ResponseCache {
    /// Keys hashed at the cache's `key_hash_threshold`; entries live for
    /// the L1 default TTL.
    pub fn new(cache: Arc<TieredCache>) -> Self {
        let keys = KeyGenerator::new("", cache.config().key_hash_threshold);
        let ttl = cache.config().l1_default_ttl();
        Self { cache, keys, ttl }
    }

    #[must_use]
    pub fn with_key_generator(mut self, keys: KeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn inner(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn key<K, V>(&self, operation: &str, params: &[(K, V)]) -> Result<String, CacheError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Ok(self.keys.generate_key(params, operation)?)
    }

    pub async fn get<K, V>(&self, operation: &str, params: &[(K, V)]) -> Result<Option<Vec<u8>>, CacheError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let key = self.key(operation, params)?;
        self.cache.get(&key).await
    }

    pub async fn put<K, V>(&self, operation: &str, params: &[(K, V)], value: Vec<u8>) -> Result<(), CacheError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let key = self.key(operation, params)?;
        self.cache.set(&key, value, self.ttl).await
    }

    /// Read a JSON value. An entry that no longer deserializes as `T` is
    /// dropped and reported as a miss.
    pub async fn get_json<T, K, V>(&self, operation: &str, params: &[(K, V)]) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let key = self.key(operation, params)?;
        let Some(bytes) = self.cache.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(operation, error = %e, "Cached response has an unexpected shape, dropping it");
                crate::metrics::record_codec_error("json");
                if let Err(e) = self.cache.delete(&key).await {
                    debug!(error = %e, "Could not drop stale response");
                }
                Ok(None)
            }
        }
    }

    pub async fn put_json<T, K, V>(&self, operation: &str, params: &[(K, V)], value: &T) -> Result<(), CacheError>
    where
        T: Serialize + ?Sized,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.put(operation, params, bytes).await
    }

    /// Return the cached result for `(operation, params)`, or run `compute`
    /// and cache what it returns.
    ///
    /// A failed remote write after `compute` is logged, not returned; the
    /// value is still in L1.
    pub async fn cached_json<T, K, V, F, Fut, E>(
        &self,
        operation: &str,
        params: &[(K, V)],
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        K: AsRef<str>,
        V: AsRef<str>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheError>,
    {
        if let Some(hit) = self.get_json(operation, params).await? {
            debug!(operation, "Response cache hit");
            return Ok(hit);
        }

        let value = compute().await?;
        match self.put_json(operation, params, &value).await {
            Ok(()) => {}
            Err(e @ CacheError::RemoteWrite { .. }) => {
                warn!(operation, error = %e, "Response cached locally only");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(value)
    }

    pub async fn invalidate<K, V>(&self, operation: &str, params: &[(K, V)]) -> Result<(), CacheError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let key = self.key(operation, params)?;
        self.cache.delete(&key).await
    }
}
