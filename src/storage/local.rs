// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process L1 tier: bounded LRU with per-entry TTL.
//!
//! Recency is tracked with a monotonically increasing tick per access; the
//! `BTreeMap<tick, key>` index makes the least-recently-used key its first
//! element. Every operation is a handful of map updates under one
//! `parking_lot::Mutex`, so callers never suspend.
//!
//! Expiry is lazy: `get`/`exists` drop dead entries as they find them, and
//! [`LocalTierCache::purge_expired`] sweeps the rest on demand.
//!
//! Refills from a slower tier go through [`LocalTierCache::get_or_begin_fill`]. Any
//! `set`, `delete` or `clear` that lands while the fill is in flight bumps the
//! key's write generation, and the stale fill is then discarded.
//!
//! # Example
//!
//! ```
//! use tiered_cache::LocalTierCache;
//! use std::time::Duration;
//!
//! let l1 = LocalTierCache::new(2, Duration::from_secs(60));
//! l1.set("a", b"1".to_vec(), None).unwrap();
//! l1.set("b", b"2".to_vec(), None).unwrap();
//! l1.get("a").unwrap();                       // "a" is now most recent
//! l1.set("c", b"3".to_vec(), None).unwrap();  // evicts "b"
//!
//! assert!(l1.exists("a").unwrap());
//! assert!(!l1.exists("b").unwrap());
//! ```

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use super::traits::StorageError;

/// Longest key accepted by either tier.
pub const MAX_KEY_LENGTH: usize = 4096;

/// Reject keys no tier should store.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key must not be empty".into()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(StorageError::InvalidKey(format!(
            "key is {} bytes, limit is {}",
            key.len(),
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

/// `now + ttl`, saturating for effectively unbounded TTLs.
pub(crate) fn deadline(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE)
}

const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

struct Slot {
    value: Vec<u8>,
    expires_at: Instant,
    tick: u64,
}

/// Write generation of a key with at least one refill in flight.
struct PendingFill {
    generation: u64,
    readers: usize,
}

#[derive(Default)]
struct LruState {
    map: HashMap<String, Slot>,
    order: BTreeMap<u64, String>,
    fills: HashMap<String, PendingFill>,
    next_tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl LruState {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &str) -> Option<Slot> {
        let slot = self.map.remove(key)?;
        self.order.remove(&slot.tick);
        Some(slot)
    }

    fn lookup(&mut self, key: &str, now: Instant) -> LookupResult {
        let expired = match self.map.get(key) {
            None => {
                self.misses += 1;
                return LookupResult::Miss;
            }
            Some(slot) => now >= slot.expires_at,
        };

        if expired {
            self.remove(key);
            self.expirations += 1;
            self.misses += 1;
            return LookupResult::Expired;
        }

        let tick = self.bump();
        let Some(slot) = self.map.get_mut(key) else {
            return LookupResult::Miss;
        };
        let old_tick = std::mem::replace(&mut slot.tick, tick);
        let value = slot.value.clone();
        self.order.remove(&old_tick);
        self.order.insert(tick, key.to_string());
        self.hits += 1;
        LookupResult::Hit(value)
    }

    fn register_fill(&mut self, key: &str) -> u64 {
        let pending = self
            .fills
            .entry(key.to_string())
            .or_insert(PendingFill { generation: 0, readers: 0 });
        pending.readers += 1;
        pending.generation
    }

    /// A direct write or delete of `key` invalidates in-flight fills.
    fn invalidate_fills(&mut self, key: &str) {
        if let Some(pending) = self.fills.get_mut(key) {
            pending.generation += 1;
        }
    }

    fn release_fill(&mut self, key: &str) {
        if let Some(pending) = self.fills.get_mut(key) {
            pending.readers = pending.readers.saturating_sub(1);
            if pending.readers == 0 {
                self.fills.remove(key);
            }
        }
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.map.remove(&key);
        self.evictions += 1;
        Some(key)
    }
}

enum LookupResult {
    Hit(Vec<u8>),
    Miss,
    Expired,
}

/// Outcome of [`LocalTierCache::get_or_begin_fill`].
pub enum Lookup<'a> {
    Hit(Vec<u8>),
    /// Not in L1; the guard may store what a slower tier returns.
    Miss(FillGuard<'a>),
}

/// L1 counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct L1Stats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Keys with a refill from a slower tier in flight
    pub pending_fills: usize,
}

impl L1Stats {
    /// Hits over lookups (0.0 when nothing was looked up).
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64
    }
}

pub struct LocalTierCache {
    state: Mutex<LruState>,
    max_entries: usize,
    default_ttl: Duration,
}

impl LocalTierCache {
    /// `max_entries` is clamped to at least 1.
    #[must_use]
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(LruState::default()),
            max_entries: max_entries.max(1),
            default_ttl,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a live entry and mark it most recently used.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        let mut state = self.state.lock();
        let lookup = state.lookup(key, Instant::now());
        Ok(Self::after_lookup(state, key, lookup))
    }

    /// [`get`](Self::get), and on a miss start a refill in the same critical
    /// section, so no write can slip between the miss and the refill.
    pub fn get_or_begin_fill(&self, key: &str) -> Result<Lookup<'_>, StorageError> {
        validate_key(key)?;
        let mut state = self.state.lock();
        let lookup = state.lookup(key, Instant::now());
        if let LookupResult::Hit(value) = lookup {
            return Ok(Lookup::Hit(value));
        }
        let generation = state.register_fill(key);
        Self::after_lookup(state, key, lookup);
        Ok(Lookup::Miss(FillGuard {
            cache: self,
            key: key.to_string(),
            generation,
        }))
    }

    fn after_lookup(
        state: parking_lot::MutexGuard<'_, LruState>,
        key: &str,
        lookup: LookupResult,
    ) -> Option<Vec<u8>> {
        match lookup {
            LookupResult::Hit(value) => Some(value),
            LookupResult::Miss => None,
            LookupResult::Expired => {
                let len = state.map.len();
                drop(state);
                debug!(key = %key, "L1 entry expired");
                crate::metrics::record_expiration(1);
                crate::metrics::set_l1_entries(len);
                None
            }
        }
    }

    /// Insert or replace an entry. `ttl` of `None` uses the default TTL.
    ///
    /// When the key is new and the cache is full, the least recently used
    /// entry is evicted first.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), StorageError> {
        validate_key(key)?;
        let expires_at = deadline(ttl.unwrap_or(self.default_ttl));
        let mut state = self.state.lock();
        state.invalidate_fills(key);
        self.insert_locked(state, key, value, expires_at);
        Ok(())
    }

    /// Insert under an already-held lock, evicting if full. Releases the lock.
    fn insert_locked(
        &self,
        mut state: parking_lot::MutexGuard<'_, LruState>,
        key: &str,
        value: Vec<u8>,
        expires_at: Instant,
    ) {
        if let Some(old) = state.remove(key) {
            debug!(key = %key, replaced_bytes = old.value.len(), "L1 entry replaced");
        }

        let mut evicted = None;
        if state.map.len() >= self.max_entries {
            evicted = state.evict_lru();
        }

        let tick = state.bump();
        state.order.insert(tick, key.to_string());
        state.map.insert(key.to_string(), Slot { value, expires_at, tick });
        let len = state.map.len();
        drop(state);

        if let Some(victim) = evicted {
            debug!(key = %victim, "L1 evicted least recently used entry");
            crate::metrics::record_eviction(1);
        }
        crate::metrics::set_l1_entries(len);
    }

    /// Remove an entry. Returns whether one was present (expired or not).
    pub fn delete(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        let mut state = self.state.lock();
        state.invalidate_fills(key);
        let removed = state.remove(key).is_some();
        let len = state.map.len();
        drop(state);
        crate::metrics::set_l1_entries(len);
        Ok(removed)
    }

    /// Whether a live entry exists. Does not affect recency.
    pub fn exists(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.map.get(key) {
            None => Ok(false),
            Some(slot) if now < slot.expires_at => Ok(true),
            Some(_) => {
                state.remove(key);
                state.expirations += 1;
                drop(state);
                crate::metrics::record_expiration(1);
                Ok(false)
            }
        }
    }

    /// Remaining lifetime of a live entry.
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let state = self.state.lock();
        state
            .map
            .get(key)
            .filter(|slot| now < slot.expires_at)
            .map(|slot| slot.expires_at - now)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let dead: Vec<String> = state
            .map
            .iter()
            .filter(|(_, slot)| now >= slot.expires_at)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &dead {
            state.remove(key);
        }
        state.expirations += dead.len() as u64;
        let len = state.map.len();
        drop(state);

        if !dead.is_empty() {
            debug!(purged = dead.len(), remaining = len, "L1 expiry sweep");
            crate::metrics::record_expiration(dead.len());
            crate::metrics::set_l1_entries(len);
        }
        dead.len()
    }

    /// Entries currently held, including expired ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().map.is_empty()
    }

    /// Drop all entries. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.map.clear();
        state.order.clear();
        for pending in state.fills.values_mut() {
            pending.generation += 1;
        }
        drop(state);
        crate::metrics::set_l1_entries(0);
    }

    #[must_use]
    pub fn stats(&self) -> L1Stats {
        let state = self.state.lock();
        L1Stats {
            entries: state.map.len(),
            capacity: self.max_entries,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
            pending_fills: state.fills.len(),
        }
    }
}

/// An in-flight refill of one key. See [`LocalTierCache::get_or_begin_fill`].
///
/// Dropping the guard without committing abandons the fill.
#[must_use]
pub struct FillGuard<'a> {
    cache: &'a LocalTierCache,
    key: String,
    generation: u64,
}

impl FillGuard<'_> {
    /// Write the fetched value unless the key was written, deleted or
    /// cleared since the fill began. Returns whether the value was stored.
    pub fn commit(self, value: Vec<u8>, ttl: Duration) -> bool {
        let expires_at = deadline(ttl);
        let state = self.cache.state.lock();
        let current = state.fills.get(&self.key).map(|p| p.generation);
        if current != Some(self.generation) {
            drop(state);
            debug!(key = %self.key, "L1 refill superseded by a newer write");
            return false;
        }
        self.cache.insert_locked(state, &self.key, value, expires_at);
        true
    }
}

impl Drop for FillGuard<'_> {
    fn drop(&mut self) {
        self.cache.state.lock().release_fill(&self.key);
    }
}

impl std::fmt::Debug for LocalTierCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTierCache")
            .field("entries", &self.len())
            .field("max_entries", &self.max_entries)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn cache(cap: usize) -> LocalTierCache {
        LocalTierCache::new(cap, Duration::from_secs(60))
    }

    #[test]
    fn test_set_then_get() {
        let l1 = cache(10);
        l1.set("k", b"v".to_vec(), None).unwrap();
        assert_eq!(l1.get("k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(l1.get("missing").unwrap(), None);
    }

    #[test]
    fn test_empty_key_rejected() {
        let l1 = cache(10);
        assert!(matches!(l1.get(""), Err(StorageError::InvalidKey(_))));
        assert!(matches!(l1.set("", vec![], None), Err(StorageError::InvalidKey(_))));
        assert!(matches!(l1.delete(""), Err(StorageError::InvalidKey(_))));
        assert!(matches!(l1.exists(""), Err(StorageError::InvalidKey(_))));
    }

    #[test]
    fn test_oversized_key_rejected() {
        let l1 = cache(10);
        let key = "k".repeat(MAX_KEY_LENGTH + 1);
        assert!(matches!(l1.set(&key, vec![], None), Err(StorageError::InvalidKey(_))));
    }

    #[test]
    fn test_lru_eviction_order() {
        let l1 = cache(3);
        l1.set("a", vec![1], None).unwrap();
        l1.set("b", vec![2], None).unwrap();
        l1.set("c", vec![3], None).unwrap();

        // Touch "a" so "b" becomes least recent
        l1.get("a").unwrap();
        l1.set("d", vec![4], None).unwrap();

        assert_eq!(l1.len(), 3);
        assert!(l1.exists("a").unwrap());
        assert!(!l1.exists("b").unwrap());
        assert!(l1.exists("c").unwrap());
        assert!(l1.exists("d").unwrap());
        assert_eq!(l1.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let l1 = cache(2);
        l1.set("a", vec![1], None).unwrap();
        l1.set("b", vec![2], None).unwrap();
        l1.set("a", vec![9], None).unwrap();

        assert_eq!(l1.len(), 2);
        assert_eq!(l1.get("a").unwrap(), Some(vec![9]));
        assert!(l1.exists("b").unwrap());
        assert_eq!(l1.stats().evictions, 0);
    }

    #[test]
    fn test_overwrite_refreshes_recency() {
        let l1 = cache(2);
        l1.set("a", vec![1], None).unwrap();
        l1.set("b", vec![2], None).unwrap();
        l1.set("a", vec![3], None).unwrap();
        l1.set("c", vec![4], None).unwrap();

        assert!(l1.exists("a").unwrap());
        assert!(!l1.exists("b").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_boundary() {
        let l1 = cache(10);
        l1.set("k", b"v".to_vec(), Some(Duration::from_secs(1))).unwrap();

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(l1.get("k").unwrap(), Some(b"v".to_vec()));

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert_eq!(l1.get("k").unwrap(), None);

        // Lazily removed
        assert_eq!(l1.len(), 0);
        assert_eq!(l1.stats().expirations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_exactly_at_ttl() {
        let l1 = cache(10);
        l1.set("k", vec![1], Some(Duration::from_secs(1))).unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!l1.exists("k").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_applies() {
        let l1 = LocalTierCache::new(10, Duration::from_secs(2));
        l1.set("k", vec![1], None).unwrap();
        assert_eq!(l1.remaining_ttl("k"), Some(Duration::from_secs(2)));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(l1.get("k").unwrap(), None);
        assert_eq!(l1.remaining_ttl("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let l1 = cache(10);
        l1.set("short-1", vec![1], Some(Duration::from_secs(1))).unwrap();
        l1.set("short-2", vec![2], Some(Duration::from_secs(1))).unwrap();
        l1.set("long", vec![3], Some(Duration::from_secs(100))).unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(l1.purge_expired(), 2);
        assert_eq!(l1.len(), 1);
        assert!(l1.exists("long").unwrap());
    }

    #[test]
    fn test_delete_reports_presence() {
        let l1 = cache(10);
        l1.set("k", vec![1], None).unwrap();
        assert!(l1.delete("k").unwrap());
        assert!(!l1.delete("k").unwrap());
        assert!(l1.is_empty());
    }

    #[test]
    fn test_stats_and_hit_rate() {
        let l1 = cache(10);
        l1.set("k", vec![1], None).unwrap();
        l1.get("k").unwrap();
        l1.get("k").unwrap();
        l1.get("nope").unwrap();

        let stats = l1.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.capacity, 10);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_clear() {
        let l1 = cache(10);
        for i in 0..5 {
            l1.set(&format!("k{}", i), vec![i], None).unwrap();
        }
        l1.clear();
        assert!(l1.is_empty());
        // Still usable after clear
        l1.set("again", vec![1], None).unwrap();
        assert_eq!(l1.len(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let l1 = LocalTierCache::new(0, Duration::from_secs(1));
        assert_eq!(l1.capacity(), 1);
        l1.set("a", vec![1], None).unwrap();
        l1.set("b", vec![2], None).unwrap();
        assert_eq!(l1.len(), 1);
        assert!(l1.exists("b").unwrap());
    }

    fn begin<'a>(l1: &'a LocalTierCache, key: &str) -> FillGuard<'a> {
        match l1.get_or_begin_fill(key).unwrap() {
            Lookup::Miss(fill) => fill,
            Lookup::Hit(_) => panic!("expected a miss for {key}"),
        }
    }

    #[test]
    fn test_fill_commits_when_undisturbed() {
        let l1 = cache(10);
        let fill = begin(&l1, "k");
        assert_eq!(l1.stats().pending_fills, 1);

        assert!(fill.commit(b"remote".to_vec(), Duration::from_secs(5)));
        assert_eq!(l1.get("k").unwrap(), Some(b"remote".to_vec()));
        assert_eq!(l1.stats().pending_fills, 0);
    }

    #[test]
    fn test_hit_does_not_start_fill() {
        let l1 = cache(10);
        l1.set("k", b"v".to_vec(), None).unwrap();
        assert!(matches!(l1.get_or_begin_fill("k").unwrap(), Lookup::Hit(v) if v == b"v"));
        assert_eq!(l1.stats().pending_fills, 0);
    }

    #[test]
    fn test_set_during_fill_wins() {
        let l1 = cache(10);
        let fill = begin(&l1, "k");
        l1.set("k", b"new".to_vec(), None).unwrap();

        assert!(!fill.commit(b"old".to_vec(), Duration::from_secs(5)));
        assert_eq!(l1.get("k").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn test_delete_during_fill_wins() {
        let l1 = cache(10);
        let fill = begin(&l1, "k");
        l1.delete("k").unwrap();

        assert!(!fill.commit(b"old".to_vec(), Duration::from_secs(5)));
        assert!(!l1.exists("k").unwrap());
    }

    #[test]
    fn test_clear_during_fill_wins() {
        let l1 = cache(10);
        let fill = begin(&l1, "k");
        l1.clear();

        assert!(!fill.commit(b"old".to_vec(), Duration::from_secs(5)));
        assert!(l1.is_empty());
    }

    #[test]
    fn test_concurrent_fills_of_same_key_both_commit() {
        let l1 = cache(10);
        let first = begin(&l1, "k");
        let second = begin(&l1, "k");
        assert_eq!(l1.stats().pending_fills, 1);

        assert!(first.commit(b"v".to_vec(), Duration::from_secs(5)));
        assert!(second.commit(b"v".to_vec(), Duration::from_secs(5)));
        assert_eq!(l1.stats().pending_fills, 0);
    }

    #[test]
    fn test_fill_for_other_key_unaffected() {
        let l1 = cache(10);
        let fill = begin(&l1, "a");
        l1.set("b", vec![1], None).unwrap();
        l1.delete("c").unwrap();

        assert!(fill.commit(vec![9], Duration::from_secs(5)));
        assert_eq!(l1.get("a").unwrap(), Some(vec![9]));
    }

    #[test]
    fn test_abandoned_fill_is_released() {
        let l1 = cache(10);
        drop(begin(&l1, "k"));
        assert_eq!(l1.stats().pending_fills, 0);

        // A fresh fill after the abandoned one still works
        let fill = begin(&l1, "k");
        assert!(fill.commit(vec![1], Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let l1 = Arc::new(cache(1000));
        let mut handles = vec![];

        for batch in 0..10 {
            let l1 = Arc::clone(&l1);
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    let key = format!("batch-{}-item-{}", batch, i);
                    l1.set(&key, vec![batch as u8, i as u8], None).unwrap();
                    assert!(l1.get(&key).unwrap().is_some());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(l1.len(), 100);
    }
}
