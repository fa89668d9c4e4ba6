//! Cache Store Module
//!
//! Main cache engine combining HashMap storage with LRU tracking, TTL
//! expiration and ETag bookkeeping. Not synchronized; see `CacheManager`
//! for the shared handle.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::cache::{CacheEntry, CacheMetrics, LruTracker};
use crate::clock::Clock;
use crate::config::CacheConfig;

// == Lookup Result ==
/// Outcome of [`CacheStore::lookup`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Valid entry, counted as a hit
    Fresh(CacheEntry),
    /// Entry was present but expired; it has been removed and counted as a miss
    Expired(CacheEntry),
    /// Nothing stored under the key
    Missing,
}

// == Cache Store ==
/// Main cache storage with LRU eviction and TTL support.
#[derive(Debug)]
pub struct CacheStore {
    /// Key-value storage
    entries: HashMap<String, CacheEntry>,
    /// LRU access tracker
    lru: LruTracker,
    /// Performance counters
    metrics: CacheMetrics,
    /// Maximum number of entries allowed
    max_size: usize,
    /// TTL in milliseconds for entries without an override
    default_ttl_ms: u64,
    /// Age fraction that triggers a background refresh
    refresh_threshold: f64,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    // == Constructor ==
    /// Creates a new CacheStore from cache configuration.
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            metrics: CacheMetrics::new(),
            max_size: config.max_size.max(1),
            default_ttl_ms: config.ttl_ms,
            refresh_threshold: config.refresh_threshold,
            clock,
        }
    }

    // == Set ==
    /// Stores a response under `key`.
    ///
    /// If the key already exists the entry is replaced and its TTL restarts.
    /// If the cache is at capacity, the least recently used entry is evicted
    /// before the insert.
    ///
    /// # Arguments
    /// * `key` - Fingerprint to store under
    /// * `data` - Response body
    /// * `etag` - Upstream validator, if any
    /// * `ttl_ms` - TTL override in milliseconds (uses the default if None)
    pub fn set(&mut self, key: String, data: Bytes, etag: Option<String>, ttl_ms: Option<u64>) {
        let now = self.clock.now_ms();

        if let Some(previous) = self.entries.remove(&key) {
            self.lru.remove(&key);
            self.metrics.remove_entry(previous.size_bytes);
        }

        while self.entries.len() >= self.max_size {
            let Some(evicted_key) = self.lru.evict_oldest() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&evicted_key) {
                self.metrics.remove_entry(evicted.size_bytes);
                self.metrics.record_eviction();
                debug!(key = %evicted_key, "evicted least recently used entry");
            }
        }

        let entry = CacheEntry::new(
            key.clone(),
            data,
            etag,
            now,
            ttl_ms.unwrap_or(self.default_ttl_ms),
        );
        self.metrics.add_entry(entry.size_bytes);
        self.lru.touch(&key, now, entry.created_at);
        self.entries.insert(key, entry);
    }

    // == Get ==
    /// Retrieves a valid entry by key.
    ///
    /// Expired entries are removed and counted as misses.
    pub fn get(&mut self, key: &str) -> Option<CacheEntry> {
        match self.lookup(key) {
            CacheLookup::Fresh(entry) => Some(entry),
            CacheLookup::Expired(_) | CacheLookup::Missing => None,
        }
    }

    // == Lookup ==
    /// Like [`CacheStore::get`], but hands back an expired entry after
    /// removing it so its ETag can still be used for revalidation.
    pub fn lookup(&mut self, key: &str) -> CacheLookup {
        let now = self.clock.now_ms();

        match self.entries.get_mut(key) {
            None => {
                self.metrics.record_miss();
                return CacheLookup::Missing;
            }
            Some(entry) if !entry.is_expired(now) => {
                entry.last_accessed_at = now;
                let entry = entry.clone();
                self.lru.touch(key, now, entry.created_at);
                self.metrics.record_hit();
                return CacheLookup::Fresh(entry);
            }
            Some(_) => {}
        }

        self.metrics.record_miss();
        match self.remove(key) {
            Some(entry) => {
                debug!(key, "lazily removed expired entry");
                CacheLookup::Expired(entry)
            }
            None => CacheLookup::Missing,
        }
    }

    // == Revalidate ==
    /// Handles a not-modified answer: extends the entry's expiry from now
    /// without touching its data or ETag.
    ///
    /// Returns the updated entry, or None if the key is no longer stored.
    pub fn revalidate(&mut self, key: &str, ttl_ms: Option<u64>) -> Option<CacheEntry> {
        let now = self.clock.now_ms();
        let ttl = ttl_ms.unwrap_or(self.default_ttl_ms);
        let entry = self.entries.get_mut(key)?;
        entry.extend(now, ttl);
        entry.last_accessed_at = now;
        let entry = entry.clone();
        self.lru.touch(key, now, entry.created_at);
        Some(entry)
    }

    // == Delete ==
    /// Removes an entry by key. Returns true if something was removed.
    pub fn delete(&mut self, key: &str) -> bool {
        self.remove(key).is_some()
    }

    // == Clear ==
    /// Drops every entry and resets all metrics to zero.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.metrics = CacheMetrics::new();
    }

    // == Background Refresh ==
    /// True when a still-valid entry has used up at least the configured
    /// fraction of its lifetime.
    pub fn should_background_refresh(&self, entry: &CacheEntry) -> bool {
        let now = self.clock.now_ms();
        !entry.is_expired(now) && entry.age_fraction(now) >= self.refresh_threshold
    }

    /// Counts a failed background refresh.
    pub fn record_refresh_failure(&mut self) {
        self.metrics.record_refresh_failure();
    }

    // == Metrics ==
    /// Returns a snapshot of the current metrics.
    pub fn metrics(&self) -> CacheMetrics {
        self.metrics.clone()
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the cache.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = self.clock.now_ms();
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.remove(key);
        }
        expired_keys.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(key);
        self.metrics.remove_entry(entry.size_bytes);
        Some(entry)
    }
}
