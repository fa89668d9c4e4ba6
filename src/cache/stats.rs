//! Cache Metrics Module
//!
//! Tracks cache performance metrics including hits, misses, and evictions.

use serde::Serialize;

// == Cache Metrics ==
/// Snapshot of cache performance counters.
///
/// Counters only grow until the cache is cleared.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of failed cache retrievals (key not found or expired)
    pub misses: u64,
    /// Number of entries evicted due to LRU policy
    pub evictions: u64,
    /// Number of background refreshes that failed
    pub refresh_failures: u64,
    /// Current number of entries in the cache
    pub size: usize,
    /// Sum of entry sizes in bytes
    pub memory_usage: usize,
}

impl CacheMetrics {
    // == Constructor ==
    /// Creates a new CacheMetrics with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Ratio ==
    /// Calculates the cache hit ratio.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_refresh_failure(&mut self) {
        self.refresh_failures += 1;
    }

    // == Occupancy ==
    /// Accounts for an inserted entry of `bytes` bytes.
    pub fn add_entry(&mut self, bytes: usize) {
        self.size += 1;
        self.memory_usage += bytes;
    }

    /// Accounts for a removed entry of `bytes` bytes.
    pub fn remove_entry(&mut self, bytes: usize) {
        self.size = self.size.saturating_sub(1);
        self.memory_usage = self.memory_usage.saturating_sub(bytes);
    }
}
