//! Cache Entry Module
//!
//! Defines the structure for individual cached responses with TTL and ETag support.

use bytes::Bytes;

// == Cache Entry ==
/// A cached upstream response with its freshness metadata.
///
/// All timestamps are Unix milliseconds taken from the cache's clock.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Fingerprint this entry is stored under
    pub key: String,
    /// Opaque response body
    pub data: Bytes,
    /// Validator returned by upstream, if any
    pub etag: Option<String>,
    /// Creation timestamp
    pub created_at: u64,
    /// Expiration timestamp, always >= created_at
    pub expires_at: u64,
    /// Last time the entry was served, used for LRU ordering
    pub last_accessed_at: u64,
    /// Approximate memory footprint
    pub size_bytes: usize,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry that expires `ttl_ms` after `now`.
    pub fn new(key: String, data: Bytes, etag: Option<String>, now: u64, ttl_ms: u64) -> Self {
        let size_bytes = key.len() + data.len() + etag.as_ref().map_or(0, String::len);

        Self {
            key,
            data,
            etag,
            created_at: now,
            expires_at: now.saturating_add(ttl_ms),
            last_accessed_at: now,
            size_bytes,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once `now >= expires_at`, so a zero TTL entry is
    /// never served.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds (0 once expired).
    pub fn ttl_remaining_ms(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }

    // == Age Fraction ==
    /// Fraction of the entry's lifetime already elapsed, in `[0, 1]` while valid.
    ///
    /// A zero-length lifetime reports 1.0.
    pub fn age_fraction(&self, now: u64) -> f64 {
        let lifetime = self.expires_at.saturating_sub(self.created_at);
        if lifetime == 0 {
            return 1.0;
        }
        now.saturating_sub(self.created_at) as f64 / lifetime as f64
    }

    /// Pushes expiry to `now + ttl_ms`, keeping data and ETag untouched.
    pub(crate) fn extend(&mut self, now: u64, ttl_ms: u64) {
        self.expires_at = now.saturating_add(ttl_ms).max(self.created_at);
    }
}
