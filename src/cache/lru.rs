//! LRU Tracker Module
//!
//! Implements Least Recently Used tracking for cache eviction.

use std::collections::{BTreeMap, HashMap};

/// Position of a key in the access order: last access time, creation time,
/// then touch sequence.
type Rank = (u64, u64, u64);

// == LRU Tracker ==
/// Tracks access order for LRU eviction strategy.
///
/// Keys are indexed in a BTreeMap ordered by
/// `(last_accessed_ms, created_ms, sequence)`:
/// - First = Least recently used
/// - Last = Most recently used
///
/// Entries last used in the same millisecond leave oldest-created first; the
/// sequence counter orders whatever is still tied by touch order.
#[derive(Debug, Default)]
pub struct LruTracker {
    /// Access order
    order: BTreeMap<Rank, String>,
    /// Reverse index for O(log n) removal
    ranks: HashMap<String, Rank>,
    /// Monotonic touch counter
    sequence: u64,
}

impl LruTracker {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key created at `created_ms` as used at `now_ms`.
    pub fn touch(&mut self, key: &str, now_ms: u64, created_ms: u64) {
        self.remove(key);
        self.sequence += 1;
        let rank = (now_ms, created_ms, self.sequence);
        self.order.insert(rank, key.to_string());
        self.ranks.insert(key.to_string(), rank);
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &str) {
        if let Some(rank) = self.ranks.remove(key) {
            self.order.remove(&rank);
        }
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used key.
    ///
    /// Returns None if tracker is empty.
    pub fn evict_oldest(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.ranks.remove(&key);
        Some(key)
    }

    // == Peek Oldest ==
    /// Returns the least recently used key without removing it.
    pub fn peek_oldest(&self) -> Option<&String> {
        self.order.first_key_value().map(|(_, key)| key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.ranks.contains_key(key)
    }

    /// Drops every tracked key.
    pub fn clear(&mut self) {
        self.order.clear();
        self.ranks.clear();
    }
}
