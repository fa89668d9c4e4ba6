//! Cache Module
//!
//! Provides an in-process response cache with TTL expiration, LRU eviction
//! and ETag-aware revalidation.

mod entry;
mod key;
mod lru;
mod manager;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use key::{canonical_path, fingerprint, Method};
pub use lru::LruTracker;
pub use manager::CacheManager;
pub use stats::CacheMetrics;
pub use store::{CacheLookup, CacheStore};
