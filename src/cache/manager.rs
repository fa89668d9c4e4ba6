//! Cache Manager Module
//!
//! Thread-safe handle over [`CacheStore`] that enforces the enabled flag and
//! generates request fingerprints.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use serde_json::Value;
use tracing::info;

use crate::cache::key::{fingerprint, Method};
use crate::cache::store::{CacheLookup, CacheStore};
use crate::cache::{CacheEntry, CacheMetrics};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{ResilienceError, Result};

// == Cache Manager ==
/// Shared response cache.
///
/// Every operation takes the store lock for its full duration, so a `set`
/// (including eviction bookkeeping) is visible to any later `get`.
#[derive(Debug)]
pub struct CacheManager {
    store: Mutex<CacheStore>,
    /// Keys with a background refresh in flight
    refreshing: Mutex<HashSet<String>>,
    config: CacheConfig,
}

impl CacheManager {
    /// Creates a manager using the system clock.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a manager with an injected clock.
    ///
    /// Fails with a configuration error if `config` does not validate.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store: Mutex::new(CacheStore::new(&config, clock)),
            refreshing: Mutex::default(),
            config,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    // == Key Generation ==
    /// Deterministic key for (method, path, params); parameter order does not matter.
    pub fn generate_key(&self, method: Method, path: &str, params: &Value) -> Result<String> {
        self.ensure_enabled()?;
        Ok(fingerprint(method, path, params))
    }

    // == Get ==
    /// Returns a valid entry, or None on a miss (absent or expired).
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.ensure_enabled()?;
        Ok(self.lock().get(key))
    }

    /// Returns a valid entry, or the expired one it just removed.
    pub fn lookup(&self, key: &str) -> Result<CacheLookup> {
        self.ensure_enabled()?;
        Ok(self.lock().lookup(key))
    }

    // == Set ==
    /// Stores `data` under `key`, evicting the least recently used entry
    /// when full.
    pub fn set(
        &self,
        key: &str,
        data: Bytes,
        etag: Option<String>,
        ttl_override_ms: Option<u64>,
    ) -> Result<()> {
        self.ensure_enabled()?;
        self.lock().set(key.to_string(), data, etag, ttl_override_ms);
        Ok(())
    }

    /// Extends a stored entry after upstream confirmed it unchanged.
    pub fn revalidate(&self, key: &str, ttl_override_ms: Option<u64>) -> Result<Option<CacheEntry>> {
        self.ensure_enabled()?;
        Ok(self.lock().revalidate(key, ttl_override_ms))
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.ensure_enabled()?;
        self.lock().delete(key);
        Ok(())
    }

    /// Drops all entries and resets metrics.
    pub fn clear(&self) -> Result<()> {
        self.ensure_enabled()?;
        self.lock().clear();
        info!("response cache cleared");
        Ok(())
    }

    pub fn should_background_refresh(&self, entry: &CacheEntry) -> bool {
        self.config.enabled && self.lock().should_background_refresh(entry)
    }

    /// Claims `key` for a background refresh. False if one is already running.
    pub fn begin_refresh(&self, key: &str) -> bool {
        self.refreshing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string())
    }

    /// Releases a claim taken by [`CacheManager::begin_refresh`].
    pub fn finish_refresh(&self, key: &str) {
        self.refreshing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    pub fn record_refresh_failure(&self) {
        self.lock().record_refresh_failure();
    }

    pub fn cleanup_expired(&self) -> usize {
        self.lock().cleanup_expired()
    }

    pub fn get_metrics(&self) -> CacheMetrics {
        self.lock().metrics()
    }

    fn ensure_enabled(&self) -> Result<()> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(ResilienceError::Configuration(
                "response cache is disabled".to_string(),
            ))
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
