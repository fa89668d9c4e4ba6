//! Expired Entry Sweeper
//!
//! Background task that periodically removes expired cache entries. Reads
//! already treat expired entries as absent; the sweeper only reclaims memory
//! held by entries nobody asks for again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheManager;

/// Spawns a background task that periodically sweeps expired cache entries.
///
/// # Arguments
/// * `cache` - shared cache handle
/// * `interval_ms` - milliseconds between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task; abort it to stop sweeping.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(CacheManager::new(CacheConfig::default())?);
/// let sweeper = spawn_cleanup_task(cache.clone(), cache.config().cleanup_interval_ms);
/// // Later, during shutdown:
/// sweeper.abort();
/// ```
pub fn spawn_cleanup_task(cache: Arc<CacheManager>, interval_ms: u64) -> JoinHandle<()> {
    let interval = Duration::from_millis(interval_ms.max(1));

    tokio::spawn(async move {
        info!(interval_ms, "starting cache sweeper");

        loop {
            tokio::time::sleep(interval).await;

            let removed = cache.cleanup_expired();
            if removed > 0 {
                info!(removed, "cache sweep removed expired entries");
            } else {
                debug!("cache sweep found no expired entries");
            }
        }
    })
}
