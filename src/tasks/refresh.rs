//! Background Refresh Task
//!
//! Detached stale-while-revalidate refresh of an aging cache entry. The
//! caller has already been answered from the cache; this task only updates
//! the entry. Failures are counted and logged, never propagated, and leave
//! the still-valid entry untouched. At most one refresh per key runs at a
//! time.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::CacheManager;
use crate::client::{dispatch, ApiRequest, Transport};
use crate::error::Result;
use crate::retry::RetryManager;

/// A cache key and the request that produces its value.
#[derive(Debug, Clone)]
pub struct RefreshJob {
    pub key: String,
    /// Request to send, carrying `If-None-Match` when the entry has an ETag
    pub request: ApiRequest,
}

/// What a completed refresh did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Upstream answered 304; the entry's expiry was extended
    Revalidated,
    /// Upstream sent a new body; the entry was replaced
    Replaced,
    /// Upstream answered 304 but the entry was already gone
    Skipped,
}

/// Releases the key's refresh claim when the task ends, however it ends.
struct RefreshClaim {
    cache: Arc<CacheManager>,
    key: String,
}

impl Drop for RefreshClaim {
    fn drop(&mut self) {
        self.cache.finish_refresh(&self.key);
    }
}

/// Spawns a detached refresh. Dropping the handle does not cancel it.
///
/// Returns None without spawning when a refresh of the same key is already
/// in flight.
pub fn spawn_refresh(
    cache: Arc<CacheManager>,
    retry: RetryManager,
    transport: Arc<dyn Transport>,
    job: RefreshJob,
) -> Option<JoinHandle<()>> {
    if !cache.begin_refresh(&job.key) {
        debug!(key = %job.key, "refresh already in flight");
        return None;
    }
    let claim = RefreshClaim {
        cache: cache.clone(),
        key: job.key.clone(),
    };

    Some(tokio::spawn(async move {
        let _claim = claim;
        match refresh(&cache, &retry, transport.as_ref(), &job).await {
            Ok(outcome) => debug!(key = %job.key, ?outcome, "background refresh complete"),
            Err(err) => {
                cache.record_refresh_failure();
                warn!(key = %job.key, error = %err, "background refresh failed");
            }
        }
    }))
}

/// Runs one refresh to completion.
///
/// # Errors
/// Upstream failures surfaced by the retry manager, or a cache
/// configuration error.
pub async fn refresh(
    cache: &CacheManager,
    retry: &RetryManager,
    transport: &dyn Transport,
    job: &RefreshJob,
) -> Result<RefreshOutcome> {
    let response = dispatch(retry, transport, &job.request).await?;

    if response.is_not_modified() {
        return Ok(match cache.revalidate(&job.key, None)? {
            Some(_) => RefreshOutcome::Revalidated,
            None => RefreshOutcome::Skipped,
        });
    }

    let etag = response.header("etag").map(str::to_string);
    cache.set(&job.key, response.body, etag, None)?;
    Ok(RefreshOutcome::Replaced)
}
