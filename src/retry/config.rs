//! Retry configuration.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ResilienceError, Result, UpstreamError};
use crate::retry::classify::RateLimitInfo;
use crate::retry::CircuitBreakerConfig;

/// Hard upper bound on `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Decides whether a failed attempt may be retried: `(error, attempts_made)`.
pub type RetryPredicate = Arc<dyn Fn(&UpstreamError, u32) -> bool + Send + Sync>;

/// Computes a delay: `(retry_index, base_delay_ms, retry_after_ms) -> delay_ms`.
pub type DelayFn = Arc<dyn Fn(u32, u64, Option<u64>) -> u64 + Send + Sync>;

/// Authorizes a retry after a rate-limit response: `(info, attempts_made)`.
pub type RateLimitHandler = Arc<dyn Fn(&RateLimitInfo, u32) -> bool + Send + Sync>;

/// Configuration for retry behavior.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0..=10).
    pub max_retries: u32,
    /// Base delay between retries (exponentially increased).
    pub base_delay_ms: u64,
    /// Cap on computed backoff.
    pub max_delay_ms: u64,
    /// Per-attempt timeout; a timed-out attempt is a transient failure.
    pub attempt_timeout_ms: u64,
    /// Statuses that are never retried.
    pub non_retryable_statuses: BTreeSet<u16>,
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(skip)]
    pub retry_predicate: Option<RetryPredicate>,
    #[serde(skip)]
    pub delay_fn: Option<DelayFn>,
    #[serde(skip)]
    pub rate_limit_handler: Option<RateLimitHandler>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            attempt_timeout_ms: 30_000,
            non_retryable_statuses: [400, 401, 403, 404, 422].into_iter().collect(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry_predicate: None,
            delay_fn: None,
            rate_limit_handler: None,
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("attempt_timeout_ms", &self.attempt_timeout_ms)
            .field("non_retryable_statuses", &self.non_retryable_statuses)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("retry_predicate", &self.retry_predicate.is_some())
            .field("delay_fn", &self.delay_fn.is_some())
            .field("rate_limit_handler", &self.rate_limit_handler.is_some())
            .finish()
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_base_delay_ms(mut self, delay_ms: u64) -> Self {
        self.base_delay_ms = delay_ms;
        self
    }

    pub fn with_max_delay_ms(mut self, delay_ms: u64) -> Self {
        self.max_delay_ms = delay_ms;
        self
    }

    pub fn with_attempt_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.attempt_timeout_ms = timeout_ms;
        self
    }

    pub fn with_non_retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.non_retryable_statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn with_retry_predicate(
        mut self,
        predicate: impl Fn(&UpstreamError, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_delay_fn(
        mut self,
        delay_fn: impl Fn(u32, u64, Option<u64>) -> u64 + Send + Sync + 'static,
    ) -> Self {
        self.delay_fn = Some(Arc::new(delay_fn));
        self
    }

    pub fn with_rate_limit_handler(
        mut self,
        handler: impl Fn(&RateLimitInfo, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.rate_limit_handler = Some(Arc::new(handler));
        self
    }

    /// Parses a signed retry count, rejecting negatives and values above the limit.
    pub fn checked_max_retries(value: i64) -> Result<u32> {
        u32::try_from(value)
            .ok()
            .filter(|n| *n <= MAX_RETRIES_LIMIT)
            .ok_or_else(|| {
                ResilienceError::Configuration(format!(
                    "max_retries must be between 0 and {}, got {}",
                    MAX_RETRIES_LIMIT, value
                ))
            })
    }

    pub fn validate(&self) -> Result<()> {
        Self::checked_max_retries(i64::from(self.max_retries))?;
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ResilienceError::Configuration(format!(
                "max_delay_ms ({}) is below base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(ResilienceError::Configuration(
                "attempt_timeout_ms must be positive".to_string(),
            ));
        }
        self.circuit_breaker.validate()
    }
}
