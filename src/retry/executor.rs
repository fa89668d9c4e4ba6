//! Retry Executor
//!
//! Runs a caller-supplied async operation under the breaker, a per-attempt
//! timeout and jittered exponential backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::{Clock, JitterSource, RandomJitter, SystemClock};
use crate::error::{ResilienceError, Result, UpstreamError};
use crate::retry::backoff::compute_delay;
use crate::retry::classify::{classify, FailureClass};
use crate::retry::{CircuitBreaker, RetryConfig};

/// Executes operations with retries against one upstream target.
#[derive(Debug, Clone)]
pub struct RetryManager {
    config: RetryConfig,
    breaker: Arc<CircuitBreaker>,
    jitter: Arc<dyn JitterSource>,
    clock: Arc<dyn Clock>,
}

impl RetryManager {
    /// Creates a manager with its own breaker named `default`.
    ///
    /// # Errors
    /// Returns a configuration error if `config` fails validation.
    pub fn new(config: RetryConfig) -> Result<Self> {
        let breaker = Arc::new(CircuitBreaker::new("default", config.circuit_breaker));
        Self::with_breaker(config, breaker)
    }

    /// Creates a manager that reports to a shared breaker.
    pub fn with_breaker(config: RetryConfig, breaker: Arc<CircuitBreaker>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            breaker,
            jitter: Arc::new(RandomJitter),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Clock used to resolve HTTP-date retry hints.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn get_config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Runs `operation` until it succeeds, fails permanently or retries run out.
    ///
    /// The operation receives the 1-based attempt number. Dropping the
    /// returned future stops any further attempts.
    ///
    /// # Errors
    /// - `CircuitOpen` when the breaker refuses the first attempt
    /// - `PermanentUpstream` for non-retryable failures
    /// - `TransientUpstream` once retries are exhausted, with the last status
    pub async fn execute_with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, UpstreamError>>,
    {
        let attempt_timeout = Duration::from_millis(self.config.attempt_timeout_ms);
        let mut attempts: u32 = 0;
        let mut last_error: Option<UpstreamError> = None;

        loop {
            if let Err(open) = self.breaker.try_acquire() {
                return Err(match last_error {
                    Some(error) => {
                        warn!(
                            breaker = %self.breaker.name(),
                            attempts,
                            "circuit opened mid-retry, giving up"
                        );
                        transient(error, attempts)
                    }
                    None => open,
                });
            }

            attempts += 1;
            let outcome = match tokio::time::timeout(attempt_timeout, operation(attempts)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(UpstreamError::timeout(self.config.attempt_timeout_ms)),
            };

            let error = match outcome {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(error) => error,
            };

            let class = classify(&error, &self.config, self.clock.now_ms());
            let exhausted = attempts > self.config.max_retries;

            if let Some(predicate) = &self.config.retry_predicate {
                if !predicate(&error, attempts) {
                    self.breaker.record_failure();
                    debug!(attempts, status = ?error.status, "retry predicate declined");
                    return Err(match class {
                        FailureClass::Permanent => permanent(error, attempts),
                        _ => transient(error, attempts),
                    });
                }
            }

            let retry_after_ms = match class {
                FailureClass::Permanent => {
                    self.breaker.record_failure();
                    return Err(permanent(error, attempts));
                }
                FailureClass::Transient => {
                    self.breaker.record_failure();
                    None
                }
                FailureClass::RateLimited(info) => {
                    let authorized = match &self.config.rate_limit_handler {
                        Some(_) if exhausted => false,
                        Some(handler) => handler(&info, attempts),
                        None => {
                            self.breaker.record_failure();
                            !exhausted
                        }
                    };
                    if !authorized {
                        if self.config.rate_limit_handler.is_some() {
                            self.breaker.record_failure();
                        }
                        warn!(
                            attempts,
                            status = ?info.status,
                            secondary = info.secondary,
                            "rate limited, not retrying"
                        );
                        return Err(transient(error, attempts));
                    }
                    if self.config.rate_limit_handler.is_some() {
                        self.breaker.release();
                    }
                    info.retry_after_ms
                }
            };

            if exhausted {
                warn!(
                    attempts,
                    status = ?error.status,
                    message = %error.message,
                    "retries exhausted"
                );
                return Err(transient(error, attempts));
            }

            let delay_ms = compute_delay(
                &self.config,
                attempts - 1,
                retry_after_ms,
                self.jitter.as_ref(),
            );
            debug!(
                attempt = attempts,
                delay_ms,
                status = ?error.status,
                "retrying after failure"
            );
            last_error = Some(error);
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }
}

fn transient(error: UpstreamError, attempts: u32) -> ResilienceError {
    ResilienceError::TransientUpstream {
        status: error.status,
        attempts,
        message: error.message,
    }
}

fn permanent(error: UpstreamError, attempts: u32) -> ResilienceError {
    ResilienceError::PermanentUpstream {
        status: error.status,
        attempts,
        message: error.message,
    }
}
