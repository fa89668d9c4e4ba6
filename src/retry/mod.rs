//! Retry Module
//!
//! Wraps upstream calls with exponential backoff, retry-hint compliance and
//! a per-target circuit breaker.

mod backoff;
mod circuit_breaker;
pub mod classify;
mod config;
mod executor;

pub use backoff::{compute_delay, JITTER_HIGH, JITTER_LOW};
pub use circuit_breaker::{
    BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitState,
};
pub use classify::{classify, retry_after_ms, FailureClass, RateLimitInfo};
pub use config::{DelayFn, RateLimitHandler, RetryConfig, RetryPredicate, MAX_RETRIES_LIMIT};
pub use executor::RetryManager;
