//! Resilient Client - resilience core for REST + GraphQL API clients
//!
//! Provides a TTL/LRU response cache with ETag revalidation, retries with
//! jittered backoff behind a circuit breaker, and GraphQL query cost
//! planning (estimation, splitting and alias batching).

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod query;
pub mod retry;
pub mod tasks;

pub use cache::{CacheManager, CacheMetrics, Method};
pub use client::{ApiClient, ApiRequest, ApiResponse, CredentialProvider, Transport};
pub use config::Config;
pub use error::{ErrorKind, ResilienceError, Result, UpstreamError};
pub use query::QueryPlanner;
pub use retry::{CircuitBreaker, RetryConfig, RetryManager};
pub use tasks::spawn_cleanup_task;
