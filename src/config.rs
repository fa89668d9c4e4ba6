//! Configuration Module
//!
//! Handles loading, defaulting and validating configuration for the cache,
//! retry and query planning layers.

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ResilienceError, Result};
use crate::retry::{CircuitBreakerConfig, RetryConfig};

// == Cache Config ==
/// Response cache parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false, every cache operation fails with a configuration error
    pub enabled: bool,
    /// Default TTL in milliseconds
    pub ttl_ms: u64,
    /// Maximum number of entries
    pub max_size: usize,
    /// Age fraction after which a hit triggers a background refresh
    pub refresh_threshold: f64,
    /// Interval of the expired-entry sweeper in milliseconds
    pub cleanup_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 300_000,
            max_size: 1000,
            refresh_threshold: 0.8,
            cleanup_interval_ms: 60_000,
        }
    }
}

impl CacheConfig {
    /// Rejects undersized capacity and out-of-range refresh thresholds.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(ResilienceError::Configuration(
                "cache max_size must be at least 1".to_string(),
            ));
        }
        if !(self.refresh_threshold > 0.0 && self.refresh_threshold <= 1.0) {
            return Err(ResilienceError::Configuration(format!(
                "cache refresh_threshold must be in (0, 1], got {}",
                self.refresh_threshold
            )));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(ResilienceError::Configuration(
                "cache cleanup_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// == Planner Config ==
/// GraphQL cost ceilings and budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Provider point ceiling for a single query
    pub max_points: u64,
    /// Provider node ceiling for a single query
    pub max_nodes: u64,
    /// Budget above which a query is split into paged variants
    pub max_points_per_request: u64,
    /// Budget for one combined alias batch
    pub max_points_per_batch: u64,
    /// Page size assumed for connection arguments bound to unknown variables
    pub default_page_size: u64,
    /// Most paged variants one split may produce
    pub max_split_variants: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_points: 500_000,
            max_nodes: 500_000,
            max_points_per_request: 5_000,
            max_points_per_batch: 5_000,
            default_page_size: 100,
            max_split_variants: 100,
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<()> {
        let budgets = [
            ("max_points", self.max_points),
            ("max_nodes", self.max_nodes),
            ("max_points_per_request", self.max_points_per_request),
            ("max_points_per_batch", self.max_points_per_batch),
            ("default_page_size", self.default_page_size),
            ("max_split_variants", self.max_split_variants),
        ];
        for (name, value) in budgets {
            if value == 0 {
                return Err(ResilienceError::Configuration(format!(
                    "planner {} must be positive",
                    name
                )));
            }
        }
        Ok(())
    }
}

// == Config ==
/// Aggregate configuration for the resilience core.
///
/// All values can be configured via environment variables with sensible defaults.
/// Deserialized configs are validated like [`Config::from_env`]; missing
/// sections and fields take their defaults.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub planner: PlannerConfig,
}

impl<'de> Deserialize<'de> for Config {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Default, Deserialize)]
        #[serde(default)]
        struct Sections {
            cache: CacheConfig,
            retry: RetryConfig,
            planner: PlannerConfig,
        }

        let Sections {
            cache,
            retry,
            planner,
        } = Sections::deserialize(deserializer)?;
        let config = Config {
            cache,
            retry,
            planner,
        };
        config.validate().map_err(serde::de::Error::custom)?;
        Ok(config)
    }
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_ENABLED` (default: true)
    /// - `CACHE_TTL_MS` (default: 300000)
    /// - `CACHE_MAX_SIZE` (default: 1000)
    /// - `CACHE_REFRESH_THRESHOLD` (default: 0.8)
    /// - `CACHE_CLEANUP_INTERVAL_MS` (default: 60000)
    /// - `RETRY_MAX_RETRIES` (default: 3)
    /// - `RETRY_BASE_DELAY_MS` (default: 1000)
    /// - `RETRY_MAX_DELAY_MS` (default: 30000)
    /// - `RETRY_ATTEMPT_TIMEOUT_MS` (default: 30000)
    /// - `BREAKER_FAILURE_THRESHOLD` (default: 5)
    /// - `BREAKER_RECOVERY_TIMEOUT_MS` (default: 60000)
    /// - `PLANNER_MAX_POINTS` (default: 500000)
    /// - `PLANNER_MAX_NODES` (default: 500000)
    /// - `PLANNER_MAX_POINTS_PER_REQUEST` (default: 5000)
    /// - `PLANNER_MAX_POINTS_PER_BATCH` (default: 5000)
    /// - `PLANNER_DEFAULT_PAGE_SIZE` (default: 100)
    /// - `PLANNER_MAX_SPLIT_VARIANTS` (default: 100)
    ///
    /// The result is validated before it is returned; a negative or oversized
    /// `RETRY_MAX_RETRIES` is an error rather than a silent default.
    pub fn from_env() -> Result<Self> {
        let cache_defaults = CacheConfig::default();
        let retry_defaults = RetryConfig::default();
        let breaker_defaults = CircuitBreakerConfig::default();
        let planner_defaults = PlannerConfig::default();
        let max_retries = RetryConfig::checked_max_retries(env_or(
            "RETRY_MAX_RETRIES",
            i64::from(retry_defaults.max_retries),
        ))?;

        let config = Self {
            cache: CacheConfig {
                enabled: env_or("CACHE_ENABLED", cache_defaults.enabled),
                ttl_ms: env_or("CACHE_TTL_MS", cache_defaults.ttl_ms),
                max_size: env_or("CACHE_MAX_SIZE", cache_defaults.max_size),
                refresh_threshold: env_or(
                    "CACHE_REFRESH_THRESHOLD",
                    cache_defaults.refresh_threshold,
                ),
                cleanup_interval_ms: env_or(
                    "CACHE_CLEANUP_INTERVAL_MS",
                    cache_defaults.cleanup_interval_ms,
                ),
            },
            retry: retry_defaults
                .clone()
                .with_max_retries(max_retries)
                .with_base_delay_ms(env_or("RETRY_BASE_DELAY_MS", retry_defaults.base_delay_ms))
                .with_max_delay_ms(env_or("RETRY_MAX_DELAY_MS", retry_defaults.max_delay_ms))
                .with_attempt_timeout_ms(env_or(
                    "RETRY_ATTEMPT_TIMEOUT_MS",
                    retry_defaults.attempt_timeout_ms,
                ))
                .with_circuit_breaker(CircuitBreakerConfig {
                    failure_threshold: env_or(
                        "BREAKER_FAILURE_THRESHOLD",
                        breaker_defaults.failure_threshold,
                    ),
                    recovery_timeout_ms: env_or(
                        "BREAKER_RECOVERY_TIMEOUT_MS",
                        breaker_defaults.recovery_timeout_ms,
                    ),
                }),
            planner: PlannerConfig {
                max_points: env_or("PLANNER_MAX_POINTS", planner_defaults.max_points),
                max_nodes: env_or("PLANNER_MAX_NODES", planner_defaults.max_nodes),
                max_points_per_request: env_or(
                    "PLANNER_MAX_POINTS_PER_REQUEST",
                    planner_defaults.max_points_per_request,
                ),
                max_points_per_batch: env_or(
                    "PLANNER_MAX_POINTS_PER_BATCH",
                    planner_defaults.max_points_per_batch,
                ),
                default_page_size: env_or(
                    "PLANNER_DEFAULT_PAGE_SIZE",
                    planner_defaults.default_page_size,
                ),
                max_split_variants: env_or(
                    "PLANNER_MAX_SPLIT_VARIANTS",
                    planner_defaults.max_split_variants,
                ),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.retry.validate()?;
        self.planner.validate()
    }
}

/// Reads and parses an environment variable, falling back to `default`.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
