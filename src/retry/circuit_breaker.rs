//! Circuit breaker pattern for upstream resilience.
//!
//! The circuit breaker stops calls to a failing upstream after a threshold of
//! consecutive failures. After the recovery timeout the next call is let
//! through as a single trial (half-open) to check whether the upstream has
//! recovered.
//!
//! ```text
//! Closed   -> Open:     consecutive_failures >= failure_threshold
//! Open     -> HalfOpen: first call after recovery_timeout (lazy, no timer)
//! HalfOpen -> Closed:   trial call succeeds
//! HalfOpen -> Open:     trial call fails
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ResilienceError, Result};

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Milliseconds to stay open before letting a trial call through.
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.recovery_timeout_ms = timeout_ms;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::Configuration(
                "circuit breaker failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Circuit is closed, requests are allowed.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, one trial request is allowed.
    HalfOpen,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<u64>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<u64>,
    /// When the current half-open trial was admitted
    trial_started_at: Option<u64>,
}

/// Circuit breaker shared by every call to one upstream target.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: Arc<dyn Clock>,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker using the system clock.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a new circuit breaker with an injected clock.
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_started_at: None,
            }),
            clock,
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Asks permission to make a call.
    ///
    /// Fails with [`ResilienceError::CircuitOpen`] while open, and while a
    /// half-open trial is already in flight. A trial that never reports back
    /// is abandoned after the recovery timeout.
    pub fn try_acquire(&self) -> Result<()> {
        let now = self.clock.now_ms();
        let recovery = self.config.recovery_timeout_ms;
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_sub(opened_at);
                if elapsed >= recovery {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_started_at = Some(now);
                    info!(breaker = %self.name, "circuit half-open, admitting trial call");
                    Ok(())
                } else {
                    Err(self.open_error(recovery - elapsed))
                }
            }
            CircuitState::HalfOpen => match inner.trial_started_at {
                Some(started) if now.saturating_sub(started) < recovery => {
                    Err(self.open_error(recovery - now.saturating_sub(started)))
                }
                _ => {
                    inner.trial_started_at = Some(now);
                    Ok(())
                }
            },
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.trial_started_at = None;
                info!(breaker = %self.name, "circuit closed after successful trial");
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now_ms();

        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.consecutive_failures += 1;
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.trial_started_at = None;
                warn!(breaker = %self.name, "trial call failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }

    /// Gives back a half-open trial slot without counting a result, for
    /// calls whose outcome says nothing about upstream health.
    pub fn release(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_started_at = None;
        }
    }

    /// Get the current state without triggering transitions.
    pub fn current_state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.lock();
        CircuitBreakerState {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at,
        }
    }

    /// Force the breaker back to closed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_started_at = None;
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    pub fn total_successes(&self) -> u64 {
        self.total_successes.load(Ordering::Relaxed)
    }

    fn open_error(&self, retry_in_ms: u64) -> ResilienceError {
        ResilienceError::CircuitOpen {
            target: self.name.clone(),
            retry_in_ms,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of circuit breakers, one per upstream target.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl BreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self::with_clock(default_config, Arc::new(SystemClock))
    }

    pub fn with_clock(default_config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            default_config,
            clock,
        }
    }

    /// Get or create the breaker for a target.
    pub fn get_or_create(&self, target: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(target.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_clock(
                    target,
                    self.default_config,
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    /// Snapshot of every known breaker, sorted by target name.
    pub fn snapshot_all(&self) -> Vec<(String, CircuitBreakerState)> {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = breakers
            .iter()
            .map(|(name, cb)| (name.clone(), cb.snapshot()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// True unless the target's breaker exists and is not closed.
    pub fn is_healthy(&self, target: &str) -> bool {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .get(target)
            .map(|cb| cb.current_state() == CircuitState::Closed)
            .unwrap_or(true)
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
