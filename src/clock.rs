//! Clock and Jitter Module
//!
//! Injectable time and randomness sources so TTLs, breaker timeouts and
//! backoff jitter can be driven deterministically in tests.

use std::sync::atomic::{AtomicU64, Ordering};

// == Clock ==
/// Source of wall-clock time in Unix milliseconds.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_ms(&self) -> u64;
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Moves the clock forward by `ms` milliseconds.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// == Jitter ==
/// Source of multiplicative jitter factors.
pub trait JitterSource: Send + Sync + std::fmt::Debug {
    /// Returns a factor drawn from `[low, high]`.
    fn factor(&self, low: f64, high: f64) -> f64;
}

/// Uniform jitter using `fastrand`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn factor(&self, low: f64, high: f64) -> f64 {
        low + fastrand::f64() * (high - low)
    }
}

/// Jitter that always returns the same factor, clamped to the requested band.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn factor(&self, low: f64, high: f64) -> f64 {
        self.0.clamp(low, high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(250);
        assert_eq!(clock.now_ms(), 1_250);
        clock.set(5);
        assert_eq!(clock.now_ms(), 5);
    }

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_random_jitter_stays_in_band() {
        for _ in 0..1_000 {
            let f = RandomJitter.factor(0.9, 1.1);
            assert!((0.9..=1.1).contains(&f));
        }
    }

    #[test]
    fn test_fixed_jitter_is_clamped() {
        assert_eq!(FixedJitter(1.0).factor(0.9, 1.1), 1.0);
        assert_eq!(FixedJitter(2.0).factor(0.9, 1.1), 1.1);
        assert_eq!(FixedJitter(0.0).factor(0.9, 1.1), 0.9);
    }
}
