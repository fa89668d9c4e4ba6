//! Backoff delay computation.

use crate::clock::JitterSource;
use crate::retry::RetryConfig;

/// Lower bound of the jitter band.
pub const JITTER_LOW: f64 = 0.9;
/// Upper bound of the jitter band.
pub const JITTER_HIGH: f64 = 1.1;

/// Delay in milliseconds before retry number `retry_index` (0-based).
///
/// A custom delay function wins outright. Otherwise an upstream wait hint is
/// used as-is, else `min(max_delay, base * 2^retry_index)`; either way the
/// result is jittered within `[0.9, 1.1]`.
pub fn compute_delay(
    config: &RetryConfig,
    retry_index: u32,
    retry_after_ms: Option<u64>,
    jitter: &dyn JitterSource,
) -> u64 {
    if let Some(delay_fn) = &config.delay_fn {
        return delay_fn(retry_index, config.base_delay_ms, retry_after_ms);
    }

    let raw = match retry_after_ms {
        Some(hint) => hint,
        None => exponential(config.base_delay_ms, retry_index).min(config.max_delay_ms),
    };
    (raw as f64 * jitter.factor(JITTER_LOW, JITTER_HIGH)).round() as u64
}

fn exponential(base_ms: u64, retry_index: u32) -> u64 {
    let factor = 1u64.checked_shl(retry_index).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor)
}
