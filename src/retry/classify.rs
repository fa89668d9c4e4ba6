//! Failure classification and upstream retry hints.
//!
//! 5xx, 408 and network-level failures (including attempt timeouts) are
//! transient. 429, and 403 responses that signal a secondary rate limit, are
//! rate limits and wait for the upstream hint. Everything else in 4xx is
//! permanent.

use serde::Serialize;

use crate::error::UpstreamError;
use crate::retry::RetryConfig;

/// How a failed attempt should be treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    RateLimited(RateLimitInfo),
    Permanent,
}

/// Details of a rate-limit response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub status: Option<u16>,
    /// Wait requested by upstream, when it sent one
    pub retry_after_ms: Option<u64>,
    /// True for provider-specific secondary limits (403 flavored)
    pub secondary: bool,
}

/// Classifies a failed attempt.
pub fn classify(error: &UpstreamError, config: &RetryConfig, now_ms: u64) -> FailureClass {
    if error.timed_out {
        return FailureClass::Transient;
    }
    let Some(status) = error.status else {
        return FailureClass::Transient;
    };

    if status == 429 {
        return FailureClass::RateLimited(RateLimitInfo {
            status: Some(status),
            retry_after_ms: retry_after_ms(error, now_ms),
            secondary: false,
        });
    }
    if status == 403 && is_secondary_rate_limit(error) {
        return FailureClass::RateLimited(RateLimitInfo {
            status: Some(status),
            retry_after_ms: retry_after_ms(error, now_ms),
            secondary: true,
        });
    }
    if config.non_retryable_statuses.contains(&status) {
        return FailureClass::Permanent;
    }

    match status {
        408 | 500..=599 => FailureClass::Transient,
        _ => FailureClass::Permanent,
    }
}

fn is_secondary_rate_limit(error: &UpstreamError) -> bool {
    let message = error.message.to_ascii_lowercase();
    message.contains("secondary rate limit")
        || message.contains("abuse detection")
        || error.header("retry-after").is_some()
        || error.header("x-ratelimit-remaining") == Some("0")
}

/// Extracts the upstream wait hint in milliseconds.
///
/// Understands `Retry-After` as delta-seconds or an HTTP date, then
/// `x-ratelimit-reset` (epoch seconds) when `x-ratelimit-remaining` is 0.
pub fn retry_after_ms(error: &UpstreamError, now_ms: u64) -> Option<u64> {
    if let Some(value) = error.header("retry-after") {
        let value = value.trim();
        if let Ok(seconds) = value.parse::<u64>() {
            return Some(seconds.saturating_mul(1_000));
        }
        if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
            let at_ms = date.timestamp_millis().max(0) as u64;
            return Some(at_ms.saturating_sub(now_ms));
        }
    }

    if error.header("x-ratelimit-remaining") == Some("0") {
        let reset_secs = error.header("x-ratelimit-reset")?.trim().parse::<u64>().ok()?;
        return Some(reset_secs.saturating_mul(1_000).saturating_sub(now_ms));
    }

    None
}
