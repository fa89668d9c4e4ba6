//! Error types for the resilience core
//!
//! Provides unified error handling using thiserror. Every failure that leaves
//! the crate is a [`ResilienceError`]; raw transport failures enter as
//! [`UpstreamError`] and are classified at the retry boundary.

use std::collections::HashMap;

use thiserror::Error;

// == Error Kind ==
/// Discriminant for [`ResilienceError`], useful for matching without
/// destructuring the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    CircuitOpen,
    TooExpensive,
    Transient,
    Permanent,
}

// == Resilience Error Enum ==
/// Unified error type for the cache, retry and query planning layers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResilienceError {
    /// Cache or retry layer misconfigured, or cache used while disabled
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Fast-fail while the breaker for `target` is open
    #[error("Circuit open for '{target}': retry in {retry_in_ms}ms")]
    CircuitOpen { target: String, retry_in_ms: u64 },

    /// Query exceeds the point or node ceiling and cannot be split
    #[error("Query too expensive: {points} points / {nodes} nodes (limits {max_points} / {max_nodes})")]
    QueryTooExpensive {
        points: u64,
        nodes: u64,
        max_points: u64,
        max_nodes: u64,
    },

    /// Retryable network, 5xx or rate-limit failure, retries exhausted
    #[error("Transient upstream error after {attempts} attempt(s) (status {status:?}): {message}")]
    TransientUpstream {
        status: Option<u16>,
        attempts: u32,
        message: String,
    },

    /// Non-retryable client error
    #[error("Permanent upstream error after {attempts} attempt(s) (status {status:?}): {message}")]
    PermanentUpstream {
        status: Option<u16>,
        attempts: u32,
        message: String,
    },
}

impl ResilienceError {
    /// Returns the discriminant of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResilienceError::Configuration(_) => ErrorKind::Configuration,
            ResilienceError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ResilienceError::QueryTooExpensive { .. } => ErrorKind::TooExpensive,
            ResilienceError::TransientUpstream { .. } => ErrorKind::Transient,
            ResilienceError::PermanentUpstream { .. } => ErrorKind::Permanent,
        }
    }

    /// HTTP status of the last upstream response, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ResilienceError::TransientUpstream { status, .. }
            | ResilienceError::PermanentUpstream { status, .. } => *status,
            _ => None,
        }
    }

    /// Number of upstream attempts made before this error surfaced.
    pub fn attempts(&self) -> u32 {
        match self {
            ResilienceError::TransientUpstream { attempts, .. }
            | ResilienceError::PermanentUpstream { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

// == Upstream Error ==
/// Failure reported by the transport for a single request.
///
/// Header names are stored lowercase so lookups are case-insensitive.
#[derive(Error, Debug, Clone, Default, PartialEq)]
#[error("{message}")]
pub struct UpstreamError {
    /// HTTP status, None for network-level failures
    pub status: Option<u16>,
    /// Response headers (lowercase names)
    pub headers: HashMap<String, String>,
    /// Human-readable failure description
    pub message: String,
    /// Set when the attempt was cut short by the per-attempt timeout
    pub timed_out: bool,
}

impl UpstreamError {
    /// Creates an error carrying an HTTP status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            ..Self::default()
        }
    }

    /// Creates a network-level error (connection reset, DNS, ...).
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Creates the error recorded when an attempt exceeds its timeout.
    pub fn timeout(after_ms: u64) -> Self {
        Self {
            message: format!("attempt timed out after {}ms", after_ms),
            timed_out: true,
            ..Self::default()
        }
    }

    /// Adds a response header, normalizing the name to lowercase.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Looks up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

// == Result Type Alias ==
/// Convenience Result type for the resilience core.
pub type Result<T> = std::result::Result<T, ResilienceError>;
