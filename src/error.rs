//! Tillit error types

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tillit error types
#[derive(Debug, thiserror::Error)]
pub enum TillitError {
    // Transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        code: Option<String>,
    },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    // Authentication errors
    /// The remote service rejected our credentials (HTTP 401/403).
    #[error("unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// Local authentication failure: bad session token, failed exchange, etc.
    #[error("authentication error: {0}")]
    Authentication(String),

    // Resilience errors
    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("operation cancelled")]
    Cancelled,

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Credential storage errors
    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl TillitError {
    /// Whether the error is worth retrying.
    ///
    /// Network failures, timeouts, rate limits and 5xx responses are
    /// transient. Everything else (validation, auth, 4xx, malformed
    /// payloads, open circuit) fails the same way on a second attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            TillitError::Http(_) | TillitError::Timeout(_) | TillitError::RateLimited { .. } => {
                true
            }
            TillitError::Api { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }

    /// Server-provided wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TillitError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status associated with the error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            TillitError::Api { status, .. } | TillitError::Unauthorized { status, .. } => {
                Some(*status)
            }
            TillitError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Whether the error says something about upstream health.
    ///
    /// Used by the data client to decide what the circuit breaker sees as a
    /// failure. A 400 or 401 proves the service answered; a timeout or 503
    /// does not.
    pub fn indicates_upstream_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Network
                | ErrorKind::Timeout
                | ErrorKind::Server
                | ErrorKind::RateLimit
                | ErrorKind::InvalidResponse
        )
    }

    /// Coarse classification used in fallback descriptors and metrics.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TillitError::Http(_) => ErrorKind::Network,
            TillitError::Timeout(_) => ErrorKind::Timeout,
            TillitError::Api { status, .. } if *status >= 500 => ErrorKind::Server,
            TillitError::Api { status: 400, .. } => ErrorKind::Validation,
            TillitError::Api { .. } => ErrorKind::Client,
            TillitError::RateLimited { .. } => ErrorKind::RateLimit,
            TillitError::Unauthorized { .. } | TillitError::Authentication(_) => {
                ErrorKind::Authentication
            }
            TillitError::CircuitOpen => ErrorKind::CircuitBreaker,
            TillitError::Cancelled => ErrorKind::Cancelled,
            TillitError::InvalidInput(_) => ErrorKind::Validation,
            TillitError::Json(_) | TillitError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            TillitError::Configuration(_) | TillitError::Crypto(_) | TillitError::Storage(_) => {
                ErrorKind::Configuration
            }
        }
    }
}

/// Longest wait hint accepted from a server. Larger hints are clamped.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(u32::MAX as u64);

/// Turn a server-supplied wait in seconds into a bounded [`Duration`].
///
/// Negative, NaN and infinite values are dropped; anything past
/// [`MAX_RETRY_AFTER`] (including values `Duration` cannot hold) is clamped.
pub fn retry_after_from_secs(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let hint = Duration::try_from_secs_f64(secs).unwrap_or(MAX_RETRY_AFTER);
    Some(hint.min(MAX_RETRY_AFTER))
}

/// Error taxonomy exposed to callers through fallback results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "AUTHENTICATION_ERROR")]
    Authentication,
    #[serde(rename = "NETWORK_ERROR")]
    Network,
    #[serde(rename = "TIMEOUT_ERROR")]
    Timeout,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimit,
    #[serde(rename = "CIRCUIT_BREAKER_ERROR")]
    CircuitBreaker,
    #[serde(rename = "CONFIGURATION_ERROR")]
    Configuration,
    #[serde(rename = "SERVER_ERROR")]
    Server,
    #[serde(rename = "CLIENT_ERROR")]
    Client,
    #[serde(rename = "INVALID_RESPONSE")]
    InvalidResponse,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl ErrorKind {
    /// Stable wire code, e.g. `"NETWORK_ERROR"`.
    pub fn as_code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Authentication => "AUTHENTICATION_ERROR",
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Timeout => "TIMEOUT_ERROR",
            ErrorKind::RateLimit => "RATE_LIMIT_ERROR",
            ErrorKind::CircuitBreaker => "CIRCUIT_BREAKER_ERROR",
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
            ErrorKind::Server => "SERVER_ERROR",
            ErrorKind::Client => "CLIENT_ERROR",
            ErrorKind::InvalidResponse => "INVALID_RESPONSE",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/// Result type alias for Tillit operations
pub type Result<T> = std::result::Result<T, TillitError>;
