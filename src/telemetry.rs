//! Telemetry metric name constants.
//!
//! Centralised metric names for tillit operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `tillit_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `operation`: remote call (e.g. "fetch_profile", "token_exchange")
//! - `outcome`: "remote", "cache", "fallback" or "ok" / "error"
//! - `kind`: error code (e.g. "NETWORK_ERROR")

/// Total `fetch_profile` calls.
///
/// Labels: `outcome` ("remote" | "cache" | "fallback").
pub const REQUESTS_TOTAL: &str = "tillit_requests_total";

/// Duration of remote profile fetches in seconds (network path only).
pub const REQUEST_DURATION_SECONDS: &str = "tillit_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `operation`.
pub const RETRIES_TOTAL: &str = "tillit_retries_total";

/// Total cache hits.
pub const CACHE_HITS_TOTAL: &str = "tillit_cache_hits_total";

/// Total cache misses.
pub const CACHE_MISSES_TOTAL: &str = "tillit_cache_misses_total";

/// Callers that joined an already in-flight request instead of starting one.
pub const DEDUP_JOINS_TOTAL: &str = "tillit_dedup_joins_total";

/// Circuit breaker state transitions.
///
/// Labels: `to` ("closed" | "open" | "half_open").
pub const CIRCUIT_TRANSITIONS_TOTAL: &str = "tillit_circuit_transitions_total";

/// Calls rejected by an open circuit without touching the network.
pub const CIRCUIT_REJECTIONS_TOTAL: &str = "tillit_circuit_rejections_total";

/// Fallback results handed to callers.
///
/// Labels: `kind` (error code).
pub const FALLBACKS_TOTAL: &str = "tillit_fallbacks_total";

/// Access token exchanges and refreshes.
///
/// Labels: `operation` ("exchange" | "refresh"), `outcome` ("ok" | "error").
pub const AUTH_TOKEN_REQUESTS_TOTAL: &str = "tillit_auth_token_requests_total";
