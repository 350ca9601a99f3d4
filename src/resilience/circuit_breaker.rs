//! Circuit breaker guarding the remote profile service.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: service assumed down, calls fail fast
//! - Half-Open: one probe call tests whether the service recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: cool-down elapsed (checked on the next before_call)
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails, cool-down restarts
//! ```
//!
//! All state lives behind one mutex that is never held across an await,
//! so every check-and-update is atomic with respect to other tasks.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::telemetry;
use crate::{Result, TillitError};

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn as_label(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Configuration for the circuit breaker.
///
/// ```rust
/// # use tillit::CircuitBreakerConfig;
/// # use std::time::Duration;
/// let config = CircuitBreakerConfig::new()
///     .failure_threshold(3)
///     .cool_down(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens. Default: 5.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing. Default: 30s.
    pub cool_down: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the consecutive-failure threshold (minimum 1).
    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n.max(1);
        self
    }

    /// Set the open-state cool-down.
    pub fn cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }
}

/// Point-in-time view of the breaker, for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    opened_at: Option<Instant>,
    // Set while the single half-open probe is outstanding.
    probe_started: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_failure: None,
            opened_at: None,
            probe_started: None,
        }
    }
}

/// Consecutive-failure circuit breaker.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether a call may proceed.
    ///
    /// Returns [`TillitError::CircuitOpen`] while the circuit is open, or
    /// while a half-open probe is already outstanding.
    pub fn before_call(&self) -> Result<()> {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                if now.saturating_duration_since(opened_at) >= self.config.cool_down {
                    transition(&mut inner, CircuitState::HalfOpen);
                    inner.probe_started = Some(now);
                    Ok(())
                } else {
                    reject()
                }
            }
            CircuitState::HalfOpen => match inner.probe_started {
                // A probe whose outcome was never reported (caller dropped)
                // must not wedge the breaker forever.
                Some(started)
                    if now.saturating_duration_since(started) < self.config.cool_down =>
                {
                    reject()
                }
                _ => {
                    inner.probe_started = Some(now);
                    Ok(())
                }
            },
        }
    }

    /// Record a successful call. Resets the failure count and closes the circuit.
    ///
    /// Ignored while open: a straggler admitted before the circuit opened
    /// must not cut the cool-down short. Only the half-open probe closes it.
    pub fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::Open {
            debug!("ignoring late success while circuit is open");
            return;
        }
        inner.failures = 0;
        inner.probe_started = None;
        if inner.state != CircuitState::Closed {
            transition(&mut inner, CircuitState::Closed);
            inner.opened_at = None;
        }
    }

    /// Record a failed call.
    pub fn on_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure = Some(now);
        inner.probe_started = None;
        match inner.state {
            CircuitState::HalfOpen => {
                transition(&mut inner, CircuitState::Open);
                inner.opened_at = Some(now);
            }
            CircuitState::Closed if inner.failures >= self.config.failure_threshold => {
                transition(&mut inner, CircuitState::Open);
                inner.opened_at = Some(now);
                warn!(
                    failures = inner.failures,
                    cool_down_ms = self.config.cool_down.as_millis() as u64,
                    "circuit opened"
                );
            }
            // Already open: leave the cool-down timer alone.
            _ => {}
        }
    }

    /// Current state. Does not perform the Open → Half-Open transition.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Snapshot of state, failure count and timestamps.
    pub fn stats(&self) -> CircuitStats {
        let inner = self.lock();
        CircuitStats {
            state: inner.state,
            failure_count: inner.failures,
            last_failure: inner.last_failure,
            opened_at: inner.opened_at,
        }
    }

    /// Force the circuit closed with a zero failure count.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!("circuit manually reset");
        }
        *inner = BreakerState::closed();
    }

    /// The configuration this breaker was built with.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

fn transition(inner: &mut BreakerState, to: CircuitState) {
    if inner.state == to {
        return;
    }
    info!(from = inner.state.as_label(), to = to.as_label(), "circuit state change");
    metrics::counter!(telemetry::CIRCUIT_TRANSITIONS_TOTAL, "to" => to.as_label()).increment(1);
    inner.state = to;
}

fn reject() -> Result<()> {
    metrics::counter!(telemetry::CIRCUIT_REJECTIONS_TOTAL).increment(1);
    Err(TillitError::CircuitOpen)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cool_down_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::new()
                .failure_threshold(threshold)
                .cool_down(Duration::from_millis(cool_down_ms)),
        )
    }

    #[test]
    fn starts_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.before_call().is_ok());
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = breaker(3, 1000);
        cb.on_failure();
        cb.on_failure();
        cb.on_success();
        assert_eq!(cb.stats().failure_count, 0);
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn threshold_is_clamped_to_one() {
        let config = CircuitBreakerConfig::new().failure_threshold(0);
        assert_eq!(config.failure_threshold, 1);
    }

    #[test]
    fn reset_forces_closed() {
        let cb = breaker(1, 60_000);
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert!(stats.last_failure.is_none());
        assert!(cb.before_call().is_ok());
    }
}
