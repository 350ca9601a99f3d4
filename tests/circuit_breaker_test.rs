//! Tests for [`CircuitBreaker`] state transitions under a paused clock.

use std::time::Duration;

use tillit::{CircuitBreaker, CircuitBreakerConfig, CircuitState, TillitError};

fn breaker(threshold: u32, cool_down: Duration) -> CircuitBreaker {
    CircuitBreaker::new(
        CircuitBreakerConfig::new()
            .failure_threshold(threshold)
            .cool_down(cool_down),
    )
}

// =============================================================================
// Opening
// =============================================================================

#[tokio::test(start_paused = true)]
async fn opens_after_threshold_consecutive_failures() {
    let cb = breaker(3, Duration::from_secs(30));

    for _ in 0..2 {
        assert!(cb.before_call().is_ok());
        cb.on_failure();
    }
    assert_eq!(cb.state(), CircuitState::Closed);

    assert!(cb.before_call().is_ok());
    cb.on_failure();
    assert_eq!(cb.state(), CircuitState::Open);

    let err = cb.before_call().unwrap_err();
    assert!(matches!(err, TillitError::CircuitOpen));
}

#[tokio::test(start_paused = true)]
async fn rejects_until_cool_down_elapses() {
    let cb = breaker(1, Duration::from_secs(30));
    cb.on_failure();

    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(cb.before_call().is_err());
    assert_eq!(cb.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(cb.before_call().is_ok());
    assert_eq!(cb.state(), CircuitState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn failures_while_open_do_not_extend_cool_down() {
    let cb = breaker(1, Duration::from_secs(10));
    cb.on_failure();
    let opened_at = cb.stats().opened_at;

    tokio::time::advance(Duration::from_secs(5)).await;
    cb.on_failure();
    assert_eq!(cb.stats().opened_at, opened_at);

    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(cb.before_call().is_ok());
}

// =============================================================================
// Half-open probe
// =============================================================================

#[tokio::test(start_paused = true)]
async fn half_open_admits_a_single_probe() {
    let cb = breaker(1, Duration::from_secs(30));
    cb.on_failure();
    tokio::time::advance(Duration::from_secs(30)).await;

    assert!(cb.before_call().is_ok());
    assert!(cb.before_call().is_err());
    assert!(cb.before_call().is_err());
}

#[tokio::test(start_paused = true)]
async fn successful_probe_closes_circuit() {
    let cb = breaker(2, Duration::from_secs(30));
    cb.on_failure();
    cb.on_failure();
    tokio::time::advance(Duration::from_secs(30)).await;

    assert!(cb.before_call().is_ok());
    cb.on_success();

    let stats = cb.stats();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failure_count, 0);
    assert!(stats.opened_at.is_none());
    assert!(cb.before_call().is_ok());
}

#[tokio::test(start_paused = true)]
async fn failed_probe_reopens_and_restarts_cool_down() {
    let cb = breaker(1, Duration::from_secs(30));
    cb.on_failure();
    tokio::time::advance(Duration::from_secs(30)).await;

    assert!(cb.before_call().is_ok());
    cb.on_failure();
    assert_eq!(cb.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(15)).await;
    assert!(cb.before_call().is_err());

    tokio::time::advance(Duration::from_secs(15)).await;
    assert!(cb.before_call().is_ok());
}

#[tokio::test(start_paused = true)]
async fn late_success_does_not_close_open_circuit() {
    let cb = breaker(2, Duration::from_secs(30));
    // Two calls admitted while closed; the first fails twice over.
    assert!(cb.before_call().is_ok());
    assert!(cb.before_call().is_ok());
    cb.on_failure();
    cb.on_failure();
    assert_eq!(cb.state(), CircuitState::Open);

    // The straggler reports success after the circuit opened.
    cb.on_success();
    let stats = cb.stats();
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.failure_count, 2);
    assert!(stats.opened_at.is_some());
    assert!(cb.before_call().is_err());

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(cb.before_call().is_ok());
    cb.on_success();
    assert_eq!(cb.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn abandoned_probe_is_readmitted_after_cool_down() {
    let cb = breaker(1, Duration::from_secs(30));
    cb.on_failure();
    tokio::time::advance(Duration::from_secs(30)).await;

    // Probe admitted but its outcome is never reported.
    assert!(cb.before_call().is_ok());
    assert!(cb.before_call().is_err());

    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(cb.before_call().is_ok());
    assert_eq!(cb.state(), CircuitState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn reset_closes_open_circuit() {
    let cb = breaker(1, Duration::from_secs(30));
    cb.on_failure();
    assert_eq!(cb.state(), CircuitState::Open);

    cb.reset();
    assert_eq!(cb.state(), CircuitState::Closed);
    assert_eq!(cb.stats().failure_count, 0);
    assert!(cb.before_call().is_ok());
}
