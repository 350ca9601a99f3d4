//! Tests for [`RetryPolicy`]: attempt bounds, retryable classes, rate-limit
//! hints and per-attempt timeouts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tillit::{Result, RetryConfig, RetryPolicy, TillitError};

/// Operation that fails N times with a given error, then succeeds.
struct FailThenSucceed {
    fail_count: AtomicU32,
    fail_with: fn() -> TillitError,
    total_calls: AtomicU32,
}

impl FailThenSucceed {
    fn new(failures: u32, fail_with: fn() -> TillitError) -> Arc<Self> {
        Arc::new(Self {
            fail_count: AtomicU32::new(failures),
            fail_with,
            total_calls: AtomicU32::new(0),
        })
    }

    async fn call(&self) -> Result<&'static str> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        let remaining = self.fail_count.load(Ordering::Relaxed);
        if remaining > 0 {
            self.fail_count.fetch_sub(1, Ordering::Relaxed);
            return Err((self.fail_with)());
        }
        Ok("ok")
    }

    fn call_count(&self) -> u32 {
        self.total_calls.load(Ordering::Relaxed)
    }
}

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(
        RetryConfig::new()
            .max_retries(max_retries)
            .base_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(50))
            .jitter(false),
    )
}

fn server_error() -> TillitError {
    TillitError::Api {
        status: 503,
        message: "unavailable".into(),
        code: None,
    }
}

// =============================================================================
// Bounds
// =============================================================================

#[tokio::test]
async fn retries_transient_error_then_succeeds() {
    let op = FailThenSucceed::new(2, server_error);
    let result = fast_policy(3).execute("test", |_| op.call()).await;
    assert_eq!(result.unwrap(), "ok");
    assert_eq!(op.call_count(), 3);
}

#[tokio::test]
async fn gives_up_after_one_plus_max_retries() {
    let op = FailThenSucceed::new(100, || TillitError::Http("connection reset".into()));
    let err = fast_policy(3).execute("test", |_| op.call()).await.unwrap_err();
    assert!(matches!(err, TillitError::Http(_)));
    assert_eq!(op.call_count(), 4);
}

#[tokio::test]
async fn disabled_config_makes_single_attempt() {
    let op = FailThenSucceed::new(1, server_error);
    let policy = RetryPolicy::new(RetryConfig::disabled());
    assert!(policy.execute("test", |_| op.call()).await.is_err());
    assert_eq!(op.call_count(), 1);
}

#[tokio::test]
async fn attempt_numbers_are_passed_in_order() {
    let seen = std::sync::Mutex::new(Vec::new());
    let _ = fast_policy(2)
        .execute("test", |attempt| {
            seen.lock().unwrap().push(attempt);
            async { Err::<(), _>(server_error()) }
        })
        .await;
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
}

// =============================================================================
// Non-retryable classes
// =============================================================================

#[tokio::test]
async fn bad_request_is_not_retried() {
    let op = FailThenSucceed::new(5, || TillitError::Api {
        status: 400,
        message: "bad".into(),
        code: None,
    });
    assert!(fast_policy(3).execute("test", |_| op.call()).await.is_err());
    assert_eq!(op.call_count(), 1);
}

#[tokio::test]
async fn unauthorized_is_not_retried() {
    let op = FailThenSucceed::new(5, || TillitError::Unauthorized {
        status: 401,
        message: "expired".into(),
    });
    let err = fast_policy(3).execute("test", |_| op.call()).await.unwrap_err();
    assert!(matches!(err, TillitError::Unauthorized { status: 401, .. }));
    assert_eq!(op.call_count(), 1);
}

#[tokio::test]
async fn invalid_response_is_not_retried() {
    let op = FailThenSucceed::new(5, || TillitError::InvalidResponse("garbage".into()));
    assert!(fast_policy(3).execute("test", |_| op.call()).await.is_err());
    assert_eq!(op.call_count(), 1);
}

#[tokio::test]
async fn custom_predicate_overrides_default() {
    let op = FailThenSucceed::new(5, server_error);
    let policy = fast_policy(3).with_predicate(|_| false);
    assert!(policy.execute("test", |_| op.call()).await.is_err());
    assert_eq!(op.call_count(), 1);
}

// =============================================================================
// Rate limits
// =============================================================================

#[tokio::test(start_paused = true)]
async fn rate_limit_waits_for_server_hint() {
    let op = FailThenSucceed::new(1, || TillitError::RateLimited {
        retry_after: Some(Duration::from_secs(2)),
    });
    let policy = RetryPolicy::new(
        RetryConfig::new()
            .base_delay(Duration::from_millis(1))
            .max_delay(Duration::from_secs(10)),
    );

    let started = tokio::time::Instant::now();
    assert_eq!(policy.execute("test", |_| op.call()).await.unwrap(), "ok");
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(op.call_count(), 2);
}

#[tokio::test]
async fn rate_limit_hint_beyond_max_delay_gives_up() {
    let op = FailThenSucceed::new(5, || TillitError::RateLimited {
        retry_after: Some(Duration::from_secs(3600)),
    });
    let err = fast_policy(3).execute("test", |_| op.call()).await.unwrap_err();
    assert!(matches!(err, TillitError::RateLimited { .. }));
    assert_eq!(op.call_count(), 1);
}

#[tokio::test]
async fn rate_limit_without_hint_uses_backoff() {
    let op = FailThenSucceed::new(2, || TillitError::RateLimited { retry_after: None });
    assert!(fast_policy(3).execute("test", |_| op.call()).await.is_ok());
    assert_eq!(op.call_count(), 3);
}

// =============================================================================
// Timeouts
// =============================================================================

#[tokio::test(start_paused = true)]
async fn slow_attempt_times_out_and_is_retried() {
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::new(
        RetryConfig::new()
            .max_retries(1)
            .base_delay(Duration::from_millis(1))
            .jitter(false)
            .attempt_timeout(Duration::from_millis(100)),
    );

    let result = policy
        .execute("test", |attempt| {
            calls.fetch_add(1, Ordering::Relaxed);
            async move {
                if attempt == 0 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok::<_, TillitError>(attempt)
            }
        })
        .await;

    assert_eq!(result.unwrap(), 1);
    assert_eq!(calls.load(Ordering::Relaxed), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_timeouts_surface_timeout_error() {
    let policy = RetryPolicy::new(
        RetryConfig::new()
            .max_retries(1)
            .base_delay(Duration::from_millis(1))
            .attempt_timeout(Duration::from_millis(100)),
    );
    let err = policy
        .execute("test", |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, TillitError>(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TillitError::Timeout(d) if d == Duration::from_millis(100)));
}
