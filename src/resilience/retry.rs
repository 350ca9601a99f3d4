//! Retry configuration, delay calculation, and the retry executor.
//!
//! [`RetryConfig`] controls backoff; [`RetryPolicy`] pairs it with a
//! retryability predicate and runs a single logical call through bounded
//! attempts. Each attempt is capped by `attempt_timeout`; a timed-out
//! attempt counts as a transient failure.
//!
//! Authentication failures are never retried here. The data client decides
//! whether a refreshed credential deserves one more pass.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::telemetry;
use crate::{Result, TillitError};

/// Configuration for retry behaviour on transient errors.
///
/// Uses exponential backoff with optional jitter:
///
/// ```rust
/// # use tillit::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_retries(5)
///     .base_delay(Duration::from_millis(200))
///     .jitter(true);
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt. 0 = no retry. Default: 3.
    pub max_retries: u32,
    /// Base delay before the first retry. Default: 500ms.
    pub base_delay: Duration,
    /// Maximum delay between retries (caps exponential growth and
    /// `retry_after` hints). Default: 10s.
    pub max_delay: Duration,
    /// Whether to add random jitter to delays. Default: true.
    pub jitter: bool,
    /// Deadline for each individual attempt. Default: 10s.
    pub attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set the number of retries after the initial attempt.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the base delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Set the per-attempt timeout.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    ///
    /// Uses exponential backoff: `base_delay * 2^attempt`, capped at `max_delay`.
    /// Does NOT include jitter; see [`effective_delay()`](Self::effective_delay)
    /// for the full calculation.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    /// Calculate the effective delay, respecting server `retry_after` hints.
    ///
    /// A hint takes precedence over backoff and is used as-is. Without a hint,
    /// the backoff gets up to 25% random jitter when enabled.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint;
        }
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter {
            return delay;
        }
        let jitter_range = delay.as_millis() as u64 / 4;
        if jitter_range == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_range))
    }
}

/// Decides whether an error is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&TillitError) -> bool + Send + Sync>;

/// Retry executor: bounded attempts, exponential backoff, per-attempt timeout.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    predicate: RetryPredicate,
}

impl RetryPolicy {
    /// Policy that retries [transient](TillitError::is_transient) errors.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            predicate: Arc::new(TillitError::is_transient),
        }
    }

    /// Replace the retryability predicate.
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&TillitError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Arc::new(predicate);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `f` until it succeeds, fails permanently, or retries run out.
    ///
    /// `f` receives the 0-indexed attempt number and is invoked at most
    /// `1 + max_retries` times. Rate-limit hints longer than `max_delay` end
    /// the loop immediately rather than parking the caller.
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(self.config.attempt_timeout, f(attempt)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(TillitError::Timeout(self.config.attempt_timeout)),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if attempt >= self.config.max_retries || !(self.predicate)(&err) {
                return Err(err);
            }
            if let Some(hint) = err.retry_after() {
                if hint > self.config.max_delay {
                    warn!(
                        operation,
                        retry_after_ms = hint.as_millis() as u64,
                        "retry-after hint exceeds max delay, giving up"
                    );
                    return Err(err);
                }
            }

            let delay = self.config.effective_delay(attempt, err.retry_after());
            metrics::counter!(telemetry::RETRIES_TOTAL, "operation" => operation.to_owned())
                .increment(1);
            warn!(
                operation,
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after transient error"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
