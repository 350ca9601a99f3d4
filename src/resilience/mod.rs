//! Failure handling around remote calls.
//!
//! - [`circuit_breaker`]: stops calling the service after repeated failures.
//! - [`retry`]: bounded retries with exponential backoff and jitter.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStats};
pub use retry::{RetryConfig, RetryPolicy, RetryPredicate};
