//! Tillit - resilient client core for remote customer risk profiles
//!
//! This crate fetches a customer's risk/trust profile from a remote
//! service and keeps doing something sensible when that service is slow,
//! failing, rate limiting, or rejecting credentials. [`DataClient`] layers
//! a response cache, in-flight request deduplication, session-token
//! authentication, a circuit breaker and a retry policy around one HTTP
//! endpoint, and its [`fetch_profile`](DataClient::fetch_profile) never
//! returns an error: every failure becomes a neutral fallback profile.
//!
//! # Example
//!
//! ```rust,no_run
//! use tillit::{AuthConfig, DataClient, ProfileRequest};
//!
//! #[tokio::main]
//! async fn main() -> tillit::Result<()> {
//!     let client = DataClient::builder()
//!         .base_url("https://risk.example.com")
//!         .auth(AuthConfig::new("app-api-key").session_secret("hmac-secret"))
//!         .build()?;
//!
//!     if let Some(auth) = client.auth() {
//!         auth.initialize_with_session_token("eyJhbGciOiJIUzI1NiJ9...").await?;
//!     }
//!
//!     let result = client
//!         .fetch_profile(&ProfileRequest::new().phone("+923001234567").order_id("1001"))
//!         .await;
//!
//!     println!("{:?}: {}", result.profile.risk_tier, result.profile.message);
//!     if let Some(err) = result.error {
//!         eprintln!("fallback ({})", err.code);
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod client;
#[cfg(feature = "config")]
pub mod config;
pub mod dedup;
pub mod error;
pub mod resilience;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use auth::{
    AuthConfig, AuthManager, AuthState, CredentialStore, Credentials, FileCredentialStore,
    MemoryCredentialStore, SessionClaims,
};
pub use cache::{CacheConfig, CacheKey, CacheMetrics, ResponseCache};
pub use client::{ClientStats, DataClient, DataClientBuilder, Endpoints, RequestMethod};
pub use dedup::RequestDeduplicator;
pub use error::{ErrorKind, Result, TillitError};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitStats, RetryConfig, RetryPolicy,
};
pub use types::{
    ErrorDescriptor, HealthStatus, ProfileData, ProfileParams, ProfileRequest, ProfileResult,
    ProfileSource, RiskTier,
};
pub use version::PKG_VERSION;
