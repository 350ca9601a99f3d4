//! The data client: cache, dedup, auth, breaker and retry composed around
//! the risk profile endpoint.
//!
//! [`DataClient::fetch_profile`] always resolves to a [`ProfileResult`];
//! every failure path ends in a neutral fallback profile with an error
//! descriptor attached.

pub mod api;
pub mod builder;

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::HeaderMap;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

pub use api::{ApiClient, Endpoints, RequestMethod};
pub use builder::DataClientBuilder;

use crate::auth::{AuthManager, AuthState};
use crate::cache::{CacheMetrics, ResponseCache};
use crate::dedup::RequestDeduplicator;
use crate::resilience::{CircuitBreaker, CircuitStats, RetryPolicy};
use crate::telemetry;
use crate::types::{HealthStatus, ProfileData, ProfileParams, ProfileRequest, ProfileResult};
use crate::{Result, TillitError};

/// Default TTL for answers about customers with no history.
pub const DEFAULT_NEW_CUSTOMER_TTL: Duration = Duration::from_secs(60);

/// Default deadline for a health ping.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Point-in-time view of the client's moving parts.
#[derive(Debug, Clone)]
pub struct ClientStats {
    pub circuit: CircuitStats,
    pub cache: CacheMetrics,
    pub in_flight: usize,
    pub auth_state: Option<AuthState>,
}

pub(crate) struct ClientInner {
    pub(crate) api: ApiClient,
    pub(crate) auth: Option<Arc<AuthManager>>,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) retry: RetryPolicy,
    pub(crate) cache: ResponseCache<ProfileData>,
    pub(crate) dedup: RequestDeduplicator<ProfileResult>,
    pub(crate) new_customer_ttl: Duration,
    pub(crate) health_timeout: Duration,
    pub(crate) cancel: watch::Sender<u64>,
}

/// Resilient client for customer risk profiles. Cheap to clone.
///
/// ```rust,no_run
/// # async fn example() -> tillit::Result<()> {
/// use tillit::{DataClient, ProfileRequest};
///
/// let client = DataClient::builder()
///     .base_url("https://risk.example.com")
///     .build()?;
///
/// let result = client
///     .fetch_profile(&ProfileRequest::new().phone("+923001234567"))
///     .await;
/// println!("{:?} via {:?}", result.profile.risk_tier, result.source);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DataClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for DataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataClient")
            .field("base_url", &self.inner.api.base_url().as_str())
            .field("circuit", &self.inner.breaker.state())
            .field("auth", &self.inner.auth.is_some())
            .finish()
    }
}

impl DataClient {
    pub fn builder() -> DataClientBuilder {
        DataClientBuilder::new()
    }

    pub(crate) fn from_inner(inner: ClientInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Build a client from a loaded configuration file.
    #[cfg(feature = "config")]
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        DataClientBuilder::from_config(config)?.build()
    }

    /// Fetch a risk profile. Never fails: errors become fallback results.
    ///
    /// Order of operations: validate input, check the cache (unless
    /// `force_refresh`), join or start the in-flight request for the same
    /// key, then inside the shared request ensure credentials, consult the
    /// breaker and run the call through the retry policy. A 401/403 gets
    /// one credential refresh and one more pass.
    #[instrument(skip_all, fields(correlation_id = request.correlation_id.as_deref()))]
    pub async fn fetch_profile(&self, request: &ProfileRequest) -> ProfileResult {
        let params = match request.normalize() {
            Ok(params) => params,
            Err(e) => {
                debug!(error = %e, "rejected profile request");
                return finish(ProfileResult::fallback(&e));
            }
        };
        let key = params.cache_key();

        if !request.force_refresh {
            if let Some(profile) = self.inner.cache.get(key.as_str()).await {
                debug!(key = %key, "cache hit");
                return finish(ProfileResult::cached(profile));
            }
        }

        let inner = Arc::clone(&self.inner);
        let correlation_id = request.correlation_id.clone();
        let mut cancelled = self.inner.cancel.subscribe();
        let result = self
            .inner
            .dedup
            .dedupe(key.as_str(), move || async move {
                let outcome = tokio::select! {
                    outcome = inner.fetch_remote(&params, correlation_id.as_deref()) => outcome,
                    _ = cancelled.changed() => Err(TillitError::Cancelled),
                };
                match outcome {
                    Ok(profile) => ProfileResult::remote(profile),
                    Err(e) => ProfileResult::fallback(&e),
                }
            })
            .await;
        finish(result)
    }

    /// Ping the health endpoint. Independent of the circuit breaker.
    pub async fn health_check(&self) -> HealthStatus {
        let status = self.inner.api.health(self.inner.health_timeout).await;
        if !status.healthy {
            warn!(error = status.error.as_deref(), "health check failed");
        }
        status
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            circuit: self.inner.breaker.stats(),
            cache: self.inner.cache.metrics(),
            in_flight: self.inner.dedup.len(),
            auth_state: self.inner.auth.as_ref().map(|a| a.state()),
        }
    }

    /// Abort every outstanding fetch. Their callers receive a `CANCELLED`
    /// fallback; later calls start fresh.
    pub fn cancel_all(&self) {
        self.inner.cancel.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
        let dropped = self.inner.dedup.clear();
        info!(in_flight = dropped, "cancelled outstanding requests");
    }

    pub async fn clear_cache(&self) {
        self.inner.cache.clear().await;
    }

    pub fn reset_circuit(&self) {
        self.inner.breaker.reset();
    }

    /// The authentication manager, when the client was built with one.
    pub fn auth(&self) -> Option<&AuthManager> {
        self.inner.auth.as_deref()
    }

    pub fn circuit(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    pub fn cache(&self) -> &ResponseCache<ProfileData> {
        &self.inner.cache
    }
}

fn finish(result: ProfileResult) -> ProfileResult {
    metrics::counter!(telemetry::REQUESTS_TOTAL, "outcome" => result.source.as_str()).increment(1);
    if let Some(err) = &result.error {
        metrics::counter!(telemetry::FALLBACKS_TOTAL, "kind" => err.code.clone()).increment(1);
    }
    result
}

impl ClientInner {
    fn auth_headers(&self) -> HeaderMap {
        self.auth
            .as_ref()
            .map(|auth| auth.auth_headers())
            .unwrap_or_default()
    }

    /// One logical fetch: auth, breaker, retry, refresh-once, cache write.
    async fn fetch_remote(
        &self,
        params: &ProfileParams,
        correlation_id: Option<&str>,
    ) -> Result<ProfileData> {
        if let Some(auth) = &self.auth {
            if !auth.ensure_authenticated().await {
                debug!("no credentials available, calling anonymously");
            }
        }

        if let Err(e) = self.breaker.before_call() {
            debug!("circuit open, skipping network");
            return Err(e);
        }

        let started = Instant::now();
        let headers = self.auth_headers();
        let mut outcome = self.attempt(params, &headers, correlation_id).await;

        if let (Err(TillitError::Unauthorized { status, .. }), Some(auth)) = (&outcome, &self.auth) {
            info!(status, "request rejected, refreshing credentials once");
            if auth.refresh_after_rejection(&headers).await {
                let refreshed = auth.auth_headers();
                outcome = self.attempt(params, &refreshed, correlation_id).await;
            }
        }
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        match &outcome {
            Ok(_) => self.breaker.on_success(),
            Err(e) if e.indicates_upstream_failure() => self.breaker.on_failure(),
            // The service answered; a caller-side rejection says nothing
            // about its health.
            Err(_) => self.breaker.on_success(),
        }

        let profile = outcome?;
        let ttl = profile.is_new_customer.then_some(self.new_customer_ttl);
        let key = params.cache_key();
        self.cache.set(key.as_str(), profile.clone(), ttl).await;
        Ok(profile)
    }

    async fn attempt(
        &self,
        params: &ProfileParams,
        headers: &HeaderMap,
        correlation_id: Option<&str>,
    ) -> Result<ProfileData> {
        self.retry
            .execute("fetch_profile", |_| {
                self.api
                    .fetch_profile(params, headers.clone(), correlation_id)
            })
            .await
    }
}
