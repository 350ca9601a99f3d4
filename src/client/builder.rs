//! Builder for configuring [`DataClient`] instances.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::api::{ApiClient, Endpoints, RequestMethod};
use super::{ClientInner, DEFAULT_HEALTH_TIMEOUT, DEFAULT_NEW_CUSTOMER_TTL, DataClient};
use crate::auth::{AuthConfig, AuthManager};
use crate::cache::{CacheConfig, ResponseCache};
use crate::dedup::{DEFAULT_INFLIGHT_TTL, RequestDeduplicator};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryPolicy};
use crate::{Result, TillitError};

/// Builder for [`DataClient`]. Only the base URL is required.
pub struct DataClientBuilder {
    base_url: Option<String>,
    endpoints: Endpoints,
    method: RequestMethod,
    retry: RetryConfig,
    retry_predicate: Option<crate::resilience::RetryPredicate>,
    circuit_breaker: CircuitBreakerConfig,
    cache: CacheConfig,
    new_customer_ttl: Duration,
    inflight_ttl: Duration,
    health_timeout: Duration,
    connect_timeout: Option<Duration>,
    auth: Option<AuthConfig>,
    http: Option<reqwest::Client>,
}

impl Default for DataClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DataClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            endpoints: Endpoints::default(),
            method: RequestMethod::default(),
            retry: RetryConfig::default(),
            retry_predicate: None,
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            new_customer_ttl: DEFAULT_NEW_CUSTOMER_TTL,
            inflight_ttl: DEFAULT_INFLIGHT_TTL,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            connect_timeout: None,
            auth: None,
            http: None,
        }
    }

    /// Service root, e.g. `https://risk.example.com`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn profile_path(mut self, path: impl Into<String>) -> Self {
        self.endpoints.profile = path.into();
        self
    }

    pub fn health_path(mut self, path: impl Into<String>) -> Self {
        self.endpoints.health = path.into();
        self
    }

    /// Send profile parameters as a query string (`Get`) or JSON body (`Post`).
    pub fn request_method(mut self, method: RequestMethod) -> Self {
        self.method = method;
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Override which errors are retried (default: transient ones).
    pub fn retry_predicate(
        mut self,
        predicate: impl Fn(&TillitError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_predicate = Some(Arc::new(predicate));
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// TTL for profiles of customers with no history (default: 60s).
    pub fn new_customer_ttl(mut self, ttl: Duration) -> Self {
        self.new_customer_ttl = ttl;
        self
    }

    /// Age after which a stuck in-flight entry is dropped (default: 5 min).
    pub fn inflight_ttl(mut self, ttl: Duration) -> Self {
        self.inflight_ttl = ttl;
        self
    }

    pub fn health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Enable authentication. Without it requests are sent anonymously.
    pub fn auth(mut self, config: AuthConfig) -> Self {
        self.auth = Some(config);
        self
    }

    /// Use a preconfigured HTTP client (proxies, custom TLS, ...).
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<DataClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| TillitError::Configuration("base URL is required".into()))?;

        let http = match self.http {
            Some(client) => client,
            None => {
                let mut builder = reqwest::Client::builder();
                if let Some(timeout) = self.connect_timeout {
                    builder = builder.connect_timeout(timeout);
                }
                builder.build().map_err(|e| {
                    TillitError::Configuration(format!("failed to build HTTP client: {e}"))
                })?
            }
        };

        let api = ApiClient::new(&base_url, self.endpoints, self.method, http)?;
        let auth = self
            .auth
            .map(|config| AuthManager::new(config, api.clone()).map(Arc::new))
            .transpose()?;

        let mut retry = RetryPolicy::new(self.retry);
        if let Some(predicate) = self.retry_predicate {
            retry = retry.with_predicate(move |e| predicate(e));
        }

        let (cancel, _) = watch::channel(0u64);
        Ok(DataClient::from_inner(ClientInner {
            api,
            auth,
            breaker: CircuitBreaker::new(self.circuit_breaker),
            retry,
            cache: ResponseCache::new(&self.cache),
            dedup: RequestDeduplicator::with_ttl(self.inflight_ttl),
            new_customer_ttl: self.new_customer_ttl,
            health_timeout: self.health_timeout,
            cancel,
        }))
    }

    /// Builder preloaded from a configuration file and environment secrets.
    #[cfg(feature = "config")]
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        let service = &config.service;
        let mut builder = Self::new()
            .base_url(service.base_url.clone())
            .endpoints(service.endpoints.clone())
            .request_method(service.request_method)
            .health_timeout(Duration::from_secs(service.health_timeout_secs))
            .retry(config.retry.to_retry_config())
            .circuit_breaker(config.circuit_breaker.to_breaker_config())
            .cache(config.cache.to_cache_config())
            .new_customer_ttl(Duration::from_secs(config.cache.new_customer_ttl_secs))
            .inflight_ttl(Duration::from_secs(config.dedup.inflight_ttl_secs));
        if let Some(secs) = service.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(auth) = config.auth_config()? {
            builder = builder.auth(auth);
        }
        Ok(builder)
    }
}
