//! HTTP transport for the risk service.
//!
//! [`ApiClient`] knows the endpoint layout and the wire formats. It makes
//! exactly one request per call; retry, breaker and cache policy live in
//! [`DataClient`](super::DataClient).

use std::time::{Duration, Instant};

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::{Response, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::auth::TokenGrant;
use crate::types::{HealthStatus, ProfileData, ProfileParams};
use crate::error::{MAX_RETRY_AFTER, retry_after_from_secs};
use crate::version::user_agent;
use crate::{Result, TillitError};

pub const DEFAULT_PROFILE_PATH: &str = "/api/risk-profile";
pub const DEFAULT_HEALTH_PATH: &str = "/api/health";
pub const DEFAULT_TOKEN_EXCHANGE_PATH: &str = "/auth/token-exchange";
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

pub const SHOP_HEADER: &str = "x-shop-domain";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// How profile parameters are sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMethod {
    /// `GET` with query parameters.
    #[default]
    Get,
    /// `POST` with a JSON body.
    Post,
}

/// Paths of the service endpoints, relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub profile: String,
    pub health: String,
    pub token_exchange: String,
    pub refresh: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            profile: DEFAULT_PROFILE_PATH.to_string(),
            health: DEFAULT_HEALTH_PATH.to_string(),
            token_exchange: DEFAULT_TOKEN_EXCHANGE_PATH.to_string(),
            refresh: DEFAULT_REFRESH_PATH.to_string(),
        }
    }
}

/// Error body: `{"error": {"type", "message", "code", "retryable", "retryAfter"}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: RemoteError,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteError {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    retry_after: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeRequest<'a> {
    session_token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Single-shot client for the risk service endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    endpoints: Endpoints,
    method: RequestMethod,
}

impl ApiClient {
    /// `base_url` must be an absolute `http`/`https` URL; endpoint paths
    /// are appended to it, so a base path prefix is kept.
    pub fn new(
        base_url: &str,
        endpoints: Endpoints,
        method: RequestMethod,
        http: reqwest::Client,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url.trim()).map_err(|e| {
            TillitError::Configuration(format!("invalid base URL {base_url:?}: {e}"))
        })?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.host_str().is_none() {
            return Err(TillitError::Configuration(format!(
                "base URL must be http(s) with a host, got {base_url}"
            )));
        }
        Ok(Self {
            http,
            base_url,
            endpoints,
            method,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn method(&self) -> RequestMethod {
        self.method
    }

    fn url(&self, path: &str) -> Result<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{base}/{path}"))
            .map_err(|e| TillitError::Configuration(format!("invalid endpoint path {path:?}: {e}")))
    }

    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(ua) = HeaderValue::from_str(&user_agent()) {
            headers.insert(USER_AGENT, ua);
        }
        headers
    }

    /// Fetch and validate one profile.
    #[instrument(skip_all, fields(method = ?self.method))]
    pub async fn fetch_profile(
        &self,
        params: &ProfileParams,
        auth_headers: HeaderMap,
        correlation_id: Option<&str>,
    ) -> Result<ProfileData> {
        let url = self.url(&self.endpoints.profile)?;
        let mut headers = Self::default_headers();
        headers.extend(auth_headers);
        if let Some(id) = correlation_id {
            let value = HeaderValue::from_str(id)
                .map_err(|_| TillitError::InvalidInput("correlation id is not a valid header".into()))?;
            headers.insert(CORRELATION_HEADER, value);
        }

        let request = match self.method {
            RequestMethod::Get => self.http.get(url).query(&params.pairs()),
            RequestMethod::Post => self.http.post(url).json(params),
        };
        let response = request.headers(headers).send().await.map_err(transport_error)?;
        let body = check_response(response).await?;
        debug!(bytes = body.len(), "profile response received");
        ProfileData::from_json(&body)
    }

    /// Trade a session token for access credentials.
    pub async fn exchange_session_token(&self, session_token: &str, shop: &str) -> Result<TokenGrant> {
        let url = self.url(&self.endpoints.token_exchange)?;
        let body = ExchangeRequest { session_token };
        self.post_for_grant(url, &body, shop).await
    }

    /// Trade a refresh token for a new access token.
    pub async fn refresh_token(&self, refresh_token: &str, shop: &str) -> Result<TokenGrant> {
        let url = self.url(&self.endpoints.refresh)?;
        let body = RefreshRequest { refresh_token };
        self.post_for_grant(url, &body, shop).await
    }

    async fn post_for_grant<B: Serialize>(&self, url: Url, body: &B, shop: &str) -> Result<TokenGrant> {
        let mut headers = Self::default_headers();
        if let Ok(value) = HeaderValue::from_str(shop) {
            headers.insert(SHOP_HEADER, value);
        }
        let response = self
            .http
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        let bytes = check_response(response).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TillitError::InvalidResponse(format!("malformed token response: {e}")))
    }

    /// Ping the health endpoint. Never fails; problems are reported in the status.
    pub async fn health(&self, timeout: Duration) -> HealthStatus {
        let started = Instant::now();
        let url = match self.url(&self.endpoints.health) {
            Ok(url) => url,
            Err(e) => {
                return HealthStatus {
                    healthy: false,
                    status: None,
                    latency: started.elapsed(),
                    error: Some(e.to_string()),
                };
            }
        };

        let outcome = self
            .http
            .get(url)
            .headers(Self::default_headers())
            .timeout(timeout)
            .send()
            .await;
        let latency = started.elapsed();
        match outcome {
            Ok(response) => {
                let status = response.status();
                HealthStatus {
                    healthy: status.is_success(),
                    status: Some(status.as_u16()),
                    latency,
                    error: (!status.is_success()).then(|| format!("health endpoint returned {status}")),
                }
            }
            Err(e) => HealthStatus {
                healthy: false,
                status: None,
                latency,
                error: Some(transport_error(e).to_string()),
            },
        }
    }
}

fn transport_error(e: reqwest::Error) -> TillitError {
    if e.is_decode() {
        TillitError::InvalidResponse(e.to_string())
    } else {
        TillitError::Http(e.to_string())
    }
}

/// Return the body of a 2xx response, or map the status and error body.
async fn check_response(response: Response) -> Result<Vec<u8>> {
    let status = response.status();
    let header_retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER));

    let body = response.bytes().await.map_err(transport_error)?;
    if status.is_success() {
        return Ok(body.to_vec());
    }

    let remote = serde_json::from_slice::<ErrorEnvelope>(&body)
        .ok()
        .map(|env| env.error);
    let message = remote
        .as_ref()
        .and_then(|r| r.message.clone())
        .unwrap_or_else(|| format!("service returned {status}"));

    match status.as_u16() {
        code @ (401 | 403) => Err(TillitError::Unauthorized {
            status: code,
            message,
        }),
        429 => {
            let body_retry_after = remote
                .as_ref()
                .and_then(|r| r.retry_after)
                .and_then(retry_after_from_secs);
            Err(TillitError::RateLimited {
                retry_after: header_retry_after.or(body_retry_after),
            })
        }
        code => Err(TillitError::Api {
            status: code,
            message,
            code: remote.and_then(|r| r.code.or(r.kind)),
        }),
    }
}
