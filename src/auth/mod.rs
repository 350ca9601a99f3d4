//! Session token exchange, proactive refresh, and encrypted credential storage.
//!
//! [`AuthManager`] walks
//! `Unauthenticated → Authenticating → Authenticated → Refreshing →
//! (Authenticated | Unauthenticated)`. Every failure is recorded in
//! [`AuthManager::last_error`] and leaves the manager in a usable state;
//! nothing here blocks a caller indefinitely.
//!
//! Refreshes are single-flight: callers serialize on an async mutex and
//! re-check expiry after acquiring it, so a burst of callers near expiry
//! produces exactly one token request.

pub mod credentials;
pub mod crypto;
pub mod session;
pub mod store;

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use credentials::{Credentials, TokenGrant};
pub use crypto::{CredentialCipher, DEFAULT_KDF_ITERATIONS};
pub use session::{SessionClaims, SessionTokenValidator, ValidatedSession};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};

use crate::client::api::{ApiClient, SHOP_HEADER};
use crate::telemetry;
use crate::{Result, TillitError};
use credentials::{StoredCredentials, unix_now};

/// Default window before expiry in which a token is refreshed.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

/// Default deadline for one token exchange or refresh request.
pub const DEFAULT_AUTH_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default pause after a failed proactive refresh before trying again.
pub const DEFAULT_REFRESH_RETRY_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
}

impl AuthState {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authenticating => "authenticating",
            AuthState::Authenticated => "authenticated",
            AuthState::Refreshing => "refreshing",
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication settings.
///
/// Credentials are persisted only when a `storage_secret` is set; without
/// one they live in memory for the life of the manager.
///
/// ```rust
/// # use tillit::AuthConfig;
/// # use std::time::Duration;
/// let config = AuthConfig::new("my-app-key")
///     .session_secret("shared-hmac-secret")
///     .refresh_threshold(Duration::from_secs(120));
/// ```
#[derive(Clone)]
pub struct AuthConfig {
    /// Expected `aud` claim of session tokens (the app's API key).
    pub audience: String,
    /// HMAC secret for session token signatures.
    pub session_secret: Option<SecretString>,
    /// Secret the credential encryption key is derived from.
    pub storage_secret: Option<SecretString>,
    /// Where sealed credentials go; defaults to memory when a storage
    /// secret is set.
    pub store: Option<Arc<dyn CredentialStore>>,
    pub refresh_threshold: Duration,
    /// Deadline for each token exchange or refresh request.
    pub request_timeout: Duration,
    /// How long to keep using still-valid credentials after a failed
    /// proactive refresh before the next attempt.
    pub refresh_retry_interval: Duration,
    pub kdf_iterations: u32,
    pub leeway_secs: u64,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("audience", &self.audience)
            .field("session_secret", &self.session_secret.is_some())
            .field("storage_secret", &self.storage_secret.is_some())
            .field("store", &self.store.is_some())
            .field("refresh_threshold", &self.refresh_threshold)
            .field("request_timeout", &self.request_timeout)
            .field("refresh_retry_interval", &self.refresh_retry_interval)
            .field("kdf_iterations", &self.kdf_iterations)
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

impl AuthConfig {
    pub fn new(audience: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
            session_secret: None,
            storage_secret: None,
            store: None,
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
            request_timeout: DEFAULT_AUTH_REQUEST_TIMEOUT,
            refresh_retry_interval: DEFAULT_REFRESH_RETRY_INTERVAL,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            leeway_secs: session::DEFAULT_LEEWAY_SECS,
        }
    }

    pub fn session_secret(mut self, secret: impl Into<String>) -> Self {
        self.session_secret = Some(SecretString::from(secret.into()));
        self
    }

    pub fn storage_secret(mut self, secret: impl Into<String>) -> Self {
        self.storage_secret = Some(SecretString::from(secret.into()));
        self
    }

    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn refresh_retry_interval(mut self, interval: Duration) -> Self {
        self.refresh_retry_interval = interval;
        self
    }

    pub fn kdf_iterations(mut self, n: u32) -> Self {
        self.kdf_iterations = n;
        self
    }

    pub fn leeway_secs(mut self, secs: u64) -> Self {
        self.leeway_secs = secs;
        self
    }
}

#[derive(Default)]
struct AuthInner {
    state: AuthState,
    session: Option<ValidatedSession>,
    credentials: Option<Credentials>,
    last_error: Option<String>,
    // Proactive refresh is suppressed until then after a failure.
    refresh_not_before: Option<Instant>,
}

/// Owns the credential lifecycle for one shop.
pub struct AuthManager {
    api: ApiClient,
    validator: SessionTokenValidator,
    vault: Option<(CredentialCipher, Arc<dyn CredentialStore>)>,
    refresh_threshold: Duration,
    request_timeout: Duration,
    refresh_retry_interval: Duration,
    inner: Mutex<AuthInner>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthManager")
            .field("state", &self.state())
            .field("shop", &self.shop())
            .field("persistent", &self.vault.is_some())
            .finish()
    }
}

impl AuthManager {
    pub fn new(config: AuthConfig, api: ApiClient) -> Result<Self> {
        if config.audience.trim().is_empty() {
            return Err(TillitError::Configuration(
                "auth audience (API key) must not be empty".into(),
            ));
        }
        if config.session_secret.is_none() {
            warn!("no session secret configured; session token signatures will not be verified");
        }

        let vault = match (config.storage_secret, config.store) {
            (Some(secret), store) => {
                let cipher = CredentialCipher::new(secret).iterations(config.kdf_iterations);
                let store = store.unwrap_or_else(|| {
                    Arc::new(MemoryCredentialStore::new()) as Arc<dyn CredentialStore>
                });
                Some((cipher, store))
            }
            (None, Some(_)) => {
                warn!("credential store configured without a storage secret; not persisting");
                None
            }
            (None, None) => None,
        };

        Ok(Self {
            api,
            validator: SessionTokenValidator::new(config.audience, config.session_secret)
                .leeway(config.leeway_secs),
            vault,
            refresh_threshold: config.refresh_threshold,
            request_timeout: config.request_timeout,
            refresh_retry_interval: config.refresh_retry_interval,
            inner: Mutex::new(AuthInner::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, AuthInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: AuthState) {
        let mut inner = self.lock();
        if inner.state != state {
            debug!(from = %inner.state, to = %state, "auth state change");
            inner.state = state;
        }
    }

    /// Drop credentials and record `err`; returns it for `?` chaining.
    fn fail(&self, err: TillitError) -> TillitError {
        let mut inner = self.lock();
        inner.state = AuthState::Unauthenticated;
        inner.credentials = None;
        inner.last_error = Some(err.to_string());
        inner.refresh_not_before = None;
        warn!(error = %err, "authentication failed");
        err
    }

    fn install(&self, credentials: Credentials) {
        let mut inner = self.lock();
        inner.state = AuthState::Authenticated;
        inner.credentials = Some(credentials);
        inner.last_error = None;
        inner.refresh_not_before = None;
    }

    /// Validate a session token and obtain credentials for its shop.
    ///
    /// Unexpired stored credentials are reused; otherwise the token is
    /// exchanged with the service.
    pub async fn initialize_with_session_token(&self, token: &str) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        self.set_state(AuthState::Authenticating);

        let session = self.validator.validate(token).map_err(|e| self.fail(e))?;
        let shop = session.shop.clone();
        {
            let mut inner = self.lock();
            inner.session = Some(session.clone());
            if inner.credentials.as_ref().is_some_and(|c| c.shop != shop) {
                inner.credentials = None;
            }
        }

        if let Some(stored) = self.load_stored(&shop).await {
            if !stored.is_expired_at(unix_now()) {
                info!(shop = shop.as_str(), "restored stored credentials");
                self.install(stored);
                return Ok(());
            }
            debug!(shop = shop.as_str(), "stored credentials expired");
        }

        let grant = self
            .token_request(
                "exchange",
                self.api
                    .exchange_session_token(session.token.expose_secret(), &shop),
            )
            .await;
        let credentials = grant
            .and_then(|g| Credentials::from_grant(g, &shop, unix_now()))
            .map_err(|e| self.fail(e))?;

        self.persist(&credentials).await;
        info!(shop = shop.as_str(), "exchanged session token");
        self.install(credentials);
        Ok(())
    }

    /// Whether usable credentials are available, refreshing first when they
    /// expire within the refresh threshold.
    ///
    /// After a failed proactive refresh, still-valid credentials are used
    /// without another attempt until the refresh retry interval passes.
    pub async fn ensure_authenticated(&self) -> bool {
        match self.credentials() {
            None => return false,
            Some(c) if !self.refresh_due(&c) => return true,
            Some(_) => {}
        }

        let _guard = self.refresh_lock.lock().await;
        let Some(current) = self.credentials() else {
            return false;
        };
        if !self.refresh_due(&current) {
            return true;
        }
        self.refresh_locked(current, false).await
    }

    fn refresh_due(&self, credentials: &Credentials) -> bool {
        let now = unix_now();
        if !credentials.expires_within(self.refresh_threshold, now) {
            return false;
        }
        if credentials.is_expired_at(now) {
            return true;
        }
        self.lock()
            .refresh_not_before
            .is_none_or(|at| Instant::now() >= at)
    }

    /// Run one token request under the auth deadline and count it.
    async fn token_request<F>(&self, operation: &'static str, request: F) -> Result<TokenGrant>
    where
        F: Future<Output = Result<TokenGrant>>,
    {
        let grant = match tokio::time::timeout(self.request_timeout, request).await {
            Ok(grant) => grant,
            Err(_) => Err(TillitError::Timeout(self.request_timeout)),
        };
        record_token_request(operation, grant.is_ok());
        grant
    }

    /// Force a refresh after the service rejected the request carrying
    /// `rejected` headers (as returned by [`auth_headers`](Self::auth_headers)).
    ///
    /// Callers rejected with the same token share one refresh; a caller whose
    /// token was already replaced returns `true` without another request.
    pub async fn refresh_after_rejection(&self, rejected: &HeaderMap) -> bool {
        let rejected = rejected
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let _guard = self.refresh_lock.lock().await;
        let Some(current) = self.credentials() else {
            return false;
        };
        if let Some(rejected) = rejected.as_deref() {
            let rejected_token = rejected.split_once(' ').map_or(rejected, |(_, t)| t);
            if !current.holds_token(rejected_token) {
                debug!("credentials already replaced since rejection");
                return !current.is_expired_at(unix_now());
            }
        }
        self.refresh_locked(current, true).await
    }

    /// Refresh while holding `refresh_lock`.
    ///
    /// On failure unexpired credentials are kept unless `forced` (the
    /// service already rejected them).
    async fn refresh_locked(&self, current: Credentials, forced: bool) -> bool {
        self.set_state(AuthState::Refreshing);
        let shop = current.shop.clone();

        let grant = match &current.refresh_token {
            Some(refresh) => {
                self.token_request(
                    "refresh",
                    self.api.refresh_token(refresh.expose_secret(), &shop),
                )
                .await
            }
            None => match self.live_session_token() {
                Some(token) => {
                    self.token_request(
                        "exchange",
                        self.api
                            .exchange_session_token(token.expose_secret(), &shop),
                    )
                    .await
                }
                None => Err(TillitError::Authentication(
                    "no refresh token and the session token has expired".into(),
                )),
            },
        };

        match grant.and_then(|g| Credentials::from_grant(g, &shop, unix_now())) {
            Ok(mut fresh) => {
                if fresh.refresh_token.is_none() {
                    fresh.refresh_token = current.refresh_token.clone();
                }
                self.persist(&fresh).await;
                info!(shop = shop.as_str(), expires_at = fresh.expires_at, "refreshed credentials");
                self.install(fresh);
                true
            }
            Err(e) if forced || current.is_expired_at(unix_now()) => {
                let _ = self.fail(e);
                false
            }
            Err(e) => {
                warn!(
                    error = %e,
                    retry_in_ms = self.refresh_retry_interval.as_millis() as u64,
                    "refresh failed, keeping current credentials until expiry"
                );
                let mut inner = self.lock();
                inner.state = AuthState::Authenticated;
                inner.last_error = Some(e.to_string());
                inner.refresh_not_before = Some(Instant::now() + self.refresh_retry_interval);
                true
            }
        }
    }

    fn live_session_token(&self) -> Option<SecretString> {
        let inner = self.lock();
        inner
            .session
            .as_ref()
            .filter(|s| s.claims.exp > unix_now())
            .map(|s| s.token.clone())
    }

    /// Headers for an authenticated request; empty when there are no
    /// unexpired credentials.
    pub fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let Some(credentials) = self.credentials() else {
            return headers;
        };
        if credentials.is_expired_at(unix_now()) {
            return headers;
        }
        match HeaderValue::from_str(&credentials.authorization_value()) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => {
                warn!("access token is not a valid header value");
                return HeaderMap::new();
            }
        }
        if let Ok(shop) = HeaderValue::from_str(&credentials.shop) {
            headers.insert(SHOP_HEADER, shop);
        }
        headers
    }

    /// Forget credentials in memory and in storage.
    pub async fn logout(&self) {
        let _guard = self.refresh_lock.lock().await;
        let shop = {
            let mut inner = self.lock();
            let shop = inner
                .credentials
                .take()
                .map(|c| c.shop)
                .or_else(|| inner.session.as_ref().map(|s| s.shop.clone()));
            inner.session = None;
            inner.state = AuthState::Unauthenticated;
            inner.last_error = None;
            shop
        };
        if let (Some(shop), Some((_, store))) = (shop, &self.vault) {
            if let Err(e) = store.remove(&shop).await {
                warn!(error = %e, "failed to remove stored credentials");
            }
        }
        info!("logged out");
    }

    pub fn state(&self) -> AuthState {
        self.lock().state
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials()
            .is_some_and(|c| !c.is_expired_at(unix_now()))
    }

    /// Shop identity of the current session, if any.
    pub fn shop(&self) -> Option<String> {
        let inner = self.lock();
        inner
            .credentials
            .as_ref()
            .map(|c| c.shop.clone())
            .or_else(|| inner.session.as_ref().map(|s| s.shop.clone()))
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Unix expiry of the current access token.
    pub fn expires_at(&self) -> Option<u64> {
        self.lock().credentials.as_ref().map(|c| c.expires_at)
    }

    fn credentials(&self) -> Option<Credentials> {
        self.lock().credentials.clone()
    }

    async fn persist(&self, credentials: &Credentials) {
        if let Err(e) = self.seal_and_save(credentials).await {
            warn!(error = %e, "failed to persist credentials");
        }
    }

    async fn seal_and_save(&self, credentials: &Credentials) -> Result<()> {
        let Some((cipher, store)) = &self.vault else {
            return Ok(());
        };
        let plaintext = serde_json::to_vec(&credentials.to_stored())?;
        let cipher = cipher.clone();
        let shop = credentials.shop.clone();
        let sealed = tokio::task::spawn_blocking(move || cipher.seal(&shop, &plaintext))
            .await
            .map_err(|e| TillitError::Crypto(format!("seal task failed: {e}")))??;
        store.save(&credentials.shop, &sealed).await
    }

    /// Any read, decrypt or parse failure is treated as "nothing stored".
    async fn load_stored(&self, shop: &str) -> Option<Credentials> {
        match self.load_and_open(shop).await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(shop, error = %e, "ignoring unreadable stored credentials");
                None
            }
        }
    }

    async fn load_and_open(&self, shop: &str) -> Result<Option<Credentials>> {
        let Some((cipher, store)) = &self.vault else {
            return Ok(None);
        };
        let Some(sealed) = store.load(shop).await? else {
            return Ok(None);
        };
        let cipher = cipher.clone();
        let owner = shop.to_string();
        let plaintext = tokio::task::spawn_blocking(move || cipher.open(&owner, &sealed))
            .await
            .map_err(|e| TillitError::Crypto(format!("open task failed: {e}")))??;
        let stored: StoredCredentials = serde_json::from_slice(&plaintext)?;
        let credentials = Credentials::from(stored);
        if credentials.shop != shop {
            return Err(TillitError::Crypto(
                "stored credentials belong to another shop".into(),
            ));
        }
        Ok(Some(credentials))
    }
}

fn record_token_request(operation: &'static str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    metrics::counter!(
        telemetry::AUTH_TOKEN_REQUESTS_TOTAL,
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}
