//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.tillit/config.toml` (user)
//! 3. `/etc/tillit/config.toml` (system)
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.tillit/secrets.toml` (user, must be 0600)
//! 2. `/etc/tillit/secrets.toml` (system, must be 0600)
//!
//! and fall back to `TILLIT_SESSION_SECRET` / `TILLIT_STORAGE_SECRET`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::auth::{
    AuthConfig, DEFAULT_AUTH_REQUEST_TIMEOUT, DEFAULT_KDF_ITERATIONS, DEFAULT_REFRESH_RETRY_INTERVAL,
    FileCredentialStore,
};
use crate::cache::CacheConfig;
use crate::client::{Endpoints, RequestMethod};
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use crate::{Result, TillitError};

pub const SESSION_SECRET_ENV: &str = "TILLIT_SESSION_SECRET";
pub const STORAGE_SECRET_ENV: &str = "TILLIT_STORAGE_SECRET";

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub dedup: DedupSection,
    #[serde(default)]
    pub auth: Option<AuthSection>,
}

/// Where the risk service lives and how to talk to it.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub base_url: String,
    #[serde(default)]
    pub request_method: RequestMethod,
    #[serde(default)]
    pub endpoints: Endpoints,
    /// Health ping deadline in seconds (default: 5).
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

fn default_health_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    pub attempt_timeout_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter: true,
            attempt_timeout_ms: 10_000,
        }
    }
}

impl RetrySection {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .max_retries(self.max_retries)
            .base_delay(Duration::from_millis(self.base_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .jitter(self.jitter)
            .attempt_timeout(Duration::from_millis(self.attempt_timeout_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub failure_threshold: u32,
    pub cool_down_secs: u64,
}

impl Default for CircuitBreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cool_down_secs: 30,
        }
    }
}

impl CircuitBreakerSection {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .failure_threshold(self.failure_threshold)
            .cool_down(Duration::from_secs(self.cool_down_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub max_entries: u64,
    pub ttl_secs: u64,
    pub new_customer_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_entries: 500,
            ttl_secs: 300,
            new_customer_ttl_secs: 60,
        }
    }
}

impl CacheSection {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .max_entries(self.max_entries)
            .ttl(Duration::from_secs(self.ttl_secs))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupSection {
    pub inflight_ttl_secs: u64,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            inflight_ttl_secs: 300,
        }
    }
}

/// Authentication settings. Secrets never live in this file.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    /// Expected session token audience (the app's API key).
    pub api_key: String,
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_secs: u64,
    /// Deadline for each token exchange or refresh request.
    #[serde(default = "default_auth_request_timeout")]
    pub request_timeout_secs: u64,
    /// Pause after a failed proactive refresh.
    #[serde(default = "default_refresh_retry")]
    pub refresh_retry_secs: u64,
    /// Persist sealed credentials to disk (requires a storage secret).
    #[serde(default = "default_true")]
    pub persist: bool,
    /// Defaults to `<data dir>/tillit/credentials`.
    #[serde(default)]
    pub credential_dir: Option<PathBuf>,
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
}

fn default_refresh_threshold() -> u64 {
    300
}

fn default_auth_request_timeout() -> u64 {
    DEFAULT_AUTH_REQUEST_TIMEOUT.as_secs()
}

fn default_refresh_retry() -> u64 {
    DEFAULT_REFRESH_RETRY_INTERVAL.as_secs()
}

fn default_true() -> bool {
    true
}

fn default_kdf_iterations() -> u32 {
    DEFAULT_KDF_ITERATIONS
}

/// Secrets configuration.
#[derive(Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub session_secret: Option<String>,
    #[serde(default)]
    pub storage_secret: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("session_secret", &self.session_secret.as_ref().map(|_| "[REDACTED]"))
            .field("storage_secret", &self.storage_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.tillit/config.toml`
    /// 3. `/etc/tillit/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        let content = fs::read_to_string(&path).map_err(|e| {
            TillitError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        Self::parse(&content).map_err(|e| match e {
            TillitError::Configuration(msg) => {
                TillitError::Configuration(format!("{msg} (in {path:?})"))
            }
            other => other,
        })
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| TillitError::Configuration(format!("Failed to parse config: {e}")))
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(TillitError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".tillit").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/tillit/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(TillitError::Configuration(
            "No config file found. Create ~/.tillit/config.toml or /etc/tillit/config.toml"
                .to_string(),
        ))
    }

    /// Authentication settings with secrets from the standard locations.
    pub fn auth_config(&self) -> Result<Option<AuthConfig>> {
        if self.auth.is_none() {
            return Ok(None);
        }
        let secrets = Secrets::load()?;
        self.auth_config_with(&secrets)
    }

    /// Authentication settings using the given secrets.
    pub fn auth_config_with(&self, secrets: &Secrets) -> Result<Option<AuthConfig>> {
        let Some(section) = &self.auth else {
            return Ok(None);
        };

        let mut auth = AuthConfig::new(section.api_key.clone())
            .refresh_threshold(Duration::from_secs(section.refresh_threshold_secs))
            .request_timeout(Duration::from_secs(section.request_timeout_secs))
            .refresh_retry_interval(Duration::from_secs(section.refresh_retry_secs))
            .kdf_iterations(section.kdf_iterations);
        if let Some(secret) = secrets.session_secret() {
            auth = auth.session_secret(secret);
        }
        if let Some(secret) = secrets.storage_secret() {
            auth = auth.storage_secret(secret);
            if section.persist {
                let dir = section
                    .credential_dir
                    .clone()
                    .or_else(FileCredentialStore::default_dir)
                    .ok_or_else(|| {
                        TillitError::Configuration(
                            "no credential_dir configured and no platform data dir".into(),
                        )
                    })?;
                auth = auth.store(Arc::new(FileCredentialStore::new(dir)));
            }
        }
        Ok(Some(auth))
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Returns empty secrets if no file exists (the environment may still
    /// provide them).
    pub fn load() -> Result<Self> {
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".tillit").join("secrets.toml");
            if user_secrets.exists() {
                Self::check_permissions(&user_secrets)?;
                return Self::load_from_file(&user_secrets);
            }
        }

        let system_secrets = PathBuf::from("/etc/tillit/secrets.toml");
        if system_secrets.exists() {
            Self::check_permissions(&system_secrets)?;
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            TillitError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            TillitError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    pub fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            TillitError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            return Err(TillitError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    pub fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// Session token HMAC secret, falling back to `TILLIT_SESSION_SECRET`.
    pub fn session_secret(&self) -> Option<String> {
        non_empty(self.session_secret.clone()).or_else(|| env_secret(SESSION_SECRET_ENV))
    }

    /// Credential encryption secret, falling back to `TILLIT_STORAGE_SECRET`.
    pub fn storage_secret(&self) -> Option<String> {
        non_empty(self.storage_secret.clone()).or_else(|| env_secret(STORAGE_SECRET_ENV))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn env_secret(var: &str) -> Option<String> {
    non_empty(std::env::var(var).ok())
}
