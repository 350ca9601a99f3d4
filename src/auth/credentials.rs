//! Access credentials and the token-endpoint wire shape.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{Result, TillitError};

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Body returned by the token-exchange and refresh endpoints.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub shop: Option<String>,
    #[serde(default)]
    pub subject_id: Option<String>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("shop", &self.shop)
            .field("subject_id", &self.subject_id)
            .finish()
    }
}

/// Credentials for the data endpoint.
///
/// Token material lives in [`SecretString`]s, so `Debug` output is redacted.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// Unix seconds.
    pub expires_at: u64,
    pub token_type: String,
    pub shop: String,
    pub subject_id: Option<String>,
}

impl Credentials {
    /// Build credentials from a token grant issued for `shop`.
    ///
    /// A grant naming a different shop, or carrying an empty token or zero
    /// lifetime, is rejected.
    pub fn from_grant(grant: TokenGrant, shop: &str, now: u64) -> Result<Self> {
        if grant.access_token.trim().is_empty() {
            return Err(TillitError::Authentication(
                "token grant has an empty access token".into(),
            ));
        }
        if grant.expires_in == 0 {
            return Err(TillitError::Authentication(
                "token grant has zero lifetime".into(),
            ));
        }
        if let Some(granted) = grant.shop.as_deref() {
            if !granted.eq_ignore_ascii_case(shop) {
                return Err(TillitError::Authentication(format!(
                    "token grant issued for {granted}, expected {shop}"
                )));
            }
        }
        Ok(Self {
            access_token: SecretString::from(grant.access_token),
            refresh_token: grant
                .refresh_token
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
            expires_at: now.saturating_add(grant.expires_in),
            token_type: grant.token_type,
            shop: shop.to_string(),
            subject_id: grant.subject_id,
        })
    }

    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// True when the token expires within `threshold` of `now`.
    pub fn expires_within(&self, threshold: Duration, now: u64) -> bool {
        now.saturating_add(threshold.as_secs()) >= self.expires_at
    }

    /// Value for the `Authorization` header, e.g. `Bearer abc`.
    pub fn authorization_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token.expose_secret())
    }

    /// Whether `token` is the access token held here.
    pub(crate) fn holds_token(&self, token: &str) -> bool {
        self.access_token.expose_secret() == token
    }

    pub(crate) fn to_stored(&self) -> StoredCredentials {
        StoredCredentials {
            access_token: self.access_token.expose_secret().to_string(),
            refresh_token: self
                .refresh_token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
            expires_at: self.expires_at,
            token_type: self.token_type.clone(),
            shop: self.shop.clone(),
            subject_id: self.subject_id.clone(),
        }
    }
}

/// Plaintext persisted form; only ever written inside an encrypted envelope.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredCredentials {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: u64,
    token_type: String,
    shop: String,
    subject_id: Option<String>,
}

impl From<StoredCredentials> for Credentials {
    fn from(stored: StoredCredentials) -> Self {
        Self {
            access_token: SecretString::from(stored.access_token),
            refresh_token: stored.refresh_token.map(SecretString::from),
            expires_at: stored.expires_at,
            token_type: stored.token_type,
            shop: stored.shop,
            subject_id: stored.subject_id,
        }
    }
}

/// Current wall-clock time in unix seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
