//! Host-issued session token validation.
//!
//! The embedding storefront hands us a short-lived HS256 JWT. We check its
//! time window and audience, check the signature when the shared secret is
//! known, and require the issuer and destination to name the same shop.

use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Result, TillitError};

/// Clock skew tolerated on `exp`/`nbf`, in seconds.
pub const DEFAULT_LEEWAY_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub iss: String,
    pub dest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

/// A session token that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedSession {
    pub claims: SessionClaims,
    /// Shop host taken from `dest`, e.g. `shop.example.com`.
    pub shop: String,
    pub token: SecretString,
}

/// Validates session tokens for one application audience.
#[derive(Debug, Clone)]
pub struct SessionTokenValidator {
    audience: String,
    secret: Option<SecretString>,
    leeway: u64,
}

impl SessionTokenValidator {
    /// Without a `secret` only claims are checked, never the signature.
    pub fn new(audience: impl Into<String>, secret: Option<SecretString>) -> Self {
        Self {
            audience: audience.into(),
            secret,
            leeway: DEFAULT_LEEWAY_SECS,
        }
    }

    pub fn leeway(mut self, secs: u64) -> Self {
        self.leeway = secs;
        self
    }

    pub fn verifies_signature(&self) -> bool {
        self.secret.is_some()
    }

    pub fn validate(&self, token: &str) -> Result<ValidatedSession> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TillitError::Authentication("empty session token".into()));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "aud"]);
        validation.validate_nbf = true;
        validation.leeway = self.leeway;

        let key = match &self.secret {
            Some(secret) => DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            None => {
                validation.insecure_disable_signature_validation();
                DecodingKey::from_secret(&[])
            }
        };

        let data = decode::<SessionClaims>(token, &key, &validation).map_err(|e| {
            let reason = match e.kind() {
                JwtErrorKind::ExpiredSignature => "session token expired".to_string(),
                JwtErrorKind::ImmatureSignature => "session token not yet valid".to_string(),
                JwtErrorKind::InvalidAudience => "session token audience mismatch".to_string(),
                JwtErrorKind::InvalidSignature => "session token signature invalid".to_string(),
                JwtErrorKind::InvalidAlgorithm => "session token algorithm not HS256".to_string(),
                JwtErrorKind::MissingRequiredClaim(claim) => {
                    format!("session token missing {claim} claim")
                }
                _ => format!("malformed session token: {e}"),
            };
            warn!(reason = reason.as_str(), "rejected session token");
            TillitError::Authentication(reason)
        })?;

        let claims = data.claims;
        let shop = host_of(&claims.dest)
            .ok_or_else(|| TillitError::Authentication("session token dest is not a URL".into()))?;
        let issuer = host_of(&claims.iss)
            .ok_or_else(|| TillitError::Authentication("session token iss is not a URL".into()))?;
        if issuer != shop {
            warn!(issuer = issuer.as_str(), shop = shop.as_str(), "session token issuer mismatch");
            return Err(TillitError::Authentication(
                "session token issuer does not match destination".into(),
            ));
        }

        Ok(ValidatedSession {
            claims,
            shop,
            token: SecretString::from(token.to_string()),
        })
    }
}

/// Lowercase host of `value`; bare hosts get an `https://` scheme first.
fn host_of(value: &str) -> Option<String> {
    let value = value.trim();
    let url = if value.contains("://") {
        Url::parse(value).ok()?
    } else {
        Url::parse(&format!("https://{value}")).ok()?
    };
    url.host_str()
        .filter(|h| !h.is_empty())
        .map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_of_accepts_urls_and_bare_hosts() {
        assert_eq!(
            host_of("https://Shop.Example.com/admin").as_deref(),
            Some("shop.example.com")
        );
        assert_eq!(host_of("shop.example.com").as_deref(), Some("shop.example.com"));
        assert_eq!(host_of(""), None);
    }

    #[test]
    fn empty_token_rejected() {
        let validator = SessionTokenValidator::new("app", None);
        assert!(validator.validate("  ").is_err());
        assert!(validator.validate("not.a.jwt").is_err());
    }
}
