//! Profile lookup requests and their normalized wire parameters.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::CacheKey;
use crate::{Result, TillitError};

/// Longest accepted order id / checkout token.
const MAX_OPAQUE_ID_LEN: usize = 256;

/// Fewest and most digits accepted in a phone number (E.164 allows 15).
const MIN_PHONE_DIGITS: usize = 7;
const MAX_PHONE_DIGITS: usize = 15;

/// A customer lookup.
///
/// At least one identifier must be set. Raw phone numbers and emails are
/// normalized and SHA-256 hashed before they leave the process; callers
/// that already hold hashes can pass them directly.
///
/// ```rust
/// # use tillit::ProfileRequest;
/// let request = ProfileRequest::new().phone("+92 300 1234567").order_id("1001");
/// let params = request.normalize().unwrap();
/// assert!(params.phone_hash.is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_token: Option<String>,
    /// Sent as `X-Correlation-Id`; not part of the cache key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Skip the cache lookup (the fresh answer is still cached).
    #[serde(default)]
    pub force_refresh: bool,
}

impl ProfileRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn phone_hash(mut self, hash: impl Into<String>) -> Self {
        self.phone_hash = Some(hash.into());
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn email_hash(mut self, hash: impl Into<String>) -> Self {
        self.email_hash = Some(hash.into());
        self
    }

    pub fn order_id(mut self, id: impl Into<String>) -> Self {
        self.order_id = Some(id.into());
        self
    }

    pub fn checkout_token(mut self, token: impl Into<String>) -> Self {
        self.checkout_token = Some(token.into());
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    /// Validate identifiers and produce the parameters sent on the wire.
    ///
    /// Any identifier that is present but malformed is an error, as is a
    /// request with no identifier at all.
    pub fn normalize(&self) -> Result<ProfileParams> {
        let phone_hash = match (non_blank(&self.phone), non_blank(&self.phone_hash)) {
            (Some(phone), given) => {
                let derived = sha256_hex(&normalize_phone(phone)?);
                if let Some(given) = given {
                    if validate_hash("phoneHash", given)? != derived {
                        return Err(TillitError::InvalidInput(
                            "phone and phoneHash refer to different numbers".into(),
                        ));
                    }
                }
                Some(derived)
            }
            (None, Some(given)) => Some(validate_hash("phoneHash", given)?),
            (None, None) => None,
        };

        let email_hash = match (non_blank(&self.email), non_blank(&self.email_hash)) {
            (Some(email), given) => {
                let derived = sha256_hex(&normalize_email(email)?);
                if let Some(given) = given {
                    if validate_hash("emailHash", given)? != derived {
                        return Err(TillitError::InvalidInput(
                            "email and emailHash refer to different addresses".into(),
                        ));
                    }
                }
                Some(derived)
            }
            (None, Some(given)) => Some(validate_hash("emailHash", given)?),
            (None, None) => None,
        };

        let order_id = non_blank(&self.order_id)
            .map(|v| validate_opaque("orderId", v))
            .transpose()?;
        let checkout_token = non_blank(&self.checkout_token)
            .map(|v| validate_opaque("checkoutToken", v))
            .transpose()?;

        let params = ProfileParams {
            phone_hash,
            email_hash,
            order_id,
            checkout_token,
        };
        if params.is_empty() {
            return Err(TillitError::InvalidInput(
                "at least one of phone, email, orderId or checkoutToken is required".into(),
            ));
        }
        Ok(params)
    }
}

/// Normalized identifiers, exactly as sent to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_token: Option<String>,
}

impl ProfileParams {
    fn is_empty(&self) -> bool {
        self.pairs().is_empty()
    }

    /// Present parameters as `(wire name, value)` pairs.
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        [
            ("phoneHash", self.phone_hash.as_deref()),
            ("emailHash", self.email_hash.as_deref()),
            ("orderId", self.order_id.as_deref()),
            ("checkoutToken", self.checkout_token.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }

    /// Key shared by the response cache and the in-flight table.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_params(self.pairs())
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// `+92 (300) 123-4567` → `+923001234567`; a leading `00` becomes `+`.
fn normalize_phone(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let (international, rest) = if let Some(rest) = trimmed.strip_prefix('+') {
        (true, rest)
    } else if let Some(rest) = trimmed.strip_prefix("00") {
        (true, rest)
    } else {
        (false, trimmed)
    };

    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => {
                return Err(TillitError::InvalidInput(format!(
                    "phone contains invalid character {c:?}"
                )));
            }
        }
    }
    if !(MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len()) {
        return Err(TillitError::InvalidInput(format!(
            "phone must have {MIN_PHONE_DIGITS}-{MAX_PHONE_DIGITS} digits, got {}",
            digits.len()
        )));
    }
    Ok(if international {
        format!("+{digits}")
    } else {
        digits
    })
}

fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(TillitError::InvalidInput("email is not a valid address".into()));
    }
    Ok(email)
}

fn validate_hash(field: &str, hash: &str) -> Result<String> {
    if hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(hash.to_ascii_lowercase())
    } else {
        Err(TillitError::InvalidInput(format!(
            "{field} must be a 64-character hex SHA-256 digest"
        )))
    }
}

fn validate_opaque(field: &str, value: &str) -> Result<String> {
    if value.len() > MAX_OPAQUE_ID_LEN {
        return Err(TillitError::InvalidInput(format!(
            "{field} longer than {MAX_OPAQUE_ID_LEN} bytes"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(TillitError::InvalidInput(format!(
            "{field} contains control characters"
        )));
    }
    Ok(value.to_string())
}

pub(crate) fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}
