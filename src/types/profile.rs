//! Risk profile payloads and the total result type returned to callers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::{Result, TillitError};

/// Highest valid `riskScore`.
pub const MAX_RISK_SCORE: u32 = 100;

/// Risk verdict computed by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    ZeroRisk,
    MediumRisk,
    HighRisk,
}

/// A validated risk profile (the service's success body).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileData {
    pub success: bool,
    pub risk_tier: RiskTier,
    pub risk_score: u32,
    pub total_orders: u32,
    pub failed_attempts: u32,
    pub successful_deliveries: u32,
    pub is_new_customer: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<String>>,
}

impl ProfileData {
    /// Parse and validate a success body.
    ///
    /// Missing fields, unknown tiers, out-of-range scores, an empty message
    /// or `success: false` are all [`TillitError::InvalidResponse`].
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let data: ProfileData = serde_json::from_slice(body)
            .map_err(|e| TillitError::InvalidResponse(format!("malformed profile payload: {e}")))?;
        data.validate()
    }

    /// Check the invariants serde cannot express.
    pub fn validate(self) -> Result<Self> {
        if !self.success {
            return Err(TillitError::InvalidResponse(format!(
                "service reported an unsuccessful lookup: {}",
                self.message
            )));
        }
        if self.risk_score > MAX_RISK_SCORE {
            return Err(TillitError::InvalidResponse(format!(
                "riskScore {} outside 0..={MAX_RISK_SCORE}",
                self.risk_score
            )));
        }
        if self.message.trim().is_empty() {
            return Err(TillitError::InvalidResponse("empty message".into()));
        }
        Ok(self)
    }

    /// Conservative stand-in used whenever no trustworthy answer exists:
    /// a new customer with no history and no risk signal.
    pub fn neutral(message: impl Into<String>) -> Self {
        Self {
            success: false,
            risk_tier: RiskTier::ZeroRisk,
            risk_score: 0,
            total_orders: 0,
            failed_attempts: 0,
            successful_deliveries: 0,
            is_new_customer: true,
            message: message.into(),
            recommendations: None,
        }
    }
}

/// Diagnostic attached to fallback results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(
        default,
        rename = "retryAfterSecs",
        skip_serializing_if = "Option::is_none",
        with = "opt_secs"
    )]
    pub retry_after: Option<Duration>,
}

impl From<&TillitError> for ErrorDescriptor {
    fn from(err: &TillitError) -> Self {
        let kind = err.kind();
        Self {
            kind,
            code: kind.as_code().to_string(),
            message: err.to_string(),
            retryable: err.is_transient() || matches!(err, TillitError::CircuitOpen),
            retry_after: err.retry_after(),
        }
    }
}

/// Where a [`ProfileResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileSource {
    Remote,
    Cache,
    Fallback,
}

impl ProfileSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ProfileSource::Remote => "remote",
            ProfileSource::Cache => "cache",
            ProfileSource::Fallback => "fallback",
        }
    }
}

/// What [`DataClient::fetch_profile`](crate::DataClient::fetch_profile)
/// always resolves to: a complete profile, plus an error descriptor when
/// the profile is a fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResult {
    pub profile: ProfileData,
    pub source: ProfileSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
}

impl ProfileResult {
    pub fn remote(profile: ProfileData) -> Self {
        Self {
            profile,
            source: ProfileSource::Remote,
            error: None,
        }
    }

    pub fn cached(profile: ProfileData) -> Self {
        Self {
            profile,
            source: ProfileSource::Cache,
            error: None,
        }
    }

    /// Neutral profile carrying a human-readable message and the error code.
    pub fn fallback(err: &TillitError) -> Self {
        Self {
            profile: ProfileData::neutral(fallback_message(err.kind())),
            source: ProfileSource::Fallback,
            error: Some(ErrorDescriptor::from(err)),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == ProfileSource::Fallback
    }

    /// Convert back to a `Result`, for callers that prefer `?`.
    pub fn into_result(self) -> std::result::Result<ProfileData, ErrorDescriptor> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.profile),
        }
    }
}

fn fallback_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Validation => {
            "Customer details are missing or invalid; treating as a new customer."
        }
        ErrorKind::Authentication | ErrorKind::Configuration => {
            "Risk service is not configured for this store; treating as a new customer."
        }
        ErrorKind::CircuitBreaker | ErrorKind::RateLimit => {
            "Risk service is busy; treating as a new customer for now."
        }
        ErrorKind::Cancelled => "Risk lookup was cancelled; treating as a new customer.",
        _ => "Risk data is temporarily unavailable; treating as a new customer.",
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        Ok(secs.and_then(crate::error::retry_after_from_secs))
    }
}
