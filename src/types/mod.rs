//! Public types for profile lookups.

pub mod health;
pub mod profile;
pub mod request;

pub use health::HealthStatus;
pub use profile::{ErrorDescriptor, ProfileData, ProfileResult, ProfileSource, RiskTier};
pub use request::{ProfileParams, ProfileRequest};
