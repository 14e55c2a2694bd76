//! Geocoding interface consumed by the curation side.
//!
//! The ingest pipeline never geocodes on its own; it only reads judgments
//! that curation produced. This module defines the contract a provider
//! implementation satisfies, plus the error classifiers the curation loop
//! consults to decide between backing off and giving up. The ingest loop
//! itself never retries on these; the next scheduled run is the retry.

use async_trait::async_trait;
use thiserror::Error;

/// A resolved free-text location.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeResult {
    pub lat: f64,
    pub lng: f64,
    /// Provider-reported match confidence in `[0, 1]`.
    pub confidence: f64,
    /// Short provider tag, e.g. `gmaps`.
    pub provider: String,
    /// Human-readable resolved name as the provider formats it.
    pub display_name: String,
}

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("no match for {0:?}")]
    NoMatch(String),
    #[error("provider rate limit hit")]
    RateLimit,
    #[error("provider quota exceeded")]
    QuotaExceeded,
    #[error("provider timed out")]
    Timeout,
    #[error("provider failure: {0}")]
    Provider(String),
}

/// One geocoding provider. `region_hint` narrows ambiguous free text to a
/// department or locality and may be empty.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Short tag identifying the provider in judgments, e.g. `gmaps`.
    fn provider(&self) -> &str;

    async fn geocode(&self, free_text: &str, region_hint: &str)
        -> Result<GeocodeResult, GeocodeError>;
}

fn find_geocode_error(err: &anyhow::Error) -> Option<&GeocodeError> {
    err.chain().find_map(|cause| cause.downcast_ref())
}

/// True when the error chain contains a provider rate limit.
pub fn is_rate_limit_error(err: &anyhow::Error) -> bool {
    matches!(find_geocode_error(err), Some(GeocodeError::RateLimit))
}

/// True when the error chain contains an exhausted provider quota.
pub fn is_quota_exceeded_error(err: &anyhow::Error) -> bool {
    matches!(find_geocode_error(err), Some(GeocodeError::QuotaExceeded))
}

/// True when the error chain contains a provider or transport timeout.
pub fn is_timeout_error(err: &anyhow::Error) -> bool {
    if matches!(find_geocode_error(err), Some(GeocodeError::Timeout)) {
        return true;
    }
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
        .any(reqwest::Error::is_timeout)
}
