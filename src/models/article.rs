//! Normative articles, curation inputs, and radar points.
//!
//! The curated tables (`descriptions`, `locations`) are produced by the
//! human curation side and are read-only to the ingest pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normative reference from the traffic ordinance, e.g. article `13.3.A`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub text: String,
    /// Top-level article number.
    pub code: i8,
    pub title: String,
}

/// Curated mapping from an offense description (case-sensitive, unique) to
/// the ordered list of article ids it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionClassification {
    pub description: String,
    pub article_ids: Vec<String>,
    /// Derived from `article_ids`, deduplicated in first-seen order.
    pub article_codes: Vec<i8>,
    pub updated_at: DateTime<Utc>,
}

/// Curated geocoding judgment for one `(db_id, location)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationJudgment {
    pub db_id: u32,
    pub location: String,
    pub lat: f64,
    pub lng: f64,
    /// True when the location is an electronic surveillance point.
    pub is_electronic: bool,
    pub method: String,
    pub confidence: f64,
    pub notes: String,
    /// Merge target chosen by curation; enrichment only applies once this
    /// is set.
    pub canonical_location: Option<String>,
    /// H3 cells at resolutions 1..8; zero means unset.
    pub h3_cells: [u64; 8],
}

/// An electronic surveillance point along a national route.
#[derive(Debug, Clone, PartialEq)]
pub struct Radar {
    /// Route number, leading zeros trimmed.
    pub route: String,
    /// Kilometer marker, normalized to `<km>k<meters3>` with multiple
    /// markers joined by `/`.
    pub progresiva: String,
    /// Managing organization.
    pub org: String,
    pub description: String,
    pub lat: f64,
    pub lng: f64,
}
