//! Offense and document models.
//!
//! One `TrafficOffense` row is emitted per recorded violation. The document
//! header (source URL, bulletin document id, publication date) is small, so
//! every offense carries its own copy instead of sharing a reference.

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::vehicle::VehicleInfo;

/// A document reference discovered from the source's search listing but not
/// necessarily downloaded yet. Persisted per source in `documents.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentIndexEntry {
    /// Absolute href; primary key within a source.
    pub href: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
}

/// Header extracted from one bulletin page, shared by all of its offenses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    /// URL of the source page this document was extracted from.
    pub source: String,
    /// Authority-issued document id, e.g. `488/025` or `s/n`.
    pub doc_id: String,
    /// Publication date in the local timezone, at midnight.
    pub date: Option<DateTime<Local>>,
}

/// Rows recorded before this date are source noise, not real events.
pub static EARLIEST_EVENT: Lazy<DateTime<Local>> = Lazy::new(|| {
    Local
        .from_local_datetime(
            &NaiveDate::from_ymd_opt(2015, 1, 1)
                .expect("valid constant date")
                .and_hms_opt(0, 0, 0)
                .expect("valid constant time"),
        )
        .single()
        .expect("unambiguous constant datetime")
});

static VEHICLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]{4,10}$").expect("valid vehicle pattern"));

/// Row-level validation failures. The failing row is still persisted; the
/// error rides along in the `error` column and feeds the document failsafe.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("matrícula inválida: {0:?}")]
    InvalidVehicle(String),
    #[error("fecha vacía")]
    MissingTime,
    #[error("fecha anterior a 2015")]
    TimeTooOld,
    #[error("fecha posterior a publicación")]
    TimeAfterPublication,
    #[error("descripción vacía")]
    EmptyDescription,
}

/// One recorded traffic violation.
#[derive(Debug, Clone, Default)]
pub struct TrafficOffense {
    /// Document header, copied into every row of the document.
    pub doc: Document,
    /// Source database id (see `sources::DbReference`).
    pub db_id: u32,
    /// 1-based index of this row within its document.
    pub record_id: u32,
    /// Authority-issued offense id, empty when the source omits it.
    pub id: String,
    /// Normalized plate, uppercase, no whitespace or dashes.
    pub vehicle: String,
    pub vehicle_info: VehicleInfo,
    /// Event timestamp, minute precision. `None` when the row carried no
    /// parseable date.
    pub time: Option<DateTime<Local>>,
    /// Raw location text as printed in the bulletin (canonicalized by the
    /// enricher when curation data exists).
    pub location: String,
    /// Original location text, set only once `location` has been replaced by
    /// its canonical form.
    pub display_location: String,
    pub description: String,
    /// Fine amount in hundredths of UR.
    pub ur: i64,
    /// Validation failure for this row, empty when the row is clean.
    pub error: String,
    /// Geocoded point, when the enricher resolved the location.
    pub point: Option<(f64, f64)>,
    /// H3 cells at resolutions 1..8; zero means unset.
    pub h3_cells: [u64; 8],
    /// Normative article ids, e.g. `["13.3.A"]`.
    pub article_ids: Vec<String>,
    /// Deduplicated numeric article codes, first-seen order.
    pub article_codes: Vec<i8>,
}

impl TrafficOffense {
    /// Validate the §3 row invariants: plate shape, event time within
    /// `[2015-01-01, publication date]`, non-empty description.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !VEHICLE_RE.is_match(&self.vehicle) {
            return Err(ValidationError::InvalidVehicle(self.vehicle.clone()));
        }
        let time = self.time.ok_or(ValidationError::MissingTime)?;
        if time < *EARLIEST_EVENT {
            return Err(ValidationError::TimeTooOld);
        }
        if let Some(published) = self.doc.date {
            // Publication dates are midnight; an event any time that same
            // day still precedes the bulletin.
            if time.date_naive() > published.date_naive() {
                return Err(ValidationError::TimeAfterPublication);
            }
        }
        if self.description.is_empty() {
            return Err(ValidationError::EmptyDescription);
        }
        Ok(())
    }
}
