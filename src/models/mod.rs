//! Core data model: documents, offenses, vehicles, curation inputs.

mod article;
mod offense;
mod vehicle;

pub use article::{Article, DescriptionClassification, LocationJudgment, Radar};
pub use offense::{Document, DocumentIndexEntry, TrafficOffense, ValidationError, EARLIEST_EVENT};
pub use vehicle::{VehicleInfo, VehicleType};
