//! impo - traffic-offense notification ingestion and enrichment.
//!
//! Ingests traffic-offense notifications published through the official
//! bulletin site for a dozen municipal and national authorities, and
//! consolidates them into one denormalized analytical table enriched with
//! vehicle, geospatial, and normative-article metadata.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod models;
pub mod repository;
pub mod scrapers;
pub mod sources;
pub mod storage;
pub mod utils;
