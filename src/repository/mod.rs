//! Repository layer for the analytical store.

mod backfill;
mod offense;

pub use backfill::{run_backfill, BackfillReport};
pub use offense::{OffenseRepository, SourceStats, StoredOffense};

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("offenses of multiple documents in one save: {0:?} and {1:?}")]
    MixedDocuments(String, String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Create a database connection with settings tuned for one writer and
/// several extract workers.
pub fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 30000;
        PRAGMA cache_size = -64000;
        PRAGMA temp_store = MEMORY;
    "#,
    )?;
    Ok(conn)
}
