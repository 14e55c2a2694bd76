//! Runtime settings assembled from CLI flags and the environment.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::scrapers::http_client::{TraceOptions, DEFAULT_USER_AGENT};

/// Default data directory when `--db-path` is not given.
pub const DEFAULT_DB_PATH: &str = "data";

/// Database file name inside the data directory.
pub const DATABASE_FILE: &str = "impo.db";

/// Radar GeoJSON file name inside the data directory.
pub const RADAR_FILE: &str = "radares.geojson";

/// Settings for one `update` run.
#[derive(Debug, Clone)]
pub struct UpdateSettings {
    pub db_path: PathBuf,
    pub user_agent: String,
    pub trace: TraceOptions,
    pub skip_search: bool,
    pub skip_download: bool,
    pub skip_extract: bool,
    pub search_full: bool,
    pub extract_full: bool,
    pub skip_extract_errors: bool,
    pub search_max_depth: u32,
    pub extract_max_procs: Option<usize>,
    pub dry_run: bool,
    /// Hrefs allowed past the extraction failsafe, curated by operators.
    pub error_allowlist: HashSet<String>,
}

impl UpdateSettings {
    pub fn database_path(&self) -> PathBuf {
        self.db_path.join(DATABASE_FILE)
    }
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            trace: TraceOptions::default(),
            skip_search: false,
            skip_download: false,
            skip_extract: false,
            search_full: false,
            extract_full: false,
            skip_extract_errors: false,
            search_max_depth: 5,
            extract_max_procs: None,
            dry_run: false,
            error_allowlist: HashSet::new(),
        }
    }
}

/// Load the failsafe allowlist: one href per line, `#` starts a comment,
/// blank lines ignored.
pub fn load_allowlist(path: &Path) -> std::io::Result<HashSet<String>> {
    let raw = fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
