//! Offense repository: enrichment caches and per-document persistence.
//!
//! The repository owns the denormalized `offenses` table plus the three
//! curated inputs (`articles`, `descriptions`, `locations`). Curation data
//! is loaded into in-memory caches once at construction and is read-only
//! afterwards, so extract workers can enrich concurrently without locks.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::path::{Path, PathBuf};

use chrono::Datelike;
use rusqlite::{named_params, params, Connection};

use super::{connect, RepositoryError, Result};
use crate::analysis::descriptions::{resolve_multi_article, ArticleRefs};
use crate::analysis::plates::analyze_vehicle_id;
use crate::models::{Article, DescriptionClassification, LocationJudgment, TrafficOffense};
use crate::utils::text::ascii_fold;

/// H3 cells at resolutions 1..8 for a point.
pub(crate) fn h3_cells_for(lat: f64, lng: f64) -> [u64; 8] {
    let Ok(coord) = h3o::LatLng::new(lat, lng) else {
        return [0; 8];
    };
    let mut cells = [0u64; 8];
    for (i, cell) in cells.iter_mut().enumerate() {
        let resolution = h3o::Resolution::try_from((i + 1) as u8).expect("resolution in 1..8");
        *cell = u64::from(coord.to_cell(resolution));
    }
    cells
}

#[derive(Debug, Clone)]
struct LocationEntry {
    canonical: String,
    lat: f64,
    lng: f64,
    h3: [u64; 8],
}

#[derive(Debug, Default)]
struct Caches {
    /// (db_id → raw location → entry); only curated rows with a canonical
    /// location are loaded.
    locations: HashMap<u32, HashMap<String, LocationEntry>>,
    /// ASCII-folded description → article references.
    descriptions: HashMap<String, ArticleRefs>,
}

pub struct OffenseRepository {
    db_path: PathBuf,
    caches: Caches,
}

impl OffenseRepository {
    pub fn new(db_path: &Path) -> Result<Self> {
        let mut repo = Self {
            db_path: db_path.to_path_buf(),
            caches: Caches::default(),
        };
        repo.init_schema()?;
        repo.reload_caches()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<Connection> {
        connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS offenses (
                doc_source TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                doc_date TEXT,
                db_id INTEGER NOT NULL,
                record_id INTEGER NOT NULL,
                offense_id TEXT,
                vehicle TEXT NOT NULL,
                country TEXT,
                vehicle_type TEXT,
                adm_division TEXT,
                category TEXT,
                mercosur INTEGER NOT NULL DEFAULT 0,
                time TEXT,
                time_year INTEGER,
                location TEXT,
                display_location TEXT,
                description TEXT,
                ur INTEGER NOT NULL DEFAULT 0,
                error TEXT NOT NULL DEFAULT '',
                lat REAL,
                lng REAL,
                h3_res1 INTEGER,
                h3_res2 INTEGER,
                h3_res3 INTEGER,
                h3_res4 INTEGER,
                h3_res5 INTEGER,
                h3_res6 INTEGER,
                h3_res7 INTEGER,
                h3_res8 INTEGER,
                article_ids TEXT,
                article_codes TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_offenses_doc_source
                ON offenses(doc_source);
            CREATE INDEX IF NOT EXISTS idx_offenses_db_location
                ON offenses(db_id, location);
            CREATE INDEX IF NOT EXISTS idx_offenses_time_year
                ON offenses(time_year);

            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                code INTEGER NOT NULL,
                title TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS descriptions (
                description TEXT PRIMARY KEY,
                article_ids TEXT NOT NULL,
                article_codes TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS locations (
                db_id INTEGER NOT NULL,
                location TEXT NOT NULL,
                lat REAL,
                lng REAL,
                is_electronic INTEGER NOT NULL DEFAULT 0,
                method TEXT,
                confidence REAL,
                notes TEXT,
                canonical_location TEXT,
                h3_res1 INTEGER,
                h3_res2 INTEGER,
                h3_res3 INTEGER,
                h3_res4 INTEGER,
                h3_res5 INTEGER,
                h3_res6 INTEGER,
                h3_res7 INTEGER,
                h3_res8 INTEGER,
                PRIMARY KEY (db_id, location)
            );
        "#,
        )?;
        Ok(())
    }

    /// Load the curation caches. Called once at construction; callers that
    /// import curation data afterwards reload explicitly.
    pub fn reload_caches(&mut self) -> Result<()> {
        let conn = self.connect()?;
        let mut caches = Caches::default();

        let mut stmt = conn.prepare(
            "SELECT db_id, location, canonical_location, lat, lng,
                    h3_res1, h3_res2, h3_res3, h3_res4,
                    h3_res5, h3_res6, h3_res7, h3_res8
             FROM locations
             WHERE canonical_location IS NOT NULL",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let db_id: u32 = row.get(0)?;
            let location: String = row.get(1)?;
            let canonical: String = row.get(2)?;
            let lat: Option<f64> = row.get(3)?;
            let lng: Option<f64> = row.get(4)?;
            let (Some(lat), Some(lng)) = (lat, lng) else {
                continue;
            };

            let mut h3 = [0u64; 8];
            for (i, cell) in h3.iter_mut().enumerate() {
                let value: Option<i64> = row.get(5 + i)?;
                *cell = value.map(|v| v as u64).unwrap_or(0);
            }
            if h3.iter().all(|c| *c == 0) {
                h3 = h3_cells_for(lat, lng);
            }

            caches.locations.entry(db_id).or_default().insert(
                location,
                LocationEntry {
                    canonical,
                    lat,
                    lng,
                    h3,
                },
            );
        }
        drop(rows);
        drop(stmt);

        let mut stmt =
            conn.prepare("SELECT description, article_ids, article_codes FROM descriptions")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let description: String = row.get(0)?;
            let ids: Vec<String> = serde_json::from_str(&row.get::<_, String>(1)?)?;
            let codes: Vec<i8> = serde_json::from_str(&row.get::<_, String>(2)?)?;
            caches
                .descriptions
                .insert(ascii_fold(&description), ArticleRefs { ids, codes });
        }

        self.caches = caches;
        Ok(())
    }

    /// Attach location and article metadata from the curation caches.
    fn enrich_offense(&self, offense: &mut TrafficOffense) {
        if !offense.location.is_empty() {
            let entry = self
                .caches
                .locations
                .get(&offense.db_id)
                .and_then(|by_location| by_location.get(&offense.location));
            if let Some(entry) = entry {
                offense.point = Some((entry.lat, entry.lng));
                offense.h3_cells = entry.h3;
                if entry.canonical != offense.location {
                    offense.display_location = std::mem::take(&mut offense.location);
                    offense.location = entry.canonical.clone();
                }
            }
        }

        if !offense.description.is_empty() && offense.article_ids.is_empty() {
            let folded = ascii_fold(&offense.description);
            if let Some(refs) = self.caches.descriptions.get(&folded) {
                offense.article_ids = refs.ids.clone();
                offense.article_codes = refs.codes.clone();
            } else if offense.description.contains(',') {
                let resolved = resolve_multi_article(&offense.description, |part| {
                    Ok::<_, Infallible>(self.caches.descriptions.get(&ascii_fold(part)).cloned())
                })
                .unwrap_or(None);
                if let Some(refs) = resolved {
                    offense.article_ids = refs.ids;
                    offense.article_codes = refs.codes;
                }
            }
        }
    }

    /// Hrefs already extracted for one source.
    pub fn known_doc_sources(&self, db_id: u32) -> Result<HashSet<String>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT doc_source FROM offenses WHERE db_id = ?1")?;
        let sources = stmt
            .query_map(params![db_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(sources)
    }

    /// Enrich and persist all offenses of one document inside a single
    /// transaction, replacing any rows previously stored for the same
    /// `doc_source`. Re-running for the same document is always safe.
    pub fn save_traffic_offenses(&self, offenses: &mut [TrafficOffense]) -> Result<()> {
        let Some(first) = offenses.first() else {
            return Ok(());
        };
        let doc_source = first.doc.source.clone();
        if let Some(stray) = offenses.iter().find(|o| o.doc.source != doc_source) {
            return Err(RepositoryError::MixedDocuments(
                doc_source,
                stray.doc.source.clone(),
            ));
        }

        for offense in offenses.iter_mut() {
            self.enrich_offense(offense);
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM offenses WHERE doc_source = ?1",
            params![doc_source],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO offenses (
                    doc_source, doc_id, doc_date, db_id, record_id, offense_id,
                    vehicle, country, vehicle_type, adm_division, category, mercosur,
                    time, time_year, location, display_location, description, ur, error,
                    lat, lng,
                    h3_res1, h3_res2, h3_res3, h3_res4,
                    h3_res5, h3_res6, h3_res7, h3_res8,
                    article_ids, article_codes
                ) VALUES (
                    :doc_source, :doc_id, :doc_date, :db_id, :record_id, :offense_id,
                    :vehicle, :country, :vehicle_type, :adm_division, :category, :mercosur,
                    :time, :time_year, :location, :display_location, :description, :ur, :error,
                    :lat, :lng,
                    :h3_res1, :h3_res2, :h3_res3, :h3_res4,
                    :h3_res5, :h3_res6, :h3_res7, :h3_res8,
                    :article_ids, :article_codes
                )",
            )?;

            for offense in offenses.iter() {
                // The stored vehicle columns are the analyzer's verdict,
                // which may refine what extraction embedded.
                let info = analyze_vehicle_id(&offense.vehicle, &offense.vehicle_info.country)
                    .unwrap_or_else(|_| offense.vehicle_info.clone());

                let article_ids = if offense.article_ids.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(&offense.article_ids)?)
                };
                let article_codes = if offense.article_codes.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(&offense.article_codes)?)
                };

                stmt.execute(named_params! {
                    ":doc_source": offense.doc.source,
                    ":doc_id": offense.doc.doc_id,
                    ":doc_date": offense.doc.date.map(|d| d.to_rfc3339()),
                    ":db_id": offense.db_id,
                    ":record_id": offense.record_id,
                    ":offense_id": null_if_empty(&offense.id),
                    ":vehicle": offense.vehicle,
                    ":country": null_if_empty(&info.country),
                    ":vehicle_type": null_if_empty(info.vehicle_type.as_str()),
                    ":adm_division": null_if_empty(&info.adm_division),
                    ":category": null_if_empty(&info.category),
                    ":mercosur": info.mercosur_format,
                    ":time": offense.time.map(|t| t.to_rfc3339()),
                    ":time_year": offense.time.map(|t| t.year()),
                    ":location": null_if_empty(&offense.location),
                    ":display_location": null_if_empty(&offense.display_location),
                    ":description": null_if_empty(&offense.description),
                    ":ur": offense.ur,
                    ":error": offense.error,
                    ":lat": offense.point.map(|p| p.0),
                    ":lng": offense.point.map(|p| p.1),
                    ":h3_res1": null_if_zero(offense.h3_cells[0]),
                    ":h3_res2": null_if_zero(offense.h3_cells[1]),
                    ":h3_res3": null_if_zero(offense.h3_cells[2]),
                    ":h3_res4": null_if_zero(offense.h3_cells[3]),
                    ":h3_res5": null_if_zero(offense.h3_cells[4]),
                    ":h3_res6": null_if_zero(offense.h3_cells[5]),
                    ":h3_res7": null_if_zero(offense.h3_cells[6]),
                    ":h3_res8": null_if_zero(offense.h3_cells[7]),
                    ":article_ids": article_ids,
                    ":article_codes": article_codes,
                })?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Read back all rows of one document, in record order. Mostly used by
    /// the CLI and tests.
    pub fn offenses_for_doc(&self, doc_source: &str) -> Result<Vec<StoredOffense>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT doc_source, doc_id, record_id, offense_id, vehicle, country,
                    vehicle_type, adm_division, category, mercosur,
                    time, time_year, location, display_location, description,
                    ur, error, lat, lng,
                    h3_res1, h3_res8, article_ids, article_codes
             FROM offenses WHERE doc_source = ?1 ORDER BY record_id",
        )?;
        let rows = stmt
            .query_map(params![doc_source], |row| {
                Ok(StoredOffense {
                    doc_source: row.get(0)?,
                    doc_id: row.get(1)?,
                    record_id: row.get(2)?,
                    offense_id: row.get(3)?,
                    vehicle: row.get(4)?,
                    country: row.get(5)?,
                    vehicle_type: row.get(6)?,
                    adm_division: row.get(7)?,
                    category: row.get(8)?,
                    mercosur: row.get(9)?,
                    time: row.get(10)?,
                    time_year: row.get(11)?,
                    location: row.get(12)?,
                    display_location: row.get(13)?,
                    description: row.get(14)?,
                    ur: row.get(15)?,
                    error: row.get(16)?,
                    lat: row.get(17)?,
                    lng: row.get(18)?,
                    h3_res1: row.get(19)?,
                    h3_res8: row.get(20)?,
                    article_ids_json: row.get(21)?,
                    article_codes_json: row.get(22)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn total_offenses(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM offenses", [], |r| r.get(0))?;
        Ok(count)
    }

    /// Per-source rollup of stored rows and enrichment coverage.
    pub fn stats_by_source(&self) -> Result<Vec<SourceStats>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT db_id,
                    COUNT(DISTINCT doc_source),
                    COUNT(*),
                    COUNT(lat),
                    COUNT(article_ids),
                    SUM(error != '')
             FROM offenses
             GROUP BY db_id
             ORDER BY db_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SourceStats {
                    db_id: row.get(0)?,
                    documents: row.get(1)?,
                    offenses: row.get(2)?,
                    with_point: row.get(3)?,
                    with_articles: row.get(4)?,
                    with_error: row.get::<_, Option<u64>>(5)?.unwrap_or(0),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Replace the normative article list.
    pub fn seed_articles(&self, articles: &[Article]) -> Result<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO articles (id, text, code, title)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for article in articles {
                stmt.execute(params![article.id, article.text, article.code, article.title])?;
            }
        }
        tx.commit()?;
        Ok(articles.len())
    }

    /// Import curated description classifications (produced by the curation
    /// side; read-only to the pipeline).
    pub fn import_descriptions(&self, rows: &[DescriptionClassification]) -> Result<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO descriptions
                 (description, article_ids, article_codes, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.description,
                    serde_json::to_string(&row.article_ids)?,
                    serde_json::to_string(&row.article_codes)?,
                    row.updated_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Import curated location judgments.
    pub fn import_locations(&self, rows: &[LocationJudgment]) -> Result<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO locations
                 (db_id, location, lat, lng, is_electronic, method, confidence, notes,
                  canonical_location,
                  h3_res1, h3_res2, h3_res3, h3_res4, h3_res5, h3_res6, h3_res7, h3_res8)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9,
                         ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            )?;
            for row in rows {
                let h3 = if row.h3_cells.iter().all(|c| *c == 0) {
                    h3_cells_for(row.lat, row.lng)
                } else {
                    row.h3_cells
                };
                stmt.execute(params![
                    row.db_id,
                    row.location,
                    row.lat,
                    row.lng,
                    row.is_electronic,
                    row.method,
                    row.confidence,
                    row.notes,
                    row.canonical_location,
                    h3[0] as i64,
                    h3[1] as i64,
                    h3[2] as i64,
                    h3[3] as i64,
                    h3[4] as i64,
                    h3[5] as i64,
                    h3[6] as i64,
                    h3[7] as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub(crate) fn description_cache(&self) -> &HashMap<String, ArticleRefs> {
        &self.caches.descriptions
    }

    pub(crate) fn db_path(&self) -> &Path {
        &self.db_path
    }
}

impl crate::scrapers::extract::Persister for OffenseRepository {
    fn save_traffic_offenses(&self, offenses: &mut [TrafficOffense]) -> anyhow::Result<()> {
        OffenseRepository::save_traffic_offenses(self, offenses)?;
        Ok(())
    }

    fn known_doc_sources(&self, db_id: u32) -> anyhow::Result<HashSet<String>> {
        Ok(OffenseRepository::known_doc_sources(self, db_id)?)
    }
}

fn null_if_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn null_if_zero(v: u64) -> Option<i64> {
    if v == 0 {
        None
    } else {
        Some(v as i64)
    }
}

/// Stored-row counts for one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub db_id: u32,
    pub documents: u64,
    pub offenses: u64,
    pub with_point: u64,
    pub with_articles: u64,
    pub with_error: u64,
}

/// One persisted offense row as stored.
#[derive(Debug, Clone)]
pub struct StoredOffense {
    pub doc_source: String,
    pub doc_id: String,
    pub record_id: u32,
    pub offense_id: Option<String>,
    pub vehicle: String,
    pub country: Option<String>,
    pub vehicle_type: Option<String>,
    pub adm_division: Option<String>,
    pub category: Option<String>,
    pub mercosur: bool,
    pub time: Option<String>,
    pub time_year: Option<i32>,
    pub location: Option<String>,
    pub display_location: Option<String>,
    pub description: Option<String>,
    pub ur: i64,
    pub error: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub h3_res1: Option<i64>,
    pub h3_res8: Option<i64>,
    pub article_ids_json: Option<String>,
    pub article_codes_json: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, NaiveDate, TimeZone, Utc};
    use crate::models::Document;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> chrono::DateTime<Local> {
        Local
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(y, m, d)
                    .unwrap()
                    .and_hms_opt(h, min, 0)
                    .unwrap(),
            )
            .single()
            .unwrap()
    }

    fn offense(doc_source: &str, record_id: u32, vehicle: &str) -> TrafficOffense {
        TrafficOffense {
            doc: Document {
                source: doc_source.to_string(),
                doc_id: "1/025".to_string(),
                date: Some(local(2025, 2, 1, 0, 0)),
            },
            db_id: 2,
            record_id,
            vehicle: vehicle.to_string(),
            time: Some(local(2025, 1, 1, 0, 0)),
            location: "Ruta Interbalnearia y Rosa de los Vientos".to_string(),
            description: "Exceso de velocidad hasta 20 km/h".to_string(),
            ur: 500,
            ..TrafficOffense::default()
        }
    }

    fn repo() -> (tempfile::TempDir, OffenseRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = OffenseRepository::new(&dir.path().join("impo.db")).unwrap();
        (dir, repo)
    }

    const DOC: &str = "https://www.impo.com.uy/bases/notificaciones-maldonado/1-2025";

    #[test]
    fn test_save_and_read_back() {
        let (_dir, repo) = repo();
        let mut offenses = vec![offense(DOC, 1, "ZME2015"), offense(DOC, 2, "BEC0001")];
        repo.save_traffic_offenses(&mut offenses).unwrap();

        let rows = repo.offenses_for_doc(DOC).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].record_id, 1);
        assert_eq!(rows[0].vehicle, "ZME2015");
        assert_eq!(rows[0].ur, 500);
        assert_eq!(rows[0].time_year, Some(2025));
        assert_eq!(rows[0].error, "");
        // Analyzer verdict stored even though extraction left it blank.
        assert_eq!(rows[0].country.as_deref(), Some("UY"));
        assert_eq!(rows[1].adm_division.as_deref(), Some("MA"));
        assert!(rows[1].mercosur);
    }

    #[test]
    fn test_save_is_full_replace() {
        let (_dir, repo) = repo();
        let mut three = vec![
            offense(DOC, 1, "ZME2015"),
            offense(DOC, 2, "BEC0001"),
            offense(DOC, 3, "LTX0001"),
        ];
        repo.save_traffic_offenses(&mut three).unwrap();
        assert_eq!(repo.offenses_for_doc(DOC).unwrap().len(), 3);

        // A re-extract that now finds fewer rows erases the prior set.
        let mut one = vec![offense(DOC, 1, "ZME2015")];
        repo.save_traffic_offenses(&mut one).unwrap();
        let rows = repo.offenses_for_doc(DOC).unwrap();
        assert_eq!(rows.len(), 1);

        // Other documents are untouched.
        let other = "https://www.impo.com.uy/bases/notificaciones-maldonado/2-2025";
        let mut unrelated = vec![offense(other, 1, "SBF1234")];
        repo.save_traffic_offenses(&mut unrelated).unwrap();
        repo.save_traffic_offenses(&mut one).unwrap();
        assert_eq!(repo.offenses_for_doc(other).unwrap().len(), 1);
    }

    #[test]
    fn test_mixed_documents_rejected() {
        let (_dir, repo) = repo();
        let mut mixed = vec![offense(DOC, 1, "ZME2015"), offense("https://other", 2, "BEC0001")];
        assert!(matches!(
            repo.save_traffic_offenses(&mut mixed),
            Err(RepositoryError::MixedDocuments(_, _))
        ));
        assert_eq!(repo.total_offenses().unwrap(), 0);
    }

    #[test]
    fn test_known_doc_sources_scoped_by_db() {
        let (_dir, repo) = repo();
        let mut offenses = vec![offense(DOC, 1, "ZME2015")];
        repo.save_traffic_offenses(&mut offenses).unwrap();

        assert!(repo.known_doc_sources(2).unwrap().contains(DOC));
        assert!(repo.known_doc_sources(1).unwrap().is_empty());
    }

    fn curated_location(db_id: u32, location: &str, canonical: Option<&str>) -> LocationJudgment {
        LocationJudgment {
            db_id,
            location: location.to_string(),
            lat: -34.9,
            lng: -54.95,
            is_electronic: false,
            method: "manual".to_string(),
            confidence: 0.9,
            notes: String::new(),
            canonical_location: canonical.map(str::to_string),
            h3_cells: [0; 8],
        }
    }

    fn classified(description: &str, ids: &[&str], codes: &[i8]) -> DescriptionClassification {
        DescriptionClassification {
            description: description.to_string(),
            article_ids: ids.iter().map(|s| s.to_string()).collect(),
            article_codes: codes.to_vec(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_enrich_location_canonicalizes_and_indexes() {
        let (dir, repo) = repo();
        repo.import_locations(&[curated_location(
            2,
            "Ruta Interbalnearia y Rosa de los Vientos",
            Some("Av. Aparicio Saravia y Rosa de los Vientos"),
        )])
        .unwrap();
        // Caches load at construction; build a fresh repository.
        let repo = OffenseRepository::new(&dir.path().join("impo.db")).unwrap();

        let mut offenses = vec![offense(DOC, 1, "ZME2015")];
        repo.save_traffic_offenses(&mut offenses).unwrap();

        let rows = repo.offenses_for_doc(DOC).unwrap();
        assert_eq!(
            rows[0].location.as_deref(),
            Some("Av. Aparicio Saravia y Rosa de los Vientos")
        );
        assert_eq!(
            rows[0].display_location.as_deref(),
            Some("Ruta Interbalnearia y Rosa de los Vientos")
        );
        assert_eq!(rows[0].lat, Some(-34.9));
        assert!(rows[0].h3_res1.is_some());
        assert!(rows[0].h3_res8.is_some());
    }

    #[test]
    fn test_enrich_same_canonical_keeps_display_null() {
        let (dir, repo) = repo();
        repo.import_locations(&[curated_location(
            2,
            "Ruta Interbalnearia y Rosa de los Vientos",
            Some("Ruta Interbalnearia y Rosa de los Vientos"),
        )])
        .unwrap();
        let repo = OffenseRepository::new(&dir.path().join("impo.db")).unwrap();

        let mut offenses = vec![offense(DOC, 1, "ZME2015")];
        repo.save_traffic_offenses(&mut offenses).unwrap();
        let rows = repo.offenses_for_doc(DOC).unwrap();
        assert_eq!(rows[0].display_location, None);
        assert!(rows[0].lat.is_some());
    }

    #[test]
    fn test_enrich_description_direct_hit_is_accent_insensitive() {
        let (dir, repo) = repo();
        repo.import_descriptions(&[classified(
            "Exceso de velocidad hasta 20 km/h",
            &["10.2.1"],
            &[10],
        )])
        .unwrap();
        let repo = OffenseRepository::new(&dir.path().join("impo.db")).unwrap();

        let mut offenses = vec![offense(DOC, 1, "ZME2015")];
        offenses[0].description = "EXCESO DE VELOCIDAD HASTA 20 KM/H".to_string();
        repo.save_traffic_offenses(&mut offenses).unwrap();

        let rows = repo.offenses_for_doc(DOC).unwrap();
        assert_eq!(rows[0].article_ids_json.as_deref(), Some(r#"["10.2.1"]"#));
        assert_eq!(rows[0].article_codes_json.as_deref(), Some("[10]"));
    }

    #[test]
    fn test_enrich_multi_article_union() {
        let (dir, repo) = repo();
        repo.import_descriptions(&[
            classified(
                "ESTACIONAR A MAYOR DISTANCIA DEL CORDON QUE LA PERMITIDA",
                &["18.1.2"],
                &[18],
            ),
            classified("NO POSEER LICENCIA DE CONDUCIR", &["3.1.1"], &[3]),
            classified("NO PORTAR DOCUMENTACION DEL VEHICULO", &["4.1.2"], &[4]),
        ])
        .unwrap();
        let repo = OffenseRepository::new(&dir.path().join("impo.db")).unwrap();

        let mut offenses = vec![offense(DOC, 1, "ZME2015")];
        offenses[0].description = "ESTACIONAR A MAYOR DISTANCIA DEL CORDON QUE LA PERMITIDA, \
                                   NO POSEER LICENCIA DE CONDUCIR, \
                                   NO PORTAR DOCUMENTACION DEL VEHICULO"
            .to_string();
        repo.save_traffic_offenses(&mut offenses).unwrap();

        let rows = repo.offenses_for_doc(DOC).unwrap();
        assert_eq!(
            rows[0].article_ids_json.as_deref(),
            Some(r#"["18.1.2","3.1.1","4.1.2"]"#)
        );
        assert_eq!(rows[0].article_codes_json.as_deref(), Some("[18,3,4]"));
    }

    #[test]
    fn test_unclassified_part_leaves_articles_null() {
        let (dir, repo) = repo();
        repo.import_descriptions(&[classified("NO POSEER LICENCIA DE CONDUCIR", &["3.1.1"], &[3])])
            .unwrap();
        let repo = OffenseRepository::new(&dir.path().join("impo.db")).unwrap();

        let mut offenses = vec![offense(DOC, 1, "ZME2015")];
        offenses[0].description =
            "NO POSEER LICENCIA DE CONDUCIR, CONDUCIR EN ZIGZAG".to_string();
        repo.save_traffic_offenses(&mut offenses).unwrap();

        let rows = repo.offenses_for_doc(DOC).unwrap();
        assert_eq!(rows[0].article_ids_json, None);
        assert_eq!(rows[0].article_codes_json, None);
    }

    #[test]
    fn test_empty_strings_stored_as_null() {
        let (_dir, repo) = repo();
        let mut offenses = vec![offense(DOC, 1, "ZME2015")];
        offenses[0].location = String::new();
        offenses[0].id = String::new();
        repo.save_traffic_offenses(&mut offenses).unwrap();

        let rows = repo.offenses_for_doc(DOC).unwrap();
        assert_eq!(rows[0].location, None);
        assert_eq!(rows[0].offense_id, None);
        assert_eq!(rows[0].h3_res1, None);
    }

    #[test]
    fn test_seed_articles_replaces() {
        let (_dir, repo) = repo();
        let articles = vec![Article {
            id: "13.3.A".to_string(),
            text: "Exceso de velocidad".to_string(),
            code: 13,
            title: "Velocidad".to_string(),
        }];
        assert_eq!(repo.seed_articles(&articles).unwrap(), 1);
        assert_eq!(repo.seed_articles(&articles).unwrap(), 1);

        let conn = repo.connect().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM articles", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_stats_by_source() {
        let (_dir, repo) = repo();
        let mut offenses = vec![offense(DOC, 1, "ZME2015"), offense(DOC, 2, "BEC0001")];
        offenses[1].error = "fecha vacía".to_string();
        repo.save_traffic_offenses(&mut offenses).unwrap();

        let stats = repo.stats_by_source().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(
            stats[0],
            SourceStats {
                db_id: 2,
                documents: 1,
                offenses: 2,
                with_point: 0,
                with_articles: 0,
                with_error: 1,
            }
        );
    }

    #[test]
    fn test_h3_cells_for_resolution_chain() {
        let cells = h3_cells_for(-34.9, -54.95);
        assert!(cells.iter().all(|c| *c != 0));
        // Finer resolutions produce different indices.
        assert_ne!(cells[0], cells[7]);
    }
}
