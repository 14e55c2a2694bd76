//! Re-apply curation to already-persisted offenses.
//!
//! Runs after the curated tables change: three set-based SQL passes for
//! canonical locations, points + H3 cells, and directly-classified
//! descriptions, then a row loop for comma-separated descriptions that
//! only resolve through the multi-article union.

use std::convert::Infallible;

use rusqlite::params;

use super::offense::OffenseRepository;
use super::{connect, Result};
use crate::analysis::descriptions::resolve_multi_article;
use crate::utils::text::ascii_fold;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub canonical_locations: usize,
    pub points: usize,
    pub descriptions_direct: usize,
    pub descriptions_multi: usize,
}

const CANONICAL_LOCATIONS_SQL: &str = "
    UPDATE offenses
    SET location = l.canonical_location,
        display_location = offenses.location
    FROM locations l
    WHERE l.canonical_location IS NOT NULL
      AND l.db_id = offenses.db_id
      AND l.location = offenses.location
      AND offenses.display_location IS NULL";

const POINTS_SQL: &str = "
    UPDATE offenses
    SET lat = l.lat,
        lng = l.lng,
        h3_res1 = l.h3_res1,
        h3_res2 = l.h3_res2,
        h3_res3 = l.h3_res3,
        h3_res4 = l.h3_res4,
        h3_res5 = l.h3_res5,
        h3_res6 = l.h3_res6,
        h3_res7 = l.h3_res7,
        h3_res8 = l.h3_res8
    FROM locations l
    WHERE l.db_id = offenses.db_id
      AND l.location = offenses.location
      AND l.lat IS NOT NULL
      AND offenses.lat IS NULL";

const DESCRIPTIONS_DIRECT_SQL: &str = "
    UPDATE offenses
    SET article_ids = d.article_ids,
        article_codes = d.article_codes
    FROM descriptions d
    WHERE d.description = offenses.description
      AND offenses.article_ids IS NULL";

/// Run every backfill phase, reporting rows affected per phase.
pub fn run_backfill(repo: &OffenseRepository) -> Result<BackfillReport> {
    let conn = connect(repo.db_path())?;
    let mut report = BackfillReport {
        canonical_locations: conn.execute(CANONICAL_LOCATIONS_SQL, [])?,
        points: conn.execute(POINTS_SQL, [])?,
        descriptions_direct: conn.execute(DESCRIPTIONS_DIRECT_SQL, [])?,
        descriptions_multi: 0,
    };

    // Comma-separated descriptions resolve through the in-memory cache,
    // one UPDATE per resolved row.
    let mut stmt = conn.prepare(
        "SELECT rowid, description FROM offenses
         WHERE article_ids IS NULL AND description LIKE '%,%'",
    )?;
    let pending = stmt
        .query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    let cache = repo.description_cache();
    let mut update = conn.prepare(
        "UPDATE offenses SET article_ids = ?1, article_codes = ?2 WHERE rowid = ?3",
    )?;
    for (rowid, description) in pending {
        let resolved = resolve_multi_article(&description, |part| {
            Ok::<_, Infallible>(cache.get(&ascii_fold(part)).cloned())
        })
        .unwrap_or(None);
        if let Some(refs) = resolved {
            update.execute(params![
                serde_json::to_string(&refs.ids)?,
                serde_json::to_string(&refs.codes)?,
                rowid,
            ])?;
            report.descriptions_multi += 1;
        }
    }

    tracing::info!(
        canonical_locations = report.canonical_locations,
        points = report.points,
        descriptions_direct = report.descriptions_direct,
        descriptions_multi = report.descriptions_multi,
        "backfill complete"
    );
    Ok(report)
}
