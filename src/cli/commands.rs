//! CLI commands implementation.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use crate::analysis::RadarIndex;
use crate::config::{load_allowlist, UpdateSettings, DEFAULT_DB_PATH, RADAR_FILE};
use crate::models::Article;
use crate::repository::{run_backfill, OffenseRepository};
use crate::scrapers::discover::SearchOptions;
use crate::scrapers::extract::{ExtractError, ExtractOptions, Persister};
use crate::scrapers::http_client::TraceOptions;
use crate::scrapers::{Discoverer, Downloader, Extractor, HttpSession};
use crate::sources::{self, DbReference};
use crate::storage::FileStore;

#[derive(Parser)]
#[command(name = "impo")]
#[command(about = "Traffic-offense notification ingestion from official bulletin sources")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run the discover → download → extract pipeline for every source
    Update {
        /// Skip the search (discovery) phase
        #[arg(long)]
        skip_search: bool,
        /// Skip the download phase
        #[arg(long)]
        skip_download: bool,
        /// Skip the extraction phase
        #[arg(long)]
        skip_extract: bool,
        /// Keep paginating even when a page adds no new documents
        #[arg(long)]
        search_full: bool,
        /// Re-extract documents already present in the store
        #[arg(long)]
        extract_full: bool,
        /// Do not persist documents that contain row-level errors
        #[arg(long)]
        skip_extract_errors: bool,
        /// Maximum search pages per source
        #[arg(long, default_value = "5")]
        search_max_depth: u32,
        /// Extraction worker count (default: available CPUs)
        #[arg(long)]
        extract_max_procs: Option<usize>,
        /// Make no changes: no index writes, no downloads, no inserts
        #[arg(long)]
        dry_run: bool,
        /// User-Agent header for all requests
        #[arg(long, env = "IMPO_USER_AGENT")]
        user_agent: Option<String>,
        /// Log request/response lines
        #[arg(long)]
        trace_http: bool,
        /// Log request/response bodies (implies --trace-http)
        #[arg(long)]
        trace_http_body: bool,
        /// Data directory
        #[arg(long, env = "IMPO_DB_PATH", default_value = DEFAULT_DB_PATH)]
        db_path: PathBuf,
        /// File of hrefs allowed past the extraction error failsafe
        #[arg(long)]
        error_allowlist: Option<PathBuf>,
        /// Only process one source (numeric id or name prefix)
        #[arg(long)]
        source: Option<String>,
    },

    /// Print the source table
    List,

    /// Per-source counts of stored offenses and enrichment coverage
    Stats {
        /// Data directory
        #[arg(long, env = "IMPO_DB_PATH", default_value = DEFAULT_DB_PATH)]
        db_path: PathBuf,
    },

    /// Resolve a source by numeric id or name prefix
    Find {
        /// Numeric id or case-insensitive name prefix
        query: String,
    },

    /// Re-apply curated locations and descriptions to stored offenses
    Backfill {
        /// Data directory
        #[arg(long, env = "IMPO_DB_PATH", default_value = DEFAULT_DB_PATH)]
        db_path: PathBuf,
    },

    /// Load reference data into the store
    Seed {
        /// Data directory
        #[arg(long, env = "IMPO_DB_PATH", default_value = DEFAULT_DB_PATH)]
        db_path: PathBuf,
        /// JSON file with the normative article list
        #[arg(long)]
        articles: Option<PathBuf>,
        /// Radar GeoJSON to validate (defaults to <db-path>/radares.geojson)
        #[arg(long)]
        radars: Option<PathBuf>,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Update {
            skip_search,
            skip_download,
            skip_extract,
            search_full,
            extract_full,
            skip_extract_errors,
            search_max_depth,
            extract_max_procs,
            dry_run,
            user_agent,
            trace_http,
            trace_http_body,
            db_path,
            error_allowlist,
            source,
        } => {
            let only = source.as_deref().map(sources::find).transpose()?;
            let mut settings = UpdateSettings {
                db_path,
                trace: TraceOptions {
                    lines: trace_http || trace_http_body,
                    bodies: trace_http_body,
                },
                skip_search,
                skip_download,
                skip_extract,
                search_full,
                extract_full,
                skip_extract_errors,
                search_max_depth,
                extract_max_procs,
                dry_run,
                ..UpdateSettings::default()
            };
            if let Some(user_agent) = user_agent {
                settings.user_agent = user_agent;
            }
            if let Some(path) = error_allowlist {
                settings.error_allowlist = load_allowlist(&path)
                    .with_context(|| format!("reading allowlist {}", path.display()))?;
            }
            cmd_update(settings, only).await
        }
        Commands::List => cmd_list(),
        Commands::Stats { db_path } => cmd_stats(&db_path),
        Commands::Find { query } => cmd_find(&query),
        Commands::Backfill { db_path } => cmd_backfill(&db_path),
        Commands::Seed {
            db_path,
            articles,
            radars,
        } => cmd_seed(&db_path, articles.as_deref(), radars.as_deref()),
    }
}

/// Aggregate pipeline counters for the final summary and exit code.
#[derive(Debug, Default)]
struct UpdateSummary {
    sources: usize,
    pages: u32,
    discovered: usize,
    downloads_ok: usize,
    downloads_err: usize,
    docs_ok: usize,
    docs_err: usize,
    offenses: usize,
    source_failures: Vec<String>,
}

async fn cmd_update(
    settings: UpdateSettings,
    only: Option<&'static DbReference>,
) -> anyhow::Result<()> {
    let session = HttpSession::new(&settings.user_agent, settings.trace)?;
    let repository = Arc::new(
        OffenseRepository::new(&settings.database_path())
            .context("opening offense repository")?,
    );
    let allowlist = Arc::new(settings.error_allowlist.clone());

    // SIGINT finishes the document in flight, then declines further work.
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, finishing current work");
                interrupted.store(true, Ordering::Relaxed);
            }
        });
    }

    let mut summary = UpdateSummary::default();
    for db in sources::each() {
        if only.is_some_and(|selected| selected.id != db.id) {
            continue;
        }
        if interrupted.load(Ordering::Relaxed) {
            break;
        }
        summary.sources += 1;
        if let Err(e) = update_source(
            db,
            &session,
            &repository,
            &allowlist,
            &settings,
            &interrupted,
            &mut summary,
        )
        .await
        {
            // An unknown country means the classifier is blind to real
            // data: halt the whole run, not just this source.
            if matches!(
                e.downcast_ref::<ExtractError>(),
                Some(ExtractError::UnknownCountry(_))
            ) {
                return Err(e);
            }
            tracing::error!(source = db.name, error = %e, "source failed");
            summary.source_failures.push(format!("{}: {e}", db.name));
        }
    }

    println!(
        "{} sources: {} pages, {} new documents, {} downloaded ({} failed), \
         {} documents extracted ({} rejected), {} offenses",
        summary.sources,
        summary.pages,
        summary.discovered,
        summary.downloads_ok,
        summary.downloads_err,
        summary.docs_ok,
        summary.docs_err,
        summary.offenses,
    );

    if !summary.source_failures.is_empty() {
        bail!("update finished with failures:\n{}", summary.source_failures.join("\n"));
    }
    if summary.docs_err > 0 || summary.downloads_err > 0 {
        bail!(
            "update finished with {} rejected documents and {} failed downloads",
            summary.docs_err,
            summary.downloads_err
        );
    }
    Ok(())
}

async fn update_source(
    db: &'static DbReference,
    session: &HttpSession,
    repository: &Arc<OffenseRepository>,
    allowlist: &Arc<HashSet<String>>,
    settings: &UpdateSettings,
    interrupted: &Arc<AtomicBool>,
    summary: &mut UpdateSummary,
) -> anyhow::Result<()> {
    tracing::info!(source = db.name, id = db.id, "processing source");
    let store = Arc::new(FileStore::new(&settings.db_path, db));

    if !settings.skip_search {
        let metrics = Discoverer::new(session, &store, db)
            .run(SearchOptions {
                max_depth: settings.search_max_depth,
                full: settings.search_full,
                dry_run: settings.dry_run,
            })
            .await?;
        summary.pages += metrics.pages;
        summary.discovered += metrics.total_stored;
    }

    if !settings.skip_download {
        let metrics = Downloader::new(session, &store, db)
            .run(settings.dry_run)
            .await?;
        summary.downloads_ok += metrics.ok;
        summary.downloads_err += metrics.err;
    }

    if !settings.skip_extract {
        let extractor = Extractor::new(
            Arc::clone(&store),
            Arc::clone(repository) as Arc<dyn Persister>,
            db,
            Arc::clone(allowlist),
            ExtractOptions {
                full: settings.extract_full,
                skip_err_docs: settings.skip_extract_errors,
                max_procs: settings
                    .extract_max_procs
                    .unwrap_or_else(|| ExtractOptions::default().max_procs),
                dry_run: settings.dry_run,
            },
        );
        let metrics = extractor.run(Arc::clone(interrupted)).await?;
        summary.docs_ok += metrics.docs_ok;
        summary.docs_err += metrics.docs_err;
        summary.offenses += metrics.offenses;
    }

    Ok(())
}

fn cmd_list() -> anyhow::Result<()> {
    println!("{:>3}  {:<18} {}", "id", "name", "seed");
    for db in sources::each() {
        println!("{:>3}  {:<18} {}", db.id, db.name, db.seed_url);
    }
    Ok(())
}

fn cmd_find(query: &str) -> anyhow::Result<()> {
    let db = sources::find(query)?;
    println!("id:        {}", db.id);
    println!("name:      {}", db.name);
    println!("seed url:  {}", db.seed_url);
    println!("query url: {}", db.query_url);
    println!("issuers:   {}", db.issuers.join("; "));
    Ok(())
}

fn cmd_stats(db_path: &std::path::Path) -> anyhow::Result<()> {
    let repository = OffenseRepository::new(&db_path.join(crate::config::DATABASE_FILE))?;
    println!(
        "{:>3}  {:<18} {:>9} {:>9} {:>9} {:>9} {:>7}",
        "id", "name", "docs", "offenses", "points", "articles", "errors"
    );
    for stats in repository.stats_by_source()? {
        let name = sources::find(&stats.db_id.to_string())
            .map(|db| db.name)
            .unwrap_or("?");
        println!(
            "{:>3}  {:<18} {:>9} {:>9} {:>9} {:>9} {:>7}",
            stats.db_id,
            name,
            stats.documents,
            stats.offenses,
            stats.with_point,
            stats.with_articles,
            stats.with_error,
        );
    }
    Ok(())
}

fn cmd_backfill(db_path: &std::path::Path) -> anyhow::Result<()> {
    let repository = OffenseRepository::new(&db_path.join(crate::config::DATABASE_FILE))?;
    let report = run_backfill(&repository)?;
    println!(
        "backfill: {} canonical locations, {} points, {} direct descriptions, \
         {} multi-article descriptions",
        report.canonical_locations,
        report.points,
        report.descriptions_direct,
        report.descriptions_multi,
    );
    Ok(())
}

fn cmd_seed(
    db_path: &std::path::Path,
    articles: Option<&std::path::Path>,
    radars: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let repository = OffenseRepository::new(&db_path.join(crate::config::DATABASE_FILE))?;

    if let Some(path) = articles {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let articles: Vec<Article> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        let count = repository.seed_articles(&articles)?;
        println!("seeded {count} articles");
    }

    let radar_path = radars
        .map(PathBuf::from)
        .unwrap_or_else(|| db_path.join(RADAR_FILE));
    if radar_path.exists() {
        let index = RadarIndex::load(&radar_path)
            .with_context(|| format!("loading {}", radar_path.display()))?;
        println!("radar index: {} entries", index.len());
    }

    Ok(())
}
