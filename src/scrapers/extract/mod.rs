//! Document extraction: parsed HTML in, validated offenses out.
//!
//! Each locally-stored document is walked by a recursive visitor that
//! collects the document header (id from the `<title>` issuer match,
//! publication date from the `<h5>` block) and feeds every
//! `tabla_en_texto` row through the table processor. Documents whose
//! row-error rate exceeds the failsafe threshold are rejected unless their
//! href was explicitly allowlisted by an operator.

mod table;
mod time;
mod ur;

pub use table::{column_for_header, process_table, Column, ParsedTable, TableError};
pub use time::{parse_event_time, parse_publication_date, TimeError};
pub use ur::{format_ur, parse_ur, UrError};

use std::collections::HashSet;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ego_tree::NodeRef;
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Node, Selector};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::models::{Document, TrafficOffense};
use crate::sources::DbReference;
use crate::storage::{FileStore, StoreError};
use crate::utils::html::{decode_html, node_text};
use crate::utils::text::collapse_whitespace;

/// Where extracted offenses go. Implemented by the offense repository;
/// kept as a trait so extraction logic tests without a database.
pub trait Persister: Send + Sync {
    /// Enrich and persist all offenses of one document, replacing any prior
    /// rows for the same `doc_source`.
    fn save_traffic_offenses(&self, offenses: &mut [TrafficOffense]) -> anyhow::Result<()>;

    /// Hrefs already represented in the store for one source.
    fn known_doc_sources(&self, db_id: u32) -> anyhow::Result<HashSet<String>>;
}

#[derive(Debug, Error)]
pub enum ExtractError {
    /// A country string the classifier has never seen halts the whole run;
    /// silently misfiled plates are operationally unacceptable.
    #[error("unknown country {0:?}: teach the classifier before re-running")]
    UnknownCountry(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("repository error: {0}")]
    Repository(String),
    #[error("extract worker failed: {0}")]
    Worker(String),
}

/// Per-document failure: most reject just the document, an unknown country
/// aborts the run.
enum DocFailure {
    Failed(String),
    Fatal(ExtractError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractMetrics {
    pub docs_ok: usize,
    pub docs_err: usize,
    pub offenses: usize,
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Re-extract documents already present in the store.
    pub full: bool,
    /// Skip persisting documents that contain row-level errors.
    pub skip_err_docs: bool,
    pub max_procs: usize,
    pub dry_run: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            full: false,
            skip_err_docs: false,
            max_procs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            dry_run: false,
        }
    }
}

pub struct Extractor {
    store: Arc<FileStore>,
    persister: Arc<dyn Persister>,
    db: &'static DbReference,
    /// Hrefs allowed to exceed the failsafe error ratio.
    allowlist: Arc<HashSet<String>>,
    opts: ExtractOptions,
}

impl Extractor {
    pub fn new(
        store: Arc<FileStore>,
        persister: Arc<dyn Persister>,
        db: &'static DbReference,
        allowlist: Arc<HashSet<String>>,
        opts: ExtractOptions,
    ) -> Self {
        Self {
            store,
            persister,
            db,
            allowlist,
            opts,
        }
    }

    /// Extract every pending document with bounded parallelism. `interrupted`
    /// stops the intake of new documents; in-flight documents finish.
    pub async fn run(&self, interrupted: Arc<AtomicBool>) -> Result<ExtractMetrics, ExtractError> {
        let mut work = self.store.existing_documents()?;
        if !self.opts.full {
            let known = self
                .persister
                .known_doc_sources(self.db.id)
                .map_err(|e| ExtractError::Repository(e.to_string()))?;
            work.retain(|href| !known.contains(href));
        }

        tracing::info!(source = self.db.name, pending = work.len(), "extracting documents");
        let bar = progress_bar(work.len() as u64);

        let semaphore = Arc::new(Semaphore::new(self.opts.max_procs.max(1)));
        let mut tasks: JoinSet<(String, Result<usize, DocFailure>)> = JoinSet::new();
        let mut metrics = ExtractMetrics::default();

        for href in work {
            if interrupted.load(Ordering::Relaxed) {
                tracing::warn!(source = self.db.name, "interrupted, no further documents");
                break;
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| ExtractError::Worker(e.to_string()))?;

            let store = Arc::clone(&self.store);
            let persister = Arc::clone(&self.persister);
            let allowlist = Arc::clone(&self.allowlist);
            let db = self.db;
            let opts = self.opts.clone();
            tasks.spawn_blocking(move || {
                let _permit = permit;
                let outcome = process_document(&store, persister.as_ref(), db, &allowlist, &opts, &href);
                (href, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (href, outcome) = joined.map_err(|e| ExtractError::Worker(e.to_string()))?;
            bar.inc(1);
            match outcome {
                Ok(count) => {
                    metrics.docs_ok += 1;
                    metrics.offenses += count;
                }
                Err(DocFailure::Failed(reason)) => {
                    metrics.docs_err += 1;
                    tracing::warn!(source = self.db.name, href = %href, reason = %reason, "document rejected");
                }
                Err(DocFailure::Fatal(e)) => {
                    tasks.abort_all();
                    bar.abandon();
                    return Err(e);
                }
            }
        }

        bar.finish_and_clear();
        Ok(metrics)
    }
}

fn progress_bar(len: u64) -> ProgressBar {
    if !console::Term::stderr().is_term() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
            .expect("valid progress template"),
    );
    bar
}

/// Reject a document once its row errors exceed 5% of its clean rows.
fn failsafe_exceeded(errors: usize, total: usize) -> bool {
    let successes = total.saturating_sub(errors);
    errors * 20 > successes
}

fn process_document(
    store: &FileStore,
    persister: &dyn Persister,
    db: &'static DbReference,
    allowlist: &HashSet<String>,
    opts: &ExtractOptions,
    href: &str,
) -> Result<usize, DocFailure> {
    let mut raw = Vec::new();
    let mut reader = store
        .get_document(href)
        .map_err(|e| DocFailure::Failed(e.to_string()))?;
    reader
        .read_to_end(&mut raw)
        .map_err(|e| DocFailure::Failed(e.to_string()))?;
    let html = Html::parse_document(&decode_html(&raw));

    let mut builder = DocumentBuilder::new(&db.issuers);
    builder.walk(&html);

    if let Some(country) = builder.fatal_country {
        return Err(DocFailure::Fatal(ExtractError::UnknownCountry(country)));
    }
    if let Some(reason) = builder.rejection {
        return Err(DocFailure::Failed(reason));
    }
    if builder.doc.doc_id.is_empty() {
        return Err(DocFailure::Failed("document id not found in title".to_string()));
    }
    if builder.offenses.is_empty() {
        return Err(DocFailure::Failed("no offense rows found".to_string()));
    }

    builder.doc.source = href.to_string();
    for offense in &mut builder.offenses {
        offense.doc = builder.doc.clone();
        offense.db_id = db.id;
    }

    let total = builder.offenses.len();
    if failsafe_exceeded(builder.errors, total) && !allowlist.contains(href) {
        return Err(DocFailure::Failed(format!(
            "error rate above failsafe threshold: {}/{} rows",
            builder.errors, total
        )));
    }

    let should_persist = builder.errors == 0 || !opts.skip_err_docs;
    if should_persist && !opts.dry_run {
        persister
            .save_traffic_offenses(&mut builder.offenses)
            .map_err(|e| DocFailure::Failed(format!("persist failed: {e}")))?;
    }
    Ok(total)
}

/// The canonical description applied when a document cites SUCIVE art. 9
/// in prose instead of carrying a description column.
pub const SUCIVE_ART9_DESCRIPTION: &str = "Cobros por acciones, trámites o gestiones";

/// Marker phrases (both spellings seen in the wild) that trigger the
/// default description.
const SUCIVE_MARKERS: &[&str] = &[
    "constató la contravención a lo dispuesto en el art. 9 del texto ordenado del sucive",
    "constato la contravencion a lo dispuesto en el art. 9 del texto ordenado del sucive",
];

const PUBLICATION_MARKERS: &[&str] = &["fecha de publicación:", "fecha de publicacion:"];

static TR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tr").expect("valid tr selector"));
static CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td, th").expect("valid cell selector"));

struct DocumentBuilder<'a> {
    issuers: &'a [&'static str],
    doc: Document,
    default_description: String,
    offenses: Vec<TrafficOffense>,
    errors: usize,
    rejection: Option<String>,
    fatal_country: Option<String>,
}

impl<'a> DocumentBuilder<'a> {
    fn new(issuers: &'a [&'static str]) -> Self {
        Self {
            issuers,
            doc: Document::default(),
            default_description: String::new(),
            offenses: Vec::new(),
            errors: 0,
            rejection: None,
            fatal_country: None,
        }
    }

    fn walk(&mut self, html: &Html) {
        self.visit(html.tree.root());
    }

    fn visit(&mut self, node: NodeRef<'_, Node>) {
        if self.fatal_country.is_some() || self.rejection.is_some() {
            return;
        }
        if let Some(element) = node.value().as_element() {
            match element.name() {
                "title" => self.on_title(&node_text(node)),
                "h5" => self.on_h5(&node_text(node)),
                "p" | "pre" | "div" => self.on_prose(&node_text(node)),
                "table" if element.classes().any(|c| c == "tabla_en_texto") => {
                    self.on_table(node);
                    return;
                }
                _ => {}
            }
        }
        for child in node.children() {
            self.visit(child);
        }
    }

    /// The title carries the issuer and, after it, the document number:
    /// `Notificación <issuer> N° 488/025`. Documents without a number use
    /// the literal `s/n`.
    fn on_title(&mut self, text: &str) {
        let lower = text.to_lowercase();
        for issuer in self.issuers {
            if let Some(pos) = lower.find(issuer) {
                let rest = &lower[pos + issuer.len()..];
                if let Some(token) = rest.split_whitespace().last() {
                    self.doc.doc_id = token.to_string();
                }
                return;
            }
        }
    }

    fn on_h5(&mut self, text: &str) {
        let lower = text.to_lowercase();
        for marker in PUBLICATION_MARKERS {
            if let Some(pos) = lower.find(marker) {
                let rest = &lower[pos + marker.len()..];
                let Some(token) = rest.split_whitespace().next() else {
                    continue;
                };
                match parse_publication_date(token) {
                    Ok(date) => self.doc.date = Some(date),
                    Err(e) => self.rejection = Some(format!("publication date: {e}")),
                }
                return;
            }
        }
    }

    fn on_prose(&mut self, text: &str) {
        if !self.default_description.is_empty() {
            return;
        }
        let lower = collapse_whitespace(&text.to_lowercase());
        if SUCIVE_MARKERS.iter().any(|marker| lower.contains(marker)) {
            self.default_description = SUCIVE_ART9_DESCRIPTION.to_string();
        }
    }

    fn on_table(&mut self, node: NodeRef<'_, Node>) {
        let Some(table_el) = ElementRef::wrap(node) else {
            return;
        };

        let mut rows: Vec<Vec<String>> = Vec::new();
        for tr in table_el.select(&TR_SELECTOR) {
            let cells: Vec<String> = tr.select(&CELL_SELECTOR).map(|c| node_text(*c)).collect();
            if !cells.is_empty() {
                rows.push(cells);
            }
        }
        let Some((header, records)) = rows.split_first() else {
            return;
        };

        match process_table(header, records, &self.doc, &self.default_description) {
            Ok(parsed) => {
                self.errors += parsed.errors;
                for mut offense in parsed.offenses {
                    offense.record_id = (self.offenses.len() + 1) as u32;
                    self.offenses.push(offense);
                }
            }
            Err(TableError::UnknownCountry(country)) => self.fatal_country = Some(country),
            Err(e) => self.rejection = Some(e.to_string()),
        }
    }
}
