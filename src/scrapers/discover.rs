//! Search-result pagination for one source.
//!
//! The first page is requested with the site's fixed consultation form; each
//! following page replays the raw query string captured from the listing's
//! next-page link. Discovery only grows the per-source index; nothing is
//! downloaded here.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

use super::http_client::{HttpError, HttpSession};
use crate::models::DocumentIndexEntry;
use crate::sources::DbReference;
use crate::storage::{FileStore, StoreError};
use crate::utils::html::{decode_html, node_text};
use crate::utils::text::collapse_whitespace;

#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid base url {0:?}: {1}")]
    BadBaseUrl(String, String),
}

/// Accumulated over all pages of one search run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchMetrics {
    pub pages: u32,
    pub total_records: usize,
    pub total_stored: usize,
}

#[derive(Debug, Default)]
struct Listing {
    entries: Vec<DocumentIndexEntry>,
    next_query: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub max_depth: u32,
    /// Keep paginating past pages that produced no new entries.
    pub full: bool,
    pub dry_run: bool,
}

pub struct Discoverer<'a> {
    session: &'a HttpSession,
    store: &'a FileStore,
    db: &'static DbReference,
}

impl<'a> Discoverer<'a> {
    pub fn new(session: &'a HttpSession, store: &'a FileStore, db: &'static DbReference) -> Self {
        Self { session, store, db }
    }

    pub async fn run(&self, opts: SearchOptions) -> Result<SearchMetrics, DiscoverError> {
        self.session.sign_in(self.db).await?;

        let mut metrics = SearchMetrics::default();
        let mut next_query: Option<String> = None;

        for page in 1..=opts.max_depth {
            let body = match &next_query {
                None => {
                    self.session
                        .post_form(self.db.query_url, &first_page_form(self.db))
                        .await?
                }
                Some(query) => {
                    self.session
                        .get_with_raw_query(self.db.query_url, query)
                        .await?
                }
            };

            let listing = parse_listing(&decode_html(&body), self.db.base_url)?;
            let stored = self.store.upsert(&listing.entries, opts.dry_run)?;

            metrics.pages = page;
            metrics.total_records += listing.entries.len();
            metrics.total_stored += stored;
            tracing::info!(
                source = self.db.name,
                page,
                records = listing.entries.len(),
                stored,
                "search page processed"
            );

            if stored == 0 && !opts.full {
                break;
            }
            match listing.next_query {
                Some(query) if !query.trim().is_empty() => next_query = Some(query),
                _ => break,
            }
        }

        Ok(metrics)
    }
}

/// The consultation form the site expects on a fresh search. Text and date
/// filters are sent as empty placeholders; the server requires their
/// presence.
fn first_page_form(db: &DbReference) -> Vec<(&'static str, String)> {
    vec![
        ("tipoServicio", db.id.to_string()),
        ("combo1", db.todos_id.to_string()),
        ("realizarconsulta", "SI".to_string()),
        ("nuevaconsulta", "SI".to_string()),
        ("texto", String::new()),
        ("textolibre", String::new()),
        ("fechadesde", String::new()),
        ("fechahasta", String::new()),
    ]
}

static ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tbody#resultadoConsulta tr").expect("valid row selector"));
static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("valid anchor selector"));
static STRONG_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("strong").expect("valid strong selector"));
static FONT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("font").expect("valid font selector"));
static NEXT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.nextPage").expect("valid next-page selector"));

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&node_text(*el))
}

fn parse_listing(html: &str, base_url: &str) -> Result<Listing, DiscoverError> {
    let base = Url::parse(base_url)
        .map_err(|e| DiscoverError::BadBaseUrl(base_url.to_string(), e.to_string()))?;
    let doc = Html::parse_document(html);
    let mut listing = Listing::default();

    for row in doc.select(&ROW_SELECTOR) {
        let Some(anchor) = row.select(&ANCHOR_SELECTOR).next() else {
            continue;
        };
        let Some(raw_href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(href) = base.join(raw_href) else {
            tracing::warn!(href = raw_href, "skipping unresolvable listing href");
            continue;
        };

        let title = anchor
            .select(&STRONG_SELECTOR)
            .next()
            .map(element_text)
            .unwrap_or_else(|| element_text(anchor));
        let subtitle = row
            .select(&FONT_SELECTOR)
            .next()
            .map(element_text)
            .unwrap_or_default();

        listing.entries.push(DocumentIndexEntry {
            href: href.to_string(),
            title,
            subtitle,
        });
    }

    listing.next_query = doc
        .select(&NEXT_SELECTOR)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| base.join(href).ok())
        .and_then(|url| url.query().map(str::to_string));

    Ok(listing)
}
