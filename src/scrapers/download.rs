//! Document download for one source.
//!
//! Fetches every indexed document without a local copy, in lexicographic
//! href order. Failures are recorded and skipped; the next pipeline run
//! retries whatever is still missing. There is no retry logic here.

use thiserror::Error;

use super::http_client::{HttpError, HttpSession};
use crate::sources::DbReference;
use crate::storage::{FileStore, StoreError};
use crate::utils::html::decode_html;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Http(#[from] HttpError),
}

#[derive(Debug, Clone, Default)]
pub struct DownloadMetrics {
    pub ok: usize,
    pub err: usize,
    /// One line per failed document: `<href>: <error>`.
    pub failures: Vec<String>,
}

pub struct Downloader<'a> {
    session: &'a HttpSession,
    store: &'a FileStore,
    db: &'static DbReference,
}

impl<'a> Downloader<'a> {
    pub fn new(session: &'a HttpSession, store: &'a FileStore, db: &'static DbReference) -> Self {
        Self { session, store, db }
    }

    pub async fn run(&self, dry_run: bool) -> Result<DownloadMetrics, DownloadError> {
        let missing = self.store.missing_documents()?;
        let mut metrics = DownloadMetrics::default();

        tracing::info!(
            source = self.db.name,
            pending = missing.len(),
            "downloading missing documents"
        );

        for href in &missing {
            match self.fetch_one(href, dry_run).await {
                Ok(()) => metrics.ok += 1,
                Err(e) => {
                    tracing::warn!(source = self.db.name, href = %href, error = %e, "download failed");
                    metrics.err += 1;
                    metrics.failures.push(format!("{href}: {e}"));
                }
            }
        }

        Ok(metrics)
    }

    async fn fetch_one(&self, href: &str, dry_run: bool) -> Result<(), DownloadError> {
        let bytes = self.session.get_bytes(href).await?;
        // Repair the charset before storing so every local file is UTF-8.
        let html = decode_html(&bytes);
        if dry_run {
            tracing::debug!(href, bytes = html.len(), "dry run, not storing");
            return Ok(());
        }
        self.store.save_document(href, html.as_bytes())?;
        Ok(())
    }
}
