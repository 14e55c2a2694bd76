//! The per-source ingestion pipeline: discover, download, extract.

pub mod discover;
pub mod download;
pub mod extract;
pub mod http_client;

pub use discover::{Discoverer, SearchMetrics};
pub use download::{DownloadMetrics, Downloader};
pub use extract::{ExtractMetrics, Extractor};
pub use http_client::HttpSession;
