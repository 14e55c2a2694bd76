//! HTTP session shared by the discoverer and downloader.
//!
//! One session wraps two reqwest clients over a single [`ExpiringJar`]: the
//! default client refuses redirects (listing and document URLs must resolve
//! directly), while the sign-in client follows them, since the seed page
//! bounces through the session-cookie endpoint.

mod cookies;

pub use cookies::{ExpiringJar, COOKIE_TTL};

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Method, Response, StatusCode};
use thiserror::Error;
use url::Url;

use crate::sources::DbReference;

const TOTAL_TIMEOUT: Duration = Duration::from_secs(60);
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const HEADER_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_IDLE_PER_HOST: usize = 4;

pub const DEFAULT_USER_AGENT: &str =
    concat!("impo/", env!("CARGO_PKG_VERSION"), " (+https://github.com/monokrome/impo)");

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    Status { status: StatusCode, url: String },
    #[error("invalid url {0:?}: {1}")]
    BadUrl(String, String),
    #[error("sign-in did not produce session cookie {0:?}")]
    NoSessionCookie(String),
}

/// HTTP trace verbosity, driven by `--trace-http[-body]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceOptions {
    pub lines: bool,
    pub bodies: bool,
}

pub struct HttpSession {
    client: Client,
    signin_client: Client,
    jar: Arc<ExpiringJar>,
    trace: TraceOptions,
}

impl HttpSession {
    pub fn new(user_agent: &str, trace: TraceOptions) -> Result<Self, HttpError> {
        let jar = Arc::new(ExpiringJar::new());

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        let base = || {
            Client::builder()
                .user_agent(user_agent)
                .default_headers(headers.clone())
                .timeout(TOTAL_TIMEOUT)
                .read_timeout(HEADER_TIMEOUT)
                .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
                .pool_idle_timeout(IDLE_TIMEOUT)
                .tcp_keepalive(IDLE_TIMEOUT)
                .gzip(true)
                .brotli(true)
                .cookie_provider(Arc::clone(&jar))
        };

        let client = base().redirect(reqwest::redirect::Policy::none()).build()?;
        let signin_client = base().build()?;

        Ok(Self {
            client,
            signin_client,
            jar,
            trace,
        })
    }

    pub fn jar(&self) -> &ExpiringJar {
        &self.jar
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        method: Method,
        url: &str,
    ) -> Result<Response, HttpError> {
        if self.trace.lines {
            tracing::debug!(target: "impo::http", "> {} {}", method, url);
        }
        let start = Instant::now();
        let response = request.send().await?;
        if self.trace.lines {
            tracing::debug!(
                target: "impo::http",
                "< {} {} ({} ms)",
                response.status(),
                url,
                start.elapsed().as_millis()
            );
        }
        Ok(response)
    }

    /// GET a page and return its body bytes. Non-2xx statuses are errors.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, HttpError> {
        let request = self.client.get(url);
        let response = self.execute(request, Method::GET, url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                status,
                url: url.to_string(),
            });
        }
        let bytes = response.bytes().await?.to_vec();
        if self.trace.bodies {
            tracing::trace!(
                target: "impo::http",
                "< body {} bytes\n{}",
                bytes.len(),
                String::from_utf8_lossy(&bytes)
            );
        }
        Ok(bytes)
    }

    /// GET the query endpoint with a raw, already-encoded query string, as
    /// captured from a next-page link.
    pub async fn get_with_raw_query(
        &self,
        url: &str,
        raw_query: &str,
    ) -> Result<Vec<u8>, HttpError> {
        let mut parsed =
            Url::parse(url).map_err(|e| HttpError::BadUrl(url.to_string(), e.to_string()))?;
        parsed.set_query(Some(raw_query));
        self.get_bytes(parsed.as_str()).await
    }

    /// POST an `application/x-www-form-urlencoded` body and return the
    /// response bytes.
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, String)],
    ) -> Result<Vec<u8>, HttpError> {
        if self.trace.bodies {
            tracing::trace!(target: "impo::http", "> form {:?}", form);
        }
        let request = self.client.post(url).form(form);
        let response = self.execute(request, Method::POST, url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                status,
                url: url.to_string(),
            });
        }
        let bytes = response.bytes().await?.to_vec();
        if self.trace.bodies {
            tracing::trace!(
                target: "impo::http",
                "< body {} bytes\n{}",
                bytes.len(),
                String::from_utf8_lossy(&bytes)
            );
        }
        Ok(bytes)
    }

    /// Establish the anonymous session for a source unless one is live.
    ///
    /// Success is defined by the presence of the `usrts_<id>` cookie after
    /// the seed HEAD request, not by the response status alone.
    pub async fn sign_in(&self, db: &DbReference) -> Result<(), HttpError> {
        let cookie_name = format!("usrts_{}", db.id);
        let query_url = Url::parse(db.query_url)
            .map_err(|e| HttpError::BadUrl(db.query_url.to_string(), e.to_string()))?;

        if self.jar.has_cookie(&query_url, &cookie_name) {
            tracing::debug!(source = db.name, "session cookie still live, skipping sign-in");
            return Ok(());
        }

        tracing::info!(source = db.name, url = %db.seed_url, "signing in");
        let request = self.signin_client.head(&db.seed_url);
        let response = self.execute(request, Method::HEAD, &db.seed_url).await?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(HttpError::Status {
                status,
                url: db.seed_url.clone(),
            });
        }

        if !self.jar.has_cookie(&query_url, &cookie_name) {
            return Err(HttpError::NoSessionCookie(cookie_name));
        }
        Ok(())
    }
}
