//! Static registry of bulletin sources.
//!
//! Each source is one authority publishing traffic-offense notifications
//! through the same bulletin site. The registry is process-wide, immutable,
//! and iterated strictly in declaration order.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::path::PathBuf;
use thiserror::Error;

/// Relative storage location of one downloaded document:
/// `<kind>/<year>/<number[_suffix]>.html.gz`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocPath {
    pub kind: &'static str,
    pub year: String,
    pub number: String,
}

impl DocPath {
    pub fn relative(&self) -> PathBuf {
        PathBuf::from(self.kind)
            .join(&self.year)
            .join(format!("{}.html.gz", self.number))
    }
}

/// One (regex, tuple-builder) pair mapping a document URL path to its
/// storage location. The regex runs against the URL path only.
pub struct DocPathExtractor {
    regex: Regex,
    build: fn(&Captures) -> DocPath,
}

impl DocPathExtractor {
    fn new(pattern: &str, build: fn(&Captures) -> DocPath) -> Self {
        Self {
            regex: Regex::new(pattern).expect("valid extractor pattern"),
            build,
        }
    }

    fn apply(&self, url_path: &str) -> Option<DocPath> {
        self.regex.captures(url_path).map(|caps| (self.build)(&caps))
    }
}

fn suffixed_number(number: &str, suffix: Option<regex::Match>) -> String {
    match suffix {
        Some(m) => format!("{}_{}", number, m.as_str()),
        None => number.to_string(),
    }
}

fn notificaciones_number_year(caps: &Captures) -> DocPath {
    DocPath {
        kind: "notificaciones",
        year: caps[2].to_string(),
        number: suffixed_number(&caps[1], caps.get(3)),
    }
}

fn resoluciones_number_year(caps: &Captures) -> DocPath {
    DocPath {
        kind: "resoluciones",
        year: caps[2].to_string(),
        number: suffixed_number(&caps[1], caps.get(3)),
    }
}

fn notificaciones_year_number(caps: &Captures) -> DocPath {
    DocPath {
        kind: "notificaciones",
        year: caps[1].to_string(),
        number: suffixed_number(&caps[2], caps.get(3)),
    }
}

/// Identity and scraping parameters of one source.
pub struct DbReference {
    /// Stable numeric id; also the `tipoServicio` form value.
    pub id: u32,
    pub name: &'static str,
    /// Landing page that establishes the anonymous session cookie.
    pub seed_url: String,
    /// Search endpoint, queried by POST (first page) and GET (next pages).
    pub query_url: &'static str,
    /// Base for resolving relative hrefs in result listings.
    pub base_url: &'static str,
    /// Id of the "Todos" entry in the source's document-type selector.
    pub todos_id: u32,
    /// Issuer names (lowercased) whose appearance in a page title marks the
    /// document as belonging to this source.
    pub issuers: Vec<&'static str>,
    /// URL→path extractors, tried in order; exactly one must match.
    pub extractors: Vec<DocPathExtractor>,
}

impl DbReference {
    /// Map a document href to its storage path under the source root.
    /// Exactly one extractor must match; the first successful one wins.
    pub fn doc_path(&self, href: &str) -> Result<DocPath, SourceError> {
        let url = url::Url::parse(href)
            .map_err(|e| SourceError::BadHref(href.to_string(), e.to_string()))?;
        self.extractors
            .iter()
            .find_map(|x| x.apply(url.path()))
            .ok_or_else(|| SourceError::NoExtractorMatch(href.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid document href {0:?}: {1}")]
    BadHref(String, String),
    #[error("no path extractor matched {0:?}")]
    NoExtractorMatch(String),
    #[error("no source matches {0:?}")]
    NotFound(String),
    #[error("ambiguous source query {0:?}: matches {1}")]
    Ambiguous(String, String),
}

const QUERY_URL: &str = "https://www.impo.com.uy/cgi-bin/bases/consultaBasesBS.cgi";
const BASE_URL: &str = "https://www.impo.com.uy";

fn common_extractors(slug: &'static str) -> Vec<DocPathExtractor> {
    vec![
        DocPathExtractor::new(
            &format!(r"^/bases/notificaciones-{}/(\d+)-(\d{{4}})(?:/(\d+))?$", slug),
            notificaciones_number_year,
        ),
        DocPathExtractor::new(
            &format!(r"^/bases/resoluciones-{}/(\d+)-(\d{{4}})(?:/(\d+))?$", slug),
            resoluciones_number_year,
        ),
    ]
}

fn source(
    id: u32,
    name: &'static str,
    slug: &'static str,
    todos_id: u32,
    issuers: Vec<&'static str>,
) -> DbReference {
    DbReference {
        id,
        name,
        seed_url: format!("{}/bases/notificaciones-{}/", BASE_URL, slug),
        query_url: QUERY_URL,
        base_url: BASE_URL,
        todos_id,
        issuers,
        extractors: common_extractors(slug),
    }
}

static REGISTRY: Lazy<Vec<DbReference>> = Lazy::new(|| {
    vec![
        DbReference {
            id: 1,
            name: "Montevideo",
            seed_url: "https://www.impo.com.uy/bases/notificaciones-mdeo/".to_string(),
            query_url: QUERY_URL,
            base_url: BASE_URL,
            todos_id: 7905,
            issuers: vec![
                "intendencia de montevideo",
                "centro de gestión de movilidad",
            ],
            extractors: vec![
                DocPathExtractor::new(
                    r"^/bases/notificaciones-mdeo/(\d{4})/(\d+)(?:_(\d+))?$",
                    notificaciones_year_number,
                ),
                DocPathExtractor::new(
                    r"^/bases/resoluciones-mdeo/(\d+)-(\d{4})(?:/(\d+))?$",
                    resoluciones_number_year,
                ),
            ],
        },
        source(
            2,
            "Maldonado",
            "maldonado",
            7912,
            vec!["dirección general de tránsito y transporte intendencia de maldonado"],
        ),
        source(
            3,
            "Canelones",
            "canelones",
            7918,
            vec!["intendencia de canelones"],
        ),
        source(4, "Rocha", "rocha", 7923, vec!["intendencia de rocha"]),
        source(
            5,
            "Lavalleja",
            "lavalleja",
            7929,
            vec!["intendencia de lavalleja", "dirección de tránsito de lavalleja"],
        ),
        source(6, "Florida", "florida", 7934, vec!["intendencia de florida"]),
        source(7, "Colonia", "colonia", 7940, vec!["intendencia de colonia"]),
        source(
            8,
            "San José",
            "sanjose",
            7946,
            vec!["intendencia de san josé"],
        ),
        source(9, "Soriano", "soriano", 7951, vec!["intendencia de soriano"]),
        source(
            10,
            "Paysandú",
            "paysandu",
            7957,
            vec!["intendencia de paysandú"],
        ),
        source(11, "Salto", "salto", 7962, vec!["intendencia de salto"]),
        source(
            12,
            "Policía Caminera",
            "caminera",
            7970,
            vec![
                "dirección nacional de policía caminera",
                "ministerio del interior",
            ],
        ),
    ]
});

/// All sources, in pipeline execution order.
pub fn each() -> impl Iterator<Item = &'static DbReference> {
    REGISTRY.iter()
}

/// Resolve a source by numeric id or case-insensitive name prefix.
pub fn find(q: &str) -> Result<&'static DbReference, SourceError> {
    if let Ok(id) = q.parse::<u32>() {
        return REGISTRY
            .iter()
            .find(|db| db.id == id)
            .ok_or_else(|| SourceError::NotFound(q.to_string()));
    }

    let needle = q.to_lowercase();
    let matches: Vec<&DbReference> = REGISTRY
        .iter()
        .filter(|db| db.name.to_lowercase().starts_with(&needle))
        .collect();

    match matches.as_slice() {
        [] => Err(SourceError::NotFound(q.to_string())),
        [one] => Ok(*one),
        many => Err(SourceError::Ambiguous(
            q.to_string(),
            many.iter()
                .map(|db| db.name)
                .collect::<Vec<_>>()
                .join(", "),
        )),
    }
}
