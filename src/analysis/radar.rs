//! Electronic-surveillance (radar) lookup by route and kilometer marker.
//!
//! Radars are loaded once from a GeoJSON feature list and indexed by
//! `"<route>:<progresiva>"`. Free-text locations like
//! `RUTA 5 R Y 038 K 131_D` are parsed into a route pattern and resolved
//! against the index, first exactly, then ignoring the direction suffix,
//! and finally by kilometer equality within 1000 meters.

use std::collections::HashMap;
use std::path::Path;

use geojson::{GeoJson, Value as GeoValue};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::models::Radar;

#[derive(Debug, Error)]
pub enum RadarError {
    #[error("radar file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid radar GeoJSON: {0}")]
    Geo(#[from] geojson::Error),
    #[error("radar feature missing {0}")]
    MissingProperty(&'static str),
}

/// Trim leading zeros; an all-zero value stays `"0"`.
fn trim_zeros(s: &str) -> String {
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Normalize a route number: digits only, leading zeros trimmed.
fn normalize_route(s: &str) -> String {
    let digits: String = s.chars().filter(char::is_ascii_digit).collect();
    trim_zeros(&digits)
}

/// Normalize a kilometer marker to `<km>k<meters3>`, preserving `/`-joined
/// multi-marker values. Idempotent.
pub fn normalize_progresiva(s: &str) -> String {
    s.split('/')
        .map(|part| {
            let (km, meters) = match part.split_once(['k', 'K']) {
                Some((km, meters)) => (km, meters),
                None => (part, ""),
            };
            format!("{}k{:0>3}", trim_zeros(km.trim()), meters.trim())
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// A location successfully parsed as a route + kilometer marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RutaPattern {
    pub route: String,
    /// Normalized, without the direction suffix.
    pub progresiva: String,
    /// Carriageway direction (`C`/`D`) when the source includes one.
    pub direction: Option<char>,
}

impl RutaPattern {
    fn key(&self, with_direction: bool) -> String {
        match (with_direction, self.direction) {
            (true, Some(d)) => format!("{}:{}_{}", self.route, self.progresiva, d),
            _ => format!("{}:{}", self.route, self.progresiva),
        }
    }
}

static RUTA_KM_METERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)ruta\s*([\d\s]+?)\s*R?\s+y\s*([\d\s]+?)\s*k\s*([\d\s]+)(?:_([cd]))?")
        .expect("valid ruta pattern")
});
static RUTA_KM_ONLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)ruta(?:\s+nacional)?\s*([\d\s]+?)\s+y\s*km\s*([\d\s]+)")
        .expect("valid ruta-km pattern")
});
static BARE_KM_METERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([\d\s]+?)\s*R?\s+y\s*([\d\s]+?)\s*k\s*([\d\s]+)(?:_([cd]))?$")
        .expect("valid bare ruta pattern")
});

fn strip_spaces(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Parse a free-text location into a route pattern. Returns `None` for
/// anything that is not a recognizable route + marker reference.
pub fn parse_ruta_location(raw: &str) -> Option<RutaPattern> {
    if let Some(caps) = RUTA_KM_METERS
        .captures(raw)
        .or_else(|| BARE_KM_METERS.captures(raw))
    {
        let progresiva = format!("{}k{}", strip_spaces(&caps[2]), strip_spaces(&caps[3]));
        return Some(RutaPattern {
            route: normalize_route(&caps[1]),
            progresiva: normalize_progresiva(&progresiva),
            direction: caps
                .get(4)
                .and_then(|m| m.as_str().chars().next())
                .map(|c| c.to_ascii_uppercase()),
        });
    }

    if let Some(caps) = RUTA_KM_ONLY.captures(raw) {
        let progresiva = format!("{}k", strip_spaces(&caps[2]));
        return Some(RutaPattern {
            route: normalize_route(&caps[1]),
            progresiva: normalize_progresiva(&progresiva),
            direction: None,
        });
    }

    None
}

fn parse_marker(marker: &str) -> Option<(i64, i64)> {
    let (km, meters) = marker.split_once(['k', 'K'])?;
    let meters = meters.trim_end_matches(|c: char| !c.is_ascii_digit());
    Some((km.parse().ok()?, meters.parse().ok()?))
}

/// Markers further apart than this are different control points.
const MAX_MARKER_DISTANCE: i64 = 1000;

#[derive(Debug, Default)]
pub struct RadarIndex {
    radars: Vec<Radar>,
    by_key: HashMap<String, usize>,
}

impl RadarIndex {
    pub fn from_radars(radars: Vec<Radar>) -> Self {
        let mut index = Self::default();
        for mut radar in radars {
            radar.route = normalize_route(&radar.route);
            radar.progresiva = normalize_progresiva(&radar.progresiva);
            let key = format!("{}:{}", radar.route, radar.progresiva);
            let idx = index.radars.len();
            index.radars.push(radar);
            index.by_key.entry(key).or_insert(idx);
        }
        index
    }

    pub fn load(path: &Path) -> Result<Self, RadarError> {
        Self::from_geojson_str(&std::fs::read_to_string(path)?)
    }

    pub fn from_geojson_str(raw: &str) -> Result<Self, RadarError> {
        let GeoJson::FeatureCollection(collection) = raw.parse::<GeoJson>()? else {
            return Err(RadarError::MissingProperty("FeatureCollection"));
        };

        let mut radars = Vec::with_capacity(collection.features.len());
        for feature in collection.features {
            let properties = feature
                .properties
                .as_ref()
                .ok_or(RadarError::MissingProperty("properties"))?;
            let get = |name: &'static str| {
                properties
                    .get(name)
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .ok_or(RadarError::MissingProperty(name))
            };

            let (lng, lat) = match feature.geometry.as_ref().map(|g| &g.value) {
                Some(GeoValue::Point(coords)) if coords.len() >= 2 => (coords[0], coords[1]),
                _ => return Err(RadarError::MissingProperty("point geometry")),
            };

            radars.push(Radar {
                route: get("ruta")?,
                progresiva: get("progresiva")?,
                org: get("organismo").unwrap_or_default(),
                description: get("descripcion").unwrap_or_default(),
                lat,
                lng,
            });
        }
        Ok(Self::from_radars(radars))
    }

    pub fn len(&self) -> usize {
        self.radars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.radars.is_empty()
    }

    /// Resolve a parsed route pattern to a radar.
    pub fn find_radar(&self, pattern: &RutaPattern) -> Option<&Radar> {
        if let Some(&idx) = self.by_key.get(&pattern.key(true)) {
            return Some(&self.radars[idx]);
        }
        if pattern.direction.is_some() {
            if let Some(&idx) = self.by_key.get(&pattern.key(false)) {
                return Some(&self.radars[idx]);
            }
        }

        // Same-route scan with kilometer-equality tolerance. First-seen
        // order breaks ties.
        let target = parse_marker(&pattern.progresiva)?;
        let mut best: Option<(&Radar, i64)> = None;
        for radar in &self.radars {
            if radar.route != pattern.route {
                continue;
            }
            for marker in radar.progresiva.split('/') {
                let distance = if marker == pattern.progresiva {
                    0
                } else {
                    match parse_marker(marker) {
                        Some((km, meters)) if km == target.0 => (meters - target.1).abs(),
                        _ => continue,
                    }
                };
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((radar, distance));
                }
            }
        }

        best.filter(|(_, d)| *d <= MAX_MARKER_DISTANCE)
            .map(|(radar, _)| radar)
    }

    /// Parse and resolve in one step; `None` means the text is not an
    /// electronic surveillance location.
    pub fn match_location(&self, raw: &str) -> Option<&Radar> {
        let pattern = parse_ruta_location(raw)?;
        self.find_radar(&pattern)
    }
}
