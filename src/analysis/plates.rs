//! Vehicle plate analysis.
//!
//! Plates are matched against a fixed, ordered list of per-country pattern
//! groups. Ordering matters: several countries share legacy formats, and
//! the first full match wins unless a country hint narrows the search. The
//! hint comes from the bulletin's own country column, which outranks shape
//! guessing.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::models::{VehicleInfo, VehicleType};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlateError {
    #[error("matrícula no reconocida: {0:?}")]
    Unrecognized(String),
}

/// Normalize a plate: drop whitespace and dashes, uppercase, trim the
/// trailing `(E)` marker some sources append. Idempotent.
pub fn normalize_vehicle_id(raw: &str) -> String {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_uppercase();
    compact
        .strip_suffix("(E)")
        .unwrap_or(&compact)
        .to_string()
}

struct PlatePattern {
    regex: Regex,
    vehicle_type: VehicleType,
    mercosur: bool,
}

impl PlatePattern {
    fn new(pattern: &str, vehicle_type: VehicleType, mercosur: bool) -> Self {
        Self {
            regex: Regex::new(pattern).expect("valid plate pattern"),
            vehicle_type,
            mercosur,
        }
    }
}

struct CountryPatterns {
    iso: &'static str,
    patterns: Vec<PlatePattern>,
}

static GROUPS: Lazy<Vec<CountryPatterns>> = Lazy::new(|| {
    use VehicleType::{Auto, AutoOrMoto, Moto};
    vec![
        CountryPatterns {
            iso: "UY",
            patterns: vec![
                PlatePattern::new(r"^[A-Z]{3}[0-9]{4}$", AutoOrMoto, true),
                PlatePattern::new(r"^[A-Z]{3}[0-9]{3}$", AutoOrMoto, false),
            ],
        },
        CountryPatterns {
            iso: "AR",
            patterns: vec![
                PlatePattern::new(r"^[A-Z]{2}[0-9]{3}[A-Z]{2}$", Auto, true),
                PlatePattern::new(r"^[A-Z][0-9]{3}[A-Z]{3}$", Moto, true),
                PlatePattern::new(r"^[A-Z]{3}[0-9]{3}$", Auto, false),
            ],
        },
        CountryPatterns {
            iso: "BR",
            patterns: vec![
                PlatePattern::new(r"^[A-Z]{3}[0-9][A-Z][0-9]{2}$", Auto, true),
                PlatePattern::new(r"^[A-Z]{3}[0-9]{4}$", AutoOrMoto, false),
            ],
        },
        CountryPatterns {
            iso: "PY",
            patterns: vec![
                PlatePattern::new(r"^[A-Z]{4}[0-9]{3}$", Auto, true),
                PlatePattern::new(r"^[0-9]{3}[A-Z]{4}$", Moto, true),
                PlatePattern::new(r"^[A-Z]{3}[0-9]{3}$", AutoOrMoto, false),
            ],
        },
        CountryPatterns {
            iso: "CL",
            patterns: vec![
                PlatePattern::new(r"^[A-Z]{4}[0-9]{2}$", Auto, false),
                PlatePattern::new(r"^[A-Z]{2}[0-9]{4}$", Auto, false),
                PlatePattern::new(r"^[A-Z]{3}[0-9]{2}$", Moto, false),
            ],
        },
    ]
});

/// Uruguayan first plate letter → ISO 3166-2 department suffix. Letters
/// outside the table default to Montevideo.
const UY_DEPARTMENTS: &[(char, &str)] = &[
    ('A', "MO"),
    ('B', "MA"),
    ('C', "CA"),
    ('D', "RO"),
    ('E', "TT"),
    ('F', "CL"),
    ('G', "RV"),
    ('H', "AR"),
    ('I', "SA"),
    ('J', "PA"),
    ('K', "RN"),
    ('L', "CO"),
    ('M', "SO"),
    ('N', "SJ"),
    ('O', "FS"),
    ('P', "FD"),
    ('Q', "DU"),
    ('R', "LA"),
    ('S', "MO"),
    ('T', "TA"),
];

const UY_DEFAULT_DEPARTMENT: &str = "MO";

/// Mercosur letter prefixes reserved for motorcycle series.
const UY_MOTO_PREFIXES_2: &[&str] = &["AM", "BM", "CM", "KM", "LM", "SM"];
const UY_MOTO_PREFIXES_3: &[&str] = &["AMT", "SMT"];

/// Second-and-third-letter sub-codes marking special plate categories.
const UY_SPECIAL_TYPES: &[(&str, &str)] = &[
    ("OF", "Oficial"),
    ("TX", "Taxi"),
    ("CC", "Consular"),
    ("CD", "Diplomático"),
    ("AM", "Ambulancia"),
];

const CL_SPECIAL_PREFIXES: &[(&str, &str)] = &[
    ("CD", "Diplomático"),
    ("CC", "Consular"),
    ("ME", "Misión Especial"),
];

/// Analyze a plate, optionally constrained to a country.
///
/// When no pattern matches but a hint is present the hint still stands:
/// the result carries the country alone. Without a hint an unmatched plate
/// is an error.
pub fn analyze_vehicle_id(plate: &str, country_hint: &str) -> Result<VehicleInfo, PlateError> {
    let plate = normalize_vehicle_id(plate);

    for group in GROUPS.iter() {
        if !country_hint.is_empty() && group.iso != country_hint {
            continue;
        }
        for pattern in &group.patterns {
            if pattern.regex.is_match(&plate) {
                return Ok(decorate(group.iso, &plate, pattern));
            }
        }
    }

    if !country_hint.is_empty() {
        return Ok(VehicleInfo {
            country: country_hint.to_string(),
            ..VehicleInfo::default()
        });
    }
    Err(PlateError::Unrecognized(plate))
}

fn decorate(iso: &'static str, plate: &str, pattern: &PlatePattern) -> VehicleInfo {
    let mut info = VehicleInfo {
        country: iso.to_string(),
        vehicle_type: pattern.vehicle_type,
        mercosur_format: pattern.mercosur,
        ..VehicleInfo::default()
    };

    match iso {
        "UY" => decorate_uruguay(plate, &mut info),
        "CL" => decorate_chile(plate, &mut info),
        _ => {}
    }
    info
}

fn decorate_uruguay(plate: &str, info: &mut VehicleInfo) {
    let first = plate.chars().next().unwrap_or_default();
    info.adm_division = UY_DEPARTMENTS
        .iter()
        .find(|(letter, _)| *letter == first)
        .map(|(_, dept)| *dept)
        .unwrap_or(UY_DEFAULT_DEPARTMENT)
        .to_string();

    if info.mercosur_format
        && (UY_MOTO_PREFIXES_3.iter().any(|p| plate.starts_with(p))
            || UY_MOTO_PREFIXES_2.iter().any(|p| plate.starts_with(p)))
    {
        info.vehicle_type = VehicleType::Moto;
    }

    if plate.len() >= 3 {
        let sub_code = &plate[1..3];
        if let Some((_, category)) = UY_SPECIAL_TYPES.iter().find(|(code, _)| *code == sub_code) {
            info.category = category.to_string();
        }
    }
}

fn decorate_chile(plate: &str, info: &mut VehicleInfo) {
    if plate.len() >= 2 {
        let prefix = &plate[..2];
        if let Some((_, category)) = CL_SPECIAL_PREFIXES.iter().find(|(code, _)| *code == prefix) {
            info.category = category.to_string();
        }
    }
}
