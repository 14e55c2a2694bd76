//! Fine-amount parsing.
//!
//! Amounts are expressed in UR (Unidad Reajustable) and stored as integer
//! hundredths; floating point never enters the pipeline. Sources decorate
//! the number with per-person or per-seat multiplier notes that are
//! stripped before parsing.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrError {
    #[error("monto UR vacío")]
    Empty,
    #[error("monto UR no reconocido: {0:?}")]
    Unparseable(String),
}

const TRAILERS: &[&str] = &[
    "XPERS", " X PERS.", " X PERS,", " X PERS", " X ASIEN", "UR",
];

/// Parse a UR cell into hundredths. `"0,5"` → 50, `"5"` → 500,
/// `"2XPERS"` → 200.
pub fn parse_ur(raw: &str) -> Result<i64, UrError> {
    let mut s = raw.trim().to_uppercase();
    for trailer in TRAILERS {
        if let Some(stripped) = s.strip_suffix(trailer) {
            s = stripped.trim_end().to_string();
        }
    }
    if s.is_empty() {
        return Err(UrError::Empty);
    }

    let unparseable = || UrError::Unparseable(raw.to_string());
    let s = s.replace(',', ".");
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s.as_str(), None),
    };

    let units: i64 = if int_part.is_empty() {
        0
    } else {
        if !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(unparseable());
        }
        int_part.parse().map_err(|_| unparseable())?
    };

    let cents: i64 = match frac_part {
        None | Some("") => 0,
        Some(f) => {
            if f.len() > 2 || !f.bytes().all(|b| b.is_ascii_digit()) {
                return Err(unparseable());
            }
            let v: i64 = f.parse().map_err(|_| unparseable())?;
            if f.len() == 1 {
                v * 10
            } else {
                v
            }
        }
    };

    Ok(units * 100 + cents)
}

/// Render hundredths back to the canonical decimal form.
pub fn format_ur(cents: i64) -> String {
    let units = cents / 100;
    let frac = cents % 100;
    if frac == 0 {
        units.to_string()
    } else if frac % 10 == 0 {
        format!("{}.{}", units, frac / 10)
    } else {
        format!("{}.{:02}", units, frac)
    }
}
