//! Event-timestamp parsing.
//!
//! Sources print dates in about a dozen shapes, from `1/2/2025 09:30` to
//! `09-12-23`. Everything is interpreted in the local timezone at minute
//! precision. Component splitting is done by hand: a format-string loop
//! cannot tell `31/03/24` (two-digit year) from `31/03/2024`.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::utils::text::collapse_whitespace;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    #[error("fecha vacía")]
    Empty,
    #[error("fecha no reconocida: {0:?}")]
    Unparseable(String),
}

/// `<date>[ ]<hh:mm>` with `:` or `.` separating the minutes; the time part
/// is optional, as is the space before it.
static EVENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,4})([/-])(\d{1,2})([/-])(\d{1,4})\s*(?:(\d{1,2})[:.](\d{2}))?$")
        .expect("valid event time pattern")
});

/// Parse an event timestamp cell. Empty input is an error; so is any
/// non-empty value that matches no known layout.
pub fn parse_event_time(raw: &str) -> Result<DateTime<Local>, TimeError> {
    let mut s = collapse_whitespace(raw);
    if let Some(stripped) = s
        .strip_suffix("HS")
        .or_else(|| s.strip_suffix("hs"))
        .or_else(|| s.strip_suffix("Hs"))
    {
        s = stripped.trim_end().to_string();
    }
    let s = s.trim_start_matches('/').trim();
    if s.is_empty() {
        return Err(TimeError::Empty);
    }

    let unparseable = || TimeError::Unparseable(raw.to_string());
    let caps = EVENT_RE.captures(s).ok_or_else(unparseable)?;
    if &caps[2] != &caps[4] {
        return Err(unparseable());
    }

    let date = parse_date_parts(&caps[1], &caps[3], &caps[5], &caps[2] == "/")
        .ok_or_else(unparseable)?;
    let (hour, minute) = match (caps.get(6), caps.get(7)) {
        (Some(h), Some(m)) => (
            h.as_str().parse::<u32>().map_err(|_| unparseable())?,
            m.as_str().parse::<u32>().map_err(|_| unparseable())?,
        ),
        _ => (0, 0),
    };

    let dt = date.and_hms_opt(hour, minute, 0).ok_or_else(unparseable)?;
    to_local(dt).ok_or_else(unparseable)
}

/// Accepted component orders: `d/m/yyyy` and `d/m/yy` for slashes;
/// `yyyy-mm-dd`, `dd-mm-yyyy` and `yy-mm-dd` for dashes.
fn parse_date_parts(a: &str, b: &str, c: &str, slash: bool) -> Option<NaiveDate> {
    let (day, month, year) = if slash {
        (a, b, c)
    } else if a.len() == 4 {
        (c, b, a)
    } else if c.len() == 4 {
        (a, b, c)
    } else {
        (c, b, a)
    };

    let day: u32 = day.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let mut year: i32 = year.parse().ok()?;
    if year < 100 {
        // Two-digit years follow the reference-layout convention.
        year += if year <= 68 { 2000 } else { 1900 };
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

static PUBLICATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").expect("valid publication date pattern")
});

/// Parse a publication date in the strict `dd/mm/yyyy` bulletin format.
pub fn parse_publication_date(raw: &str) -> Result<DateTime<Local>, TimeError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(TimeError::Empty);
    }
    let unparseable = || TimeError::Unparseable(raw.to_string());
    let caps = PUBLICATION_RE.captures(s).ok_or_else(unparseable)?;
    let date = parse_date_parts(&caps[1], &caps[2], &caps[3], true).ok_or_else(unparseable)?;
    let dt = date.and_hms_opt(0, 0, 0).ok_or_else(unparseable)?;
    to_local(dt).ok_or_else(unparseable)
}

fn to_local(dt: NaiveDateTime) -> Option<DateTime<Local>> {
    Local.from_local_datetime(&dt).earliest()
}
