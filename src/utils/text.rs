//! Text normalization helpers shared by the extractor and the enricher.

use unicode_normalization::UnicodeNormalization;

/// Collapse any run of whitespace into a single space and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove diacritics: NFD decomposition with combining marks dropped,
/// recomposed to NFC.
pub fn strip_diacritics(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .nfc()
        .collect()
}

fn is_combining_mark(c: char) -> bool {
    matches!(c, '\u{0300}'..='\u{036f}' | '\u{1ab0}'..='\u{1aff}' | '\u{20d0}'..='\u{20ff}')
}

/// Fold a description into its cache key: lowercase, accent-free, letters
/// and whitespace only.
pub fn ascii_fold(s: &str) -> String {
    strip_diacritics(&s.to_lowercase())
        .chars()
        .filter(|c| c.is_alphabetic() || c.is_whitespace())
        .collect()
}

/// Normalize a table-header cell for alias lookup: diacritics stripped,
/// lowercased, everything but letters dropped.
pub fn normalize_header(s: &str) -> String {
    strip_diacritics(s)
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphabetic())
        .collect()
}

/// Normalize a country cell: lowercase, letters only, accent-free.
pub fn normalize_country_name(s: &str) -> String {
    strip_diacritics(&s.to_lowercase())
        .chars()
        .filter(|c| c.is_alphabetic())
        .collect()
}
