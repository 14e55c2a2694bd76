//! Multi-article description resolution.
//!
//! Some sources pack several offenses into one description cell, separated
//! by commas. When the whole text has no direct classification, each part
//! is classified on its own and the article references are unioned. The
//! resolver is a pure function over an injected part classifier so the
//! cache lookup, the SQL layer, and tests can all drive it.

/// Article references attached to a classified description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleRefs {
    /// Ordered article ids, e.g. `["18.1.2", "3.1.1"]`.
    pub ids: Vec<String>,
    /// Numeric codes, deduplicated in first-seen order.
    pub codes: Vec<i8>,
}

/// Resolve a comma-separated description through `classify`.
///
/// Every part must classify for the union to count: a single unknown part
/// yields `Ok(None)`, and a classifier error short-circuits. Ids keep part
/// order; codes are deduplicated first-seen.
pub fn resolve_multi_article<E, F>(
    description: &str,
    mut classify: F,
) -> Result<Option<ArticleRefs>, E>
where
    F: FnMut(&str) -> Result<Option<ArticleRefs>, E>,
{
    let parts: Vec<&str> = description
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return Ok(None);
    }

    let mut union = ArticleRefs::default();
    for part in parts {
        let Some(refs) = classify(part)? else {
            return Ok(None);
        };
        union.ids.extend(refs.ids);
        for code in refs.codes {
            if !union.codes.contains(&code) {
                union.codes.push(code);
            }
        }
    }
    Ok(Some(union))
}
