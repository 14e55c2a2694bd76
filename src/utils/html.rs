//! HTML text extraction with charset recovery.
//!
//! Source pages are served with unreliable charset declarations: some are
//! UTF-8, some ISO-8859-1, and some were double-encoded upstream before
//! publication. Recovery happens in two layers: [`decode_html`] picks the
//! byte-level decoding per document, and [`fix_mojibake`] repairs
//! UTF-8-read-as-Latin-1 sequences that survive inside the decoded text.

use ego_tree::NodeRef;
use scraper::Node;

/// Decode a raw HTML body. UTF-8 is used when it decodes cleanly; any
/// invalid sequence (or a pre-existing replacement character) falls back to
/// Latin-1.
pub fn decode_html(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if !s.contains('\u{FFFD}') => s.to_string(),
        // ISO-8859-1 pages decode through windows-1252, its WHATWG superset.
        _ => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
    }
}

/// UTF-8 sequences that were decoded as Latin-1 somewhere upstream, paired
/// with the character they originally encoded.
const MOJIBAKE: &[(&str, &str)] = &[
    ("\u{C3}\u{A1}", "á"),
    ("\u{C3}\u{A9}", "é"),
    ("\u{C3}\u{AD}", "í"),
    ("\u{C3}\u{B3}", "ó"),
    ("\u{C3}\u{BA}", "ú"),
    ("\u{C3}\u{B1}", "ñ"),
    ("\u{C3}\u{BC}", "ü"),
    ("\u{C3}\u{81}", "Á"),
    ("\u{C3}\u{89}", "É"),
    ("\u{C3}\u{8D}", "Í"),
    ("\u{C3}\u{93}", "Ó"),
    ("\u{C3}\u{9A}", "Ú"),
    ("\u{C3}\u{91}", "Ñ"),
    ("\u{C2}\u{B0}", "°"),
    ("\u{C2}\u{BA}", "º"),
    ("\u{C2}\u{AA}", "ª"),
    ("\u{C2}\u{BF}", "¿"),
    ("\u{C2}\u{A1}", "¡"),
    ("\u{C2}\u{A0}", " "),
];

/// Repair common UTF-8-as-Latin-1 sequences in already-decoded text.
pub fn fix_mojibake(s: &str) -> String {
    if !s.contains('\u{C3}') && !s.contains('\u{C2}') {
        return s.to_string();
    }
    let mut out = s.to_string();
    for (bad, good) in MOJIBAKE {
        if out.contains(bad) {
            out = out.replace(bad, good);
        }
    }
    out
}

/// Depth-first concatenation of every text node under `node`, with mojibake
/// repair applied to the combined result. Whitespace is preserved as-is;
/// callers do their own normalization.
pub fn node_text(node: NodeRef<'_, Node>) -> String {
    let mut out = String::new();
    collect_text(node, &mut out);
    fix_mojibake(&out)
}

fn collect_text(node: NodeRef<'_, Node>, out: &mut String) {
    if let Some(t) = node.value().as_text() {
        out.push_str(&t.text);
    }
    for child in node.children() {
        collect_text(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn test_decode_html_utf8() {
        assert_eq!(decode_html("Matrícula".as_bytes()), "Matrícula");
    }

    #[test]
    fn test_decode_html_latin1_fallback() {
        // "Matrícula" encoded as ISO-8859-1: í is a single 0xED byte.
        let bytes = b"Matr\xedcula";
        assert_eq!(decode_html(bytes), "Matrícula");
    }

    #[test]
    fn test_fix_mojibake() {
        assert_eq!(fix_mojibake("Publicaci\u{C3}\u{B3}n"), "Publicación");
        assert_eq!(fix_mojibake("a\u{C3}\u{B1}o"), "año");
        assert_eq!(fix_mojibake("clean text"), "clean text");
    }

    #[test]
    fn test_node_text_concatenates_depth_first() {
        let html = Html::parse_fragment("<p>Ruta <strong>Interbalnearia</strong> y Rosa</p>");
        let text = node_text(html.tree.root());
        assert_eq!(text, "Ruta Interbalnearia y Rosa");
    }

    #[test]
    fn test_node_text_applies_mojibake_fix() {
        let html = Html::parse_fragment("<div>Intersecci\u{C3}\u{B3}n</div>");
        assert_eq!(node_text(html.tree.root()), "Intersección");
    }
}
