//! Small text helpers shared by the result parser and the artifact resolver.

use std::sync::LazyLock;

use regex::Regex;

/// Compiles a regex literal that is known to be valid.
///
/// # Panics
///
/// Panics when `pattern` is not a valid regex. Only call with literals.
#[must_use]
pub fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"<[^>]*>"));
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"\s+"));

/// Removes HTML tags, decodes the common entities and collapses whitespace.
#[must_use]
pub fn strip_html(raw: &str) -> String {
    let without_tags = TAG_RE.replace_all(raw, "");
    let decoded = decode_entities(&without_tags);
    WHITESPACE_RE.replace_all(decoded.trim(), " ").into_owned()
}

/// Decodes the handful of entities the portal emits in attributes and titles.
#[must_use]
pub fn decode_entities(raw: &str) -> String {
    // &amp; last so "&amp;lt;" stays "&lt;"
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
