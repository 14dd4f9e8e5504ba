//! Query normalization: user-facing field syntax to the portal grammar.
//!
//! Rewrites recognized field prefixes and leaves everything else alone.
//! Structural operators (`AND`, `OR`, `NOT`, `NEAR/n`, `ADJ`, `SAME`,
//! parentheses) pass through verbatim and operands are never reordered.
//! Malformed input is not repaired: unbalanced parentheses or an operator
//! the portal rejects surface later as a portal-reported query defect.
//!
//! Text inside double-quoted phrases is treated as literal and not rewritten.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::text::compile_static_regex;

/// Full-text field prefixes and their grammar operator.
static FIELD_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (compile_static_regex(r"(?i)\btitle:\s*"), "TI="),
        (compile_static_regex(r"(?i)\babstract:\s*"), "AB="),
        (compile_static_regex(r"(?i)\bclaims:\s*"), "CL="),
    ]
});

/// Metadata fields: `assignee = x` and `assignee: x` both become `assignee:x`.
static METADATA_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?i)\b(assignee|inventor|country|status|language)\s*[=:]\s*")
});

/// A query in the portal grammar, paired with what the user typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedQuery {
    original: String,
    normalized: String,
}

impl NormalizedQuery {
    /// The user's query as given.
    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }

    /// The query in the portal grammar.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    /// Whether normalization changed anything.
    #[must_use]
    pub fn was_rewritten(&self) -> bool {
        self.original != self.normalized
    }
}

impl fmt::Display for NormalizedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

/// Normalizes a user query. Total: every input yields a query.
#[must_use]
#[instrument(level = "debug")]
pub fn normalize(user_query: &str) -> NormalizedQuery {
    let trimmed = user_query.trim();
    let mut normalized = String::with_capacity(trimmed.len());

    // Even-indexed segments sit outside double quotes. An unterminated
    // quote leaves the tail literal.
    for (index, segment) in trimmed.split('"').enumerate() {
        if index > 0 {
            normalized.push('"');
        }
        if index % 2 == 0 {
            normalized.push_str(&rewrite_fields(segment));
        } else {
            normalized.push_str(segment);
        }
    }

    if normalized != trimmed {
        debug!(original = %trimmed, normalized = %normalized, "rewrote query fields");
    }

    NormalizedQuery {
        original: user_query.to_string(),
        normalized,
    }
}

fn rewrite_fields(segment: &str) -> String {
    let mut out = segment.to_string();
    for (pattern, operator) in FIELD_RULES.iter() {
        if pattern.is_match(&out) {
            out = pattern.replace_all(&out, *operator).into_owned();
        }
    }
    METADATA_RE
        .replace_all(&out, |caps: &regex::Captures<'_>| {
            format!("{}:", caps[1].to_ascii_lowercase())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_rewrites_title_and_abstract() {
        let query = normalize("title:neural AND abstract:pruning");
        assert_eq!(query.as_str(), "TI=neural AND AB=pruning");
        assert_eq!(query.original(), "title:neural AND abstract:pruning");
        assert!(query.was_rewritten());
    }

    #[test]
    fn test_normalize_claims_case_insensitive_with_space() {
        assert_eq!(normalize("Claims: battery").as_str(), "CL=battery");
        assert_eq!(normalize("TITLE:lidar").as_str(), "TI=lidar");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize("title:(neural OR network) NEAR/3 abstract:pruning assignee=Acme");
        let twice = normalize(once.as_str());
        assert_eq!(once.as_str(), twice.as_str());
        assert!(!twice.was_rewritten());
    }

    #[test]
    fn test_normalize_preserves_operator_order() {
        let query = normalize("(title:a OR claims:b) AND NOT abstract:c ADJ d SAME e");
        assert_eq!(query.as_str(), "(TI=a OR CL=b) AND NOT AB=c ADJ d SAME e");
    }

    #[test]
    fn test_normalize_metadata_fields() {
        assert_eq!(
            normalize("assignee = Google AND inventor: Smith AND country=US").as_str(),
            "assignee:Google AND inventor:Smith AND country:US"
        );
        assert_eq!(normalize("Status=GRANT").as_str(), "status:GRANT");
    }

    #[test]
    fn test_normalize_leaves_malformed_input_alone() {
        assert_eq!(normalize("(TI=a AND NEAR/2 b").as_str(), "(TI=a AND NEAR/2 b");
        assert_eq!(normalize("AND NEAR/5 x)").as_str(), "AND NEAR/5 x)");
    }

    #[test]
    fn test_normalize_skips_quoted_phrases() {
        assert_eq!(
            normalize(r#"title:"title: wild*card" AND abstract:x"#).as_str(),
            r#"TI="title: wild*card" AND AB=x"#
        );
    }

    #[test]
    fn test_normalize_unterminated_quote_keeps_tail_literal() {
        assert_eq!(
            normalize(r#"abstract:x "title:y"#).as_str(),
            r#"AB=x "title:y"#
        );
    }

    #[test]
    fn test_normalize_does_not_touch_embedded_words() {
        assert_eq!(normalize("subtitle:x").as_str(), "subtitle:x");
    }

    #[test]
    fn test_normalize_empty_input() {
        let query = normalize("   ");
        assert_eq!(query.as_str(), "");
    }
}
