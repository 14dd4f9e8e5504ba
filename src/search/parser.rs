//! Decodes the portal's search response into a [`SearchPage`].
//!
//! Classification order:
//! 1. A configured user-error marker anywhere in the body: query defect.
//! 2. `results.total_num_results == 0`: valid empty result.
//! 3. Otherwise each `results.cluster[*].result[*]` entry becomes a
//!    [`ResultRecord`] in ranking order. Malformed entries are skipped with
//!    a warning unless the configured malformed ratio is exceeded.
//!
//! Bodies that are not JSON fall back to scanning an HTML fragment for
//! `/patent/<id>/<lang>` links; the total is unknown in that case.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::{PageOutcome, ResultRecord, SearchPage};
use crate::config::ParserPolicy;
use crate::text::{compile_static_regex, strip_html};

/// Anti-JSON-hijacking prefix some portal responses carry.
const XSSI_PREFIX: &str = ")]}'";

static PATENT_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"href\s*=\s*["'](?:https?://[^/"']+)?/(patent/([A-Z]{2}[A-Z0-9]+)/[a-z]{2})["']"#)
});

/// A body that could not be classified at all.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Neither a JSON envelope nor an HTML result fragment.
    #[error("unrecognized search response: {snippet}")]
    UnrecognizedBody {
        /// First characters of the body.
        snippet: String,
    },

    /// Too many entries failed to decode.
    #[error("{malformed} of {total} result entries malformed (abort ratio {threshold})")]
    TooManyMalformed {
        /// Entries that failed.
        malformed: usize,
        /// Entries seen.
        total: usize,
        /// Configured ratio.
        threshold: f64,
    },
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    id: Option<String>,
    patent: RawPatent,
}

#[derive(Debug, Deserialize)]
struct RawPatent {
    #[serde(default)]
    publication_number: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, Value>,
}

/// Result parser bound to a portal origin and policy.
#[derive(Debug, Clone)]
pub struct ResultParser {
    origin: String,
    policy: ParserPolicy,
}

impl ResultParser {
    /// Creates a parser resolving detail links against `origin`.
    #[must_use]
    pub fn new(origin: impl Into<String>, policy: ParserPolicy) -> Self {
        Self {
            origin: origin.into().trim_end_matches('/').to_string(),
            policy,
        }
    }

    /// Parses one search response body.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when the body is unrecognizable or the
    /// malformed-entry ratio is exceeded.
    #[instrument(level = "debug", skip(self, body), fields(bytes = body.len()))]
    pub fn parse(&self, body: &str, query_used: &str, page_offset: u64) -> Result<SearchPage, ParseError> {
        let page = |total_result_count, outcome, malformed_entries, seen_entries| SearchPage {
            query_used: query_used.to_string(),
            page_offset,
            total_result_count,
            outcome,
            malformed_entries,
            seen_entries,
        };

        if let Some(marker) = self
            .policy
            .user_error_markers
            .iter()
            .find(|marker| body.contains(marker.as_str()))
        {
            debug!(marker = %marker, "portal reported a query defect");
            return Ok(page(
                None,
                PageOutcome::SyntaxError {
                    marker: marker.clone(),
                },
                0,
                0,
            ));
        }

        let trimmed = body.trim_start();
        let json_text = trimmed.strip_prefix(XSSI_PREFIX).unwrap_or(trimmed);
        let Ok(envelope) = serde_json::from_str::<Value>(json_text) else {
            return self.parse_html_fragment(body).map(|records| {
                let seen = records.len();
                let outcome = if records.is_empty() {
                    PageOutcome::Empty
                } else {
                    PageOutcome::Results(records)
                };
                page(None, outcome, 0, seen)
            });
        };

        let Some(results) = envelope.get("results") else {
            return Err(ParseError::UnrecognizedBody {
                snippet: snippet(body),
            });
        };

        let total = results.get("total_num_results").and_then(as_count);
        if total == Some(0) {
            return Ok(page(Some(0), PageOutcome::Empty, 0, 0));
        }

        let (records, malformed, seen) = self.decode_clusters(results);
        if let Some(threshold) = self.policy.max_malformed_ratio
            && seen > 0
        {
            #[allow(clippy::cast_precision_loss)]
            let ratio = malformed as f64 / seen as f64;
            if ratio > threshold {
                return Err(ParseError::TooManyMalformed {
                    malformed,
                    total: seen,
                    threshold,
                });
            }
        }

        let outcome = if records.is_empty() && total.is_none() {
            PageOutcome::Empty
        } else {
            PageOutcome::Results(records)
        };
        Ok(page(total, outcome, malformed, seen))
    }

    fn decode_clusters(&self, results: &Value) -> (Vec<ResultRecord>, usize, usize) {
        let mut records = Vec::new();
        let mut ids = HashSet::new();
        let mut malformed = 0;
        let mut seen = 0;

        let clusters = results.get("cluster").and_then(Value::as_array);
        for cluster in clusters.into_iter().flatten() {
            let entries = cluster.get("result").and_then(Value::as_array);
            for (index, entry) in entries.into_iter().flatten().enumerate() {
                seen += 1;
                match self.decode_entry(entry) {
                    Some(record) => {
                        if ids.insert(record.patent_id.clone()) {
                            records.push(record);
                        } else {
                            debug!(patent_id = %record.patent_id, "duplicate entry on page");
                        }
                    }
                    None => {
                        malformed += 1;
                        warn!(index, "skipping malformed result entry");
                    }
                }
            }
        }

        (records, malformed, seen)
    }

    fn decode_entry(&self, entry: &Value) -> Option<ResultRecord> {
        let raw = RawEntry::deserialize(entry).ok()?;
        let from_id = raw
            .id
            .as_deref()
            .and_then(|id| id.split('/').nth(1))
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let patent_id = raw
            .patent
            .publication_number
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string())
            .or(from_id)?;

        let detail_url = match raw.id.as_deref().map(|id| id.trim_start_matches('/')) {
            Some(id) if !id.is_empty() => format!("{}/{id}", self.origin),
            _ => format!("{}/patent/{patent_id}/en", self.origin),
        };
        let title = raw
            .patent
            .title
            .as_deref()
            .map(strip_html)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| patent_id.clone());

        let raw_fields = raw
            .patent
            .rest
            .into_iter()
            .filter_map(|(key, value)| scalar_string(&value).map(|v| (key, v)))
            .collect::<BTreeMap<_, _>>();

        Some(ResultRecord {
            patent_id,
            title,
            detail_url,
            raw_fields,
        })
    }

    fn parse_html_fragment(&self, body: &str) -> Result<Vec<ResultRecord>, ParseError> {
        let lowered = body.to_ascii_lowercase();
        if !lowered.contains('<') {
            return Err(ParseError::UnrecognizedBody {
                snippet: snippet(body),
            });
        }

        let mut ids = HashSet::new();
        let records: Vec<ResultRecord> = PATENT_LINK_RE
            .captures_iter(body)
            .filter(|caps| ids.insert(caps[2].to_string()))
            .map(|caps| ResultRecord {
                patent_id: caps[2].to_string(),
                title: caps[2].to_string(),
                detail_url: format!("{}/{}", self.origin, &caps[1]),
                raw_fields: BTreeMap::new(),
            })
            .collect();
        debug!(records = records.len(), "parsed HTML result fragment");
        Ok(records)
    }
}

fn as_count(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(strip_html(s)),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(120).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::query::normalize;

    fn parser() -> ResultParser {
        ResultParser::new("https://patents.google.com", ParserPolicy::default())
    }

    const TWO_RESULTS: &str = r#"{
        "results": {
            "total_num_results": 2,
            "cluster": [{
                "result": [
                    {"id": "patent/US11056471B2/en", "patent": {
                        "publication_number": "US11056471B2",
                        "title": "Neural network <b>pruning</b> method",
                        "assignee": "Acme Corp",
                        "priority_date": "2018-03-01",
                        "inventor": ["A", "B"]
                    }},
                    {"id": "patent/EP3123456A1/en", "patent": {
                        "publication_number": "EP3123456A1",
                        "title": "Pruning &amp; quantization"
                    }}
                ]
            }]
        }
    }"#;

    #[test]
    fn test_scenario_normalized_query_two_records_in_order() {
        let query = normalize("title:neural AND abstract:pruning");
        assert_eq!(query.as_str(), "TI=neural AND AB=pruning");

        let page = parser().parse(TWO_RESULTS, query.as_str(), 0).unwrap();
        assert!(!page.is_syntax_error());
        assert_eq!(page.total_result_count, Some(2));
        let ids: Vec<&str> = page.records().iter().map(|r| r.patent_id.as_str()).collect();
        assert_eq!(ids, vec!["US11056471B2", "EP3123456A1"]);
        assert_eq!(page.query_used, "TI=neural AND AB=pruning");
    }

    #[test]
    fn test_parse_builds_detail_url_title_and_raw_fields() {
        let page = parser().parse(TWO_RESULTS, "q", 0).unwrap();
        let first = &page.records()[0];
        assert_eq!(first.detail_url, "https://patents.google.com/patent/US11056471B2/en");
        assert_eq!(first.title, "Neural network pruning method");
        assert_eq!(first.raw_fields.get("assignee").unwrap(), "Acme Corp");
        assert!(!first.raw_fields.contains_key("inventor"));
        assert_eq!(page.records()[1].title, "Pruning & quantization");
    }

    #[test]
    fn test_user_error_marker_wins_over_results() {
        let body = TWO_RESULTS.replace("\"results\"", "\"user_error\": true, \"results\"");
        let page = parser().parse(&body, "q", 0).unwrap();
        assert!(page.is_syntax_error());
        assert!(page.records().is_empty());
        assert_eq!(page.total_result_count, None);
    }

    #[test]
    fn test_custom_user_error_marker() {
        let policy = ParserPolicy {
            user_error_markers: vec!["Invalid query".to_string()],
            max_malformed_ratio: None,
        };
        let page = ResultParser::new("https://patents.google.com", policy)
            .parse("<div>Invalid query near NEAR/2</div>", "q", 0)
            .unwrap();
        assert!(page.is_syntax_error());
    }

    #[test]
    fn test_zero_total_is_valid_empty_page() {
        let page = parser()
            .parse(r#"{"results": {"total_num_results": 0, "cluster": []}}"#, "q", 0)
            .unwrap();
        assert_eq!(page.outcome, PageOutcome::Empty);
        assert_eq!(page.total_result_count, Some(0));
        assert!(!page.is_syntax_error());
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let body = r#"{"results": {"total_num_results": "3", "cluster": [{"result": [
            {"id": "patent/US1/en", "patent": {"publication_number": "US1", "title": "a"}},
            {"id": 42},
            {"id": "patent/US2/en", "patent": {"title": "derived from id"}}
        ]}]}}"#;
        let page = parser().parse(body, "q", 10).unwrap();
        assert_eq!(page.total_result_count, Some(3));
        assert_eq!(page.malformed_entries, 1);
        assert_eq!(page.seen_entries, 3);
        let ids: Vec<&str> = page.records().iter().map(|r| r.patent_id.as_str()).collect();
        assert_eq!(ids, vec!["US1", "US2"]);
        assert_eq!(page.page_offset, 10);
    }

    #[test]
    fn test_malformed_ratio_policy_aborts_page() {
        let policy = ParserPolicy {
            max_malformed_ratio: Some(0.4),
            ..ParserPolicy::default()
        };
        let body = r#"{"results": {"total_num_results": 2, "cluster": [{"result": [
            {"nope": 1}, {"id": "patent/US1/en", "patent": {}}
        ]}]}}"#;
        let err = ResultParser::new("https://patents.google.com", policy)
            .parse(body, "q", 0)
            .unwrap_err();
        assert!(matches!(
            err,
            ParseError::TooManyMalformed {
                malformed: 1,
                total: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_duplicate_entries_collapse() {
        let body = r#"{"results": {"total_num_results": 2, "cluster": [
            {"result": [{"id": "patent/US1/en", "patent": {"publication_number": "US1"}}]},
            {"result": [{"id": "patent/US1/en", "patent": {"publication_number": "US1"}}]}
        ]}}"#;
        let page = parser().parse(body, "q", 0).unwrap();
        assert_eq!(page.records().len(), 1);
        assert_eq!(page.records()[0].title, "US1");
        assert_eq!(page.seen_entries, 2, "duplicates still count as returned entries");
    }

    #[test]
    fn test_xssi_prefix_is_stripped() {
        let body = format!(")]}}'\n{TWO_RESULTS}");
        let page = parser().parse(&body, "q", 0).unwrap();
        assert_eq!(page.records().len(), 2);
    }

    #[test]
    fn test_html_fragment_fallback() {
        let body = r#"<article><h3><a href="/patent/US9876543B1/en">Widget</a></h3>
            <a href="/patent/US9876543B1/en">dup</a>
            <a href="https://patents.google.com/patent/JP2020123456A/ja">JP</a></article>"#;
        let page = parser().parse(body, "q", 0).unwrap();
        assert_eq!(page.total_result_count, None);
        let urls: Vec<&str> = page.records().iter().map(|r| r.detail_url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://patents.google.com/patent/US9876543B1/en",
                "https://patents.google.com/patent/JP2020123456A/ja",
            ]
        );
    }

    #[test]
    fn test_unrecognized_body_is_error() {
        assert!(matches!(
            parser().parse("plain text", "q", 0),
            Err(ParseError::UnrecognizedBody { .. })
        ));
        assert!(matches!(
            parser().parse(r#"{"unexpected": true}"#, "q", 0),
            Err(ParseError::UnrecognizedBody { .. })
        ));
    }
}
