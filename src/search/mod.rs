//! Search pages: request construction and response parsing.

pub mod parser;
pub mod request;

use std::collections::BTreeMap;

use serde::Serialize;

pub use parser::{ParseError, ResultParser};
pub use request::{SearchSpec, build_search_url};

/// One search hit. Identity is `patent_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRecord {
    /// Publication number, e.g. `US11056471B2`.
    pub patent_id: String,
    /// Title with markup stripped.
    pub title: String,
    /// Absolute URL of the detail page.
    pub detail_url: String,
    /// Remaining scalar fields of the entry, stringified.
    pub raw_fields: BTreeMap<String, String>,
}

/// How a search page turned out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// The portal rejected the query grammar.
    SyntaxError {
        /// Marker that was found in the body.
        marker: String,
    },
    /// A valid query with no hits.
    Empty,
    /// Hits in portal ranking order. May be empty past the last page.
    Results(Vec<ResultRecord>),
}

/// A parsed search response. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPage {
    /// Query text that produced this page.
    pub query_used: String,
    /// Offset of the first record.
    pub page_offset: u64,
    /// Total hits reported by the portal, when known.
    pub total_result_count: Option<u64>,
    /// Classification and records.
    pub outcome: PageOutcome,
    /// Entries skipped because they could not be decoded.
    pub malformed_entries: usize,
    /// Entries the portal returned on this page, malformed and duplicate
    /// ones included. Decides whether the page was short.
    pub seen_entries: usize,
}

impl SearchPage {
    /// Whether the portal reported a query defect.
    #[must_use]
    pub fn is_syntax_error(&self) -> bool {
        matches!(self.outcome, PageOutcome::SyntaxError { .. })
    }

    /// Records on this page; empty for syntax errors and empty results.
    #[must_use]
    pub fn records(&self) -> &[ResultRecord] {
        match &self.outcome {
            PageOutcome::Results(records) => records,
            PageOutcome::SyntaxError { .. } | PageOutcome::Empty => &[],
        }
    }
}
