//! Detail & artifact resolution: follows a result record to its detail page
//! and extracts the PDF location.
//!
//! Patterns are tried in order, first match wins:
//!
//! 1. `<meta name="citation_pdf_url" content="...">`
//! 2. an anchor marked `itemprop="pdfLink"`
//! 3. any anchor whose `href` ends in `.pdf` (query string allowed)
//! 4. a bare `patentimages` storage URL ending in `.pdf`
//!
//! A detail page without any of these is a normal outcome
//! ([`ResolveFailureReason::NoArtifact`]), not an error.

use std::sync::{Arc, LazyLock};
use std::time::SystemTime;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

use crate::diagnostics::DiagnosticsRecorder;
use crate::executor::{ExecutorError, PortalRequest, RequestExecutor, RequestPurpose};
use crate::search::ResultRecord;
use crate::text::{compile_static_regex, decode_entities};

static CITATION_PDF_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<meta\s+[^>]*(?:name|property)\s*=\s*["']citation_pdf_url["'][^>]*content\s*=\s*["']([^"']+)["']"#,
    )
});

static PDF_LINK_ITEMPROP_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<a\s+[^>]*(?:itemprop\s*=\s*["']pdfLink["'][^>]*href\s*=\s*["']([^"']+)["']|href\s*=\s*["']([^"']+)["'][^>]*itemprop\s*=\s*["']pdfLink["'])"#,
    )
});

static PDF_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?i)href\s*=\s*["']([^"']+?\.pdf(?:\?[^"']*)?)["']"#)
});

static PATENTIMAGES_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"https://patentimages\.storage\.googleapis\.com/[^\s"'<>]+?\.pdf"#)
});

/// Where a patent's PDF lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactLocation {
    /// Publication number.
    pub patent_id: String,
    /// Absolute PDF URL.
    pub pdf_url: String,
    /// Detail page the URL was found on; sent as `Referer`.
    pub detail_url: String,
    /// When the URL was extracted.
    pub resolved_at: SystemTime,
}

/// Why no artifact location was produced.
#[derive(Debug, Error)]
pub enum ResolveFailureReason {
    /// The detail page has no retrievable PDF.
    #[error("no PDF link on the detail page")]
    NoArtifact,

    /// The detail page could not be fetched.
    #[error("detail page fetch failed: {0}")]
    Fetch(#[source] ExecutorError),
}

/// A record whose artifact could not be located.
#[derive(Debug, Error)]
#[error("[{patent_id}] {reason}")]
pub struct ResolveFailure {
    /// Publication number.
    pub patent_id: String,
    /// What went wrong.
    #[source]
    pub reason: ResolveFailureReason,
}

impl ResolveFailure {
    /// Whether this is the ordinary "patent has no PDF" outcome.
    #[must_use]
    pub fn is_no_artifact(&self) -> bool {
        matches!(self.reason, ResolveFailureReason::NoArtifact)
    }
}

/// Resolves records to artifact locations through the shared executor.
#[derive(Clone)]
pub struct ArtifactResolver {
    executor: Arc<RequestExecutor>,
    diagnostics: DiagnosticsRecorder,
}

impl ArtifactResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(executor: Arc<RequestExecutor>, diagnostics: DiagnosticsRecorder) -> Self {
        Self {
            executor,
            diagnostics,
        }
    }

    /// Fetches the detail page of `record` and extracts its PDF URL.
    ///
    /// `query` only partitions diagnostics output.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveFailure`] when the page has no PDF link or could not
    /// be fetched after the executor's retry policy.
    #[instrument(skip(self, record), fields(patent_id = %record.patent_id))]
    pub async fn resolve(&self, record: &ResultRecord, query: &str) -> Result<ArtifactLocation, ResolveFailure> {
        let request = PortalRequest::get(&record.detail_url, RequestPurpose::Detail)
            .with_header("Accept", "text/html,application/xhtml+xml");
        let page = self
            .executor
            .fetch_text(&request)
            .await
            .map_err(|e| ResolveFailure {
                patent_id: record.patent_id.clone(),
                reason: ResolveFailureReason::Fetch(e),
            })?;

        if self.diagnostics.is_enabled() {
            self.diagnostics.record_in_background(
                query,
                &format!("detail_{}.html", record.patent_id),
                page.body.clone().into_bytes(),
            );
        }

        match extract_pdf_url(&page.body, &page.final_url) {
            Some(pdf_url) => {
                debug!(pdf_url = %pdf_url, "resolved artifact");
                Ok(ArtifactLocation {
                    patent_id: record.patent_id.clone(),
                    pdf_url,
                    detail_url: record.detail_url.clone(),
                    resolved_at: SystemTime::now(),
                })
            }
            None => {
                info!("no PDF link on detail page");
                Err(ResolveFailure {
                    patent_id: record.patent_id.clone(),
                    reason: ResolveFailureReason::NoArtifact,
                })
            }
        }
    }
}

/// Extracts the PDF URL from a detail page, absolutized against `base_url`.
#[must_use]
pub fn extract_pdf_url(html: &str, base_url: &str) -> Option<String> {
    let base = Url::parse(base_url).ok();
    let candidate = CITATION_PDF_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .or_else(|| {
            PDF_LINK_ITEMPROP_RE
                .captures(html)
                .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        })
        .or_else(|| PDF_HREF_RE.captures(html).and_then(|caps| caps.get(1)))
        .or_else(|| PATENTIMAGES_RE.find(html))?;

    let value = decode_entities(candidate.as_str().trim());
    absolutize_url(&value, base.as_ref())
}

fn absolutize_url(value: &str, base: Option<&Url>) -> Option<String> {
    if value.starts_with("http://") || value.starts_with("https://") {
        return Some(value.to_string());
    }
    if value.starts_with("//") {
        return Some(format!("https:{value}"));
    }
    base?.join(value).ok().map(String::from)
}
