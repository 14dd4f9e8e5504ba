//! Per-query reports and the aggregated run summary.

use std::path::PathBuf;

use serde::Serialize;

use crate::download::{DownloadOutcome, DownloadStatus};
use crate::executor::{ExecutorErrorKind, ExecutorStats};
use crate::query::NormalizedQuery;
use crate::resolver::ArtifactLocation;
use crate::search::ResultRecord;

/// How one query ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum QueryStatus {
    /// All pages up to the limit were processed.
    Completed,
    /// The portal rejected the query grammar.
    Defect {
        /// What flagged the defect.
        marker: String,
    },
    /// A page-level failure after retries; records collected before it were
    /// still processed.
    Failed {
        /// Error category, when it came from the executor.
        kind: Option<ExecutorErrorKind>,
        /// Rendered error.
        error: String,
    },
    /// Stopped by an interrupt.
    Interrupted,
}

/// Terminal state of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum RecordStatus {
    /// Count-only mode: listed, not fetched.
    Listed,
    /// Written to disk.
    Downloaded,
    /// Already on disk.
    SkippedExists,
    /// The detail page has no PDF.
    NoArtifact,
    /// The detail page could not be fetched.
    ResolveFailed {
        /// Rendered error.
        reason: String,
    },
    /// The PDF could not be stored.
    DownloadFailed {
        /// Rendered error.
        reason: String,
    },
    /// Never started, or aborted after the interrupt grace period.
    Cancelled,
}

/// Accounted outcome for one result record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    /// Publication number.
    pub patent_id: String,
    /// Title as listed.
    pub title: String,
    /// Detail page.
    pub detail_url: String,
    /// PDF URL, once resolved.
    pub pdf_url: Option<String>,
    /// File path, once a download was attempted.
    pub destination_path: Option<PathBuf>,
    /// Bytes on disk.
    pub byte_count: u64,
    /// Hex SHA-256 for fresh downloads.
    pub sha256: Option<String>,
    /// Result.
    #[serde(flatten)]
    pub status: RecordStatus,
}

impl RecordOutcome {
    /// An outcome with no download information yet.
    #[must_use]
    pub fn new(record: &ResultRecord, status: RecordStatus) -> Self {
        Self {
            patent_id: record.patent_id.clone(),
            title: record.title.clone(),
            detail_url: record.detail_url.clone(),
            pdf_url: None,
            destination_path: None,
            byte_count: 0,
            sha256: None,
            status,
        }
    }

    /// Combines a resolved location with its download outcome.
    #[must_use]
    pub fn from_download(record: &ResultRecord, location: &ArtifactLocation, outcome: DownloadOutcome) -> Self {
        let status = match outcome.status {
            DownloadStatus::Completed => RecordStatus::Downloaded,
            DownloadStatus::SkippedExists => RecordStatus::SkippedExists,
            DownloadStatus::Failed { reason } => RecordStatus::DownloadFailed { reason },
        };
        Self {
            pdf_url: Some(location.pdf_url.clone()),
            destination_path: Some(outcome.destination_path),
            byte_count: outcome.byte_count,
            sha256: outcome.sha256,
            ..Self::new(record, status)
        }
    }
}

/// Everything that happened for one query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    /// Query as given and as sent.
    pub query: NormalizedQuery,
    /// Total reported by the first page that carried one.
    pub total_result_count: Option<u64>,
    /// Pages fetched.
    pub pages: u32,
    /// Entries the parser skipped.
    pub malformed_entries: usize,
    /// How the query ended.
    #[serde(flatten)]
    pub status: QueryStatus,
    /// One entry per record, in ranking order.
    pub records: Vec<RecordOutcome>,
}

impl QueryReport {
    /// An empty report for `query`.
    #[must_use]
    pub fn new(query: NormalizedQuery) -> Self {
        Self {
            query,
            total_result_count: None,
            pages: 0,
            malformed_entries: 0,
            status: QueryStatus::Completed,
            records: Vec::new(),
        }
    }

    /// Report for a query never started because the run was interrupted.
    #[must_use]
    pub fn not_started(query: NormalizedQuery) -> Self {
        Self {
            status: QueryStatus::Interrupted,
            ..Self::new(query)
        }
    }

    /// Whether the status is a query defect.
    #[must_use]
    pub fn is_defect(&self) -> bool {
        matches!(self.status, QueryStatus::Defect { .. })
    }
}

/// Totals over a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub queries: usize,
    pub defects: usize,
    pub failed_queries: usize,
    pub records: usize,
    pub listed: usize,
    pub downloaded: usize,
    pub skipped_exists: usize,
    pub no_artifact: usize,
    pub resolve_failed: usize,
    pub download_failed: usize,
    pub cancelled: usize,
    pub bytes: u64,
    pub requests: usize,
    pub block_signals: usize,
    pub transient_retries: usize,
    pub recaptures: usize,
    pub interrupted: bool,
}

impl RunSummary {
    /// Aggregates `reports` and executor counters.
    #[must_use]
    pub fn from_reports(reports: &[QueryReport], stats: &ExecutorStats, recaptures: usize) -> Self {
        let mut summary = Self {
            queries: reports.len(),
            requests: stats.requests(),
            block_signals: stats.block_signals(),
            transient_retries: stats.transient_retries(),
            recaptures,
            ..Self::default()
        };
        for report in reports {
            match report.status {
                QueryStatus::Completed => {}
                QueryStatus::Defect { .. } => summary.defects += 1,
                QueryStatus::Failed { .. } => summary.failed_queries += 1,
                QueryStatus::Interrupted => summary.interrupted = true,
            }
            for record in &report.records {
                summary.records += 1;
                summary.bytes += record.byte_count;
                match record.status {
                    RecordStatus::Listed => summary.listed += 1,
                    RecordStatus::Downloaded => summary.downloaded += 1,
                    RecordStatus::SkippedExists => summary.skipped_exists += 1,
                    RecordStatus::NoArtifact => summary.no_artifact += 1,
                    RecordStatus::ResolveFailed { .. } => summary.resolve_failed += 1,
                    RecordStatus::DownloadFailed { .. } => summary.download_failed += 1,
                    RecordStatus::Cancelled => summary.cancelled += 1,
                }
            }
        }
        summary
    }

    /// Whether the run ends with exit code 0.
    ///
    /// Defects, empty results and per-record failures still count as a
    /// completed run.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.interrupted && self.failed_queries == 0
    }
}
