//! Query engine: pagination, the bounded per-record pipeline, and reporting.
//!
//! # Concurrency Model
//!
//! - Queries run one after another on the shared executor.
//! - Within a query, pages are fetched strictly in offset order and never
//!   beyond the last observed total.
//! - Records are resolved and downloaded in their own Tokio tasks, bounded by
//!   a semaphore. Completion order is free; outcomes are reported in ranking
//!   order.
//! - When the interrupt flag is set, no new page or record is claimed,
//!   in-flight tasks get a grace period, then are aborted. Aborting drops the
//!   download future, whose guard removes any temporary file.

mod manifest;
mod report;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

pub use manifest::{MANIFEST_FILE_NAME, write_manifest};
pub use report::{QueryReport, QueryStatus, RecordOutcome, RecordStatus, RunSummary};

use crate::config::EngineOptions;
use crate::diagnostics::DiagnosticsRecorder;
use crate::download::{DownloadManager, DownloadStatus, artifact_file_name};
use crate::executor::{PortalRequest, RequestExecutor};
use crate::query::{NormalizedQuery, normalize};
use crate::resolver::{ArtifactResolver, ResolveFailureReason};
use crate::search::{PageOutcome, ResultParser, ResultRecord, SearchSpec};

/// Poll interval while waiting for a permit under interrupt.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The run manifest could not be written.
    #[error("failed to write manifest {path}: {source}")]
    Manifest {
        /// Manifest path.
        path: std::path::PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The run manifest could not be encoded.
    #[error("failed to encode manifest: {0}")]
    ManifestEncode(#[from] serde_json::Error),
}

/// Results of a batch.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// One report per input query, in input order.
    pub queries: Vec<QueryReport>,
    /// Aggregated counts.
    pub summary: RunSummary,
}

/// Drives queries through search, resolution and download.
pub struct QueryEngine {
    executor: Arc<RequestExecutor>,
    parser: ResultParser,
    resolver: ArtifactResolver,
    downloads: Option<DownloadManager>,
    diagnostics: DiagnosticsRecorder,
    options: EngineOptions,
    interrupted: Arc<AtomicBool>,
}

impl QueryEngine {
    /// Creates an engine. Without a download manager the engine only lists
    /// records, as in count-only mode.
    #[must_use]
    pub fn new(
        executor: Arc<RequestExecutor>,
        parser: ResultParser,
        downloads: Option<DownloadManager>,
        diagnostics: DiagnosticsRecorder,
        options: EngineOptions,
    ) -> Self {
        let resolver = ArtifactResolver::new(Arc::clone(&executor), diagnostics.clone());
        Self {
            executor,
            parser,
            resolver,
            downloads,
            diagnostics,
            options,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Uses `flag` as the interrupt signal.
    #[must_use]
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Runs `queries` sequentially on the shared session.
    ///
    /// Query-level failures are recorded in the corresponding report and the
    /// batch continues.
    #[instrument(skip_all, fields(queries = queries.len()))]
    pub async fn run_batch(&self, queries: &[String]) -> RunReport {
        let mut reports = Vec::with_capacity(queries.len());
        for raw in queries {
            if self.is_interrupted() {
                reports.push(QueryReport::not_started(normalize(raw)));
                continue;
            }
            reports.push(self.run_query(raw).await);
        }

        let summary = RunSummary::from_reports(
            &reports,
            self.executor.stats(),
            self.executor.sessions().recapture_count(),
        );
        info!(
            queries = summary.queries,
            downloaded = summary.downloaded,
            skipped = summary.skipped_exists,
            no_artifact = summary.no_artifact,
            failed = summary.resolve_failed + summary.download_failed,
            "run complete"
        );
        RunReport {
            queries: reports,
            summary,
        }
    }

    /// Runs one query: paginate, then resolve and download each record.
    #[instrument(skip(self), fields(normalized = tracing::field::Empty))]
    pub async fn run_query(&self, raw: &str) -> QueryReport {
        let query = normalize(raw);
        tracing::Span::current().record("normalized", query.as_str());
        if query.was_rewritten() {
            debug!(original = query.original(), "query rewritten");
        }

        let (mut report, records) = self.collect_records(query).await;

        if self.options.count_only || self.downloads.is_none() {
            report.records = records
                .iter()
                .map(|record| RecordOutcome::new(record, RecordStatus::Listed))
                .collect();
            return report;
        }

        let (outcomes, session_failure) = self.process_records(report.query.as_str(), &records).await;
        report.records = outcomes;
        if self.is_interrupted() && matches!(report.status, QueryStatus::Completed) {
            report.status = QueryStatus::Interrupted;
        }
        if let Some(error) = session_failure
            && !matches!(report.status, QueryStatus::Failed { .. })
        {
            report.status = QueryStatus::Failed { kind: None, error };
        }
        report
    }

    /// Pages through results in offset order up to the record limit.
    async fn collect_records(&self, query: NormalizedQuery) -> (QueryReport, Vec<ResultRecord>) {
        let mut report = QueryReport::new(query);
        let mut records: Vec<ResultRecord> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let query_text = report.query.as_str().to_string();

        if query_text.is_empty() {
            report.status = QueryStatus::Defect {
                marker: "empty query".to_string(),
            };
            return (report, records);
        }

        let limit = self.options.max_results.max(1);
        let page_size = self.options.page_size.max(1);
        let mut page_index: u32 = 0;

        loop {
            if self.is_interrupted() {
                report.status = QueryStatus::Interrupted;
                break;
            }
            let spec = SearchSpec {
                query: query_text.clone(),
                page_size,
                page_index,
            };
            let offset = spec.offset();
            if let Some(total) = report.total_result_count
                && offset >= total
            {
                break;
            }

            let page = match self.executor.fetch_text(&PortalRequest::search(spec)).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(query = %query_text, offset, error = %e, "search page failed");
                    report.status = QueryStatus::Failed {
                        kind: Some(e.kind()),
                        error: e.to_string(),
                    };
                    break;
                }
            };
            report.pages += 1;
            self.diagnostics.record_in_background(
                &query_text,
                &format!("search_page_{page_index}.json"),
                page.body.clone().into_bytes(),
            );

            let parsed = match self.parser.parse(&page.body, &query_text, offset) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(query = %query_text, offset, error = %e, "search page unparseable");
                    report.status = QueryStatus::Failed {
                        kind: None,
                        error: e.to_string(),
                    };
                    break;
                }
            };
            report.malformed_entries += parsed.malformed_entries;
            if report.total_result_count.is_none() {
                report.total_result_count = parsed.total_result_count;
            }

            let returned = parsed.seen_entries;
            let page_records = match parsed.outcome {
                PageOutcome::SyntaxError { marker } => {
                    info!(query = %query_text, marker = %marker, "query defect reported by portal");
                    report.status = QueryStatus::Defect { marker };
                    break;
                }
                PageOutcome::Empty => {
                    info!(query = %query_text, "no results");
                    break;
                }
                PageOutcome::Results(page_records) => page_records,
            };
            for record in page_records {
                if records.len() >= limit {
                    break;
                }
                if seen.insert(record.patent_id.clone()) {
                    records.push(record);
                } else {
                    debug!(patent_id = %record.patent_id, "duplicate across pages");
                }
            }
            debug!(query = %query_text, offset, returned, collected = records.len(), "page consumed");

            // Malformed or repeated entries still occupy a slot on the page.
            let short_page = returned < usize::try_from(page_size).unwrap_or(usize::MAX);
            if records.len() >= limit || returned == 0 || short_page || self.options.count_only {
                break;
            }
            page_index += 1;
        }

        (report, records)
    }

    /// Resolves and downloads `records` concurrently; outcomes keep their
    /// input order.
    async fn process_records(&self, query: &str, records: &[ResultRecord]) -> (Vec<RecordOutcome>, Option<String>) {
        let Some(downloads) = self.downloads.clone() else {
            return (Vec::new(), None);
        };
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let session_failure: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
        let mut handles: Vec<(usize, JoinHandle<RecordOutcome>)> = Vec::new();

        for (index, record) in records.iter().enumerate() {
            if self.is_interrupted() || session_failure.get().is_some() {
                break;
            }
            let permit = tokio::select! {
                biased;
                () = wait_for_flag(&self.interrupted) => None,
                result = Arc::clone(&semaphore).acquire_owned() => result.ok(),
            };
            let Some(permit) = permit else {
                break;
            };
            if session_failure.get().is_some() {
                break;
            }

            let resolver = self.resolver.clone();
            let downloads = downloads.clone();
            let record = record.clone();
            let query = query.to_string();
            let session_failure = Arc::clone(&session_failure);
            handles.push((
                index,
                tokio::spawn(async move {
                    let _permit = permit;
                    process_record(&resolver, &downloads, &record, &query, &session_failure).await
                }),
            ));
        }

        let mut outcomes: Vec<Option<RecordOutcome>> = vec![None; records.len()];
        let mut deadline: Option<Instant> = None;
        for (index, mut handle) in handles {
            let joined = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, &mut handle).await.ok(),
                None => tokio::select! {
                    joined = &mut handle => Some(joined),
                    () = wait_for_flag(&self.interrupted) => {
                        let grace = Instant::now() + self.options.drain_timeout;
                        deadline = Some(grace);
                        tokio::time::timeout_at(grace, &mut handle).await.ok()
                    }
                },
            };
            match joined {
                Some(Ok(outcome)) => outcomes[index] = Some(outcome),
                Some(Err(e)) if e.is_cancelled() => {}
                Some(Err(e)) => {
                    warn!(index, error = %e, "record task failed");
                    outcomes[index] = Some(RecordOutcome::new(
                        &records[index],
                        RecordStatus::DownloadFailed {
                            reason: format!("worker task failed: {e}"),
                        },
                    ));
                }
                None => {
                    handle.abort();
                    debug!(index, "aborted in-flight record after grace period");
                }
            }
        }

        let outcomes = outcomes
            .into_iter()
            .zip(records)
            .map(|(outcome, record)| outcome.unwrap_or_else(|| RecordOutcome::new(record, RecordStatus::Cancelled)))
            .collect();
        let failure = session_failure.get().cloned();
        (outcomes, failure)
    }
}

async fn wait_for_flag(flag: &AtomicBool) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(INTERRUPT_POLL).await;
    }
}

#[instrument(skip_all, fields(patent_id = %record.patent_id))]
async fn process_record(
    resolver: &ArtifactResolver,
    downloads: &DownloadManager,
    record: &ResultRecord,
    query: &str,
    session_failure: &OnceLock<String>,
) -> RecordOutcome {
    let existing = downloads.root().join(artifact_file_name(&record.patent_id));
    if let Ok(meta) = tokio::fs::metadata(&existing).await
        && meta.is_file()
    {
        debug!(path = %existing.display(), "already downloaded; detail page not fetched");
        return RecordOutcome {
            destination_path: Some(existing),
            byte_count: meta.len(),
            ..RecordOutcome::new(record, RecordStatus::SkippedExists)
        };
    }

    match resolver.resolve(record, query).await {
        Ok(location) => {
            let outcome = downloads.download(&location, downloads.root()).await;
            if outcome.session_fatal
                && let DownloadStatus::Failed { reason } = &outcome.status
            {
                let _ = session_failure.set(reason.clone());
            }
            RecordOutcome::from_download(record, &location, outcome)
        }
        Err(failure) => match failure.reason {
            ResolveFailureReason::NoArtifact => RecordOutcome::new(record, RecordStatus::NoArtifact),
            ResolveFailureReason::Fetch(e) => {
                if e.is_session_fatal() {
                    let _ = session_failure.set(e.to_string());
                }
                RecordOutcome::new(
                    record,
                    RecordStatus::ResolveFailed {
                        reason: e.to_string(),
                    },
                )
            }
        },
    }
}
