//! Patent Downloader Core Library
//!
//! Bridges a browser-issued portal session into a reusable HTTP client,
//! then searches, paginates, resolves and downloads patent PDFs with it.
//!
//! # Architecture
//!
//! - [`query`] - user query syntax to portal grammar
//! - [`session`] - browser capture, materialization, atomic re-capture
//! - [`executor`] - paced requests with backoff and session recovery
//! - [`search`] - search page construction and result parsing
//! - [`resolver`] - detail page to PDF location
//! - [`download`] - streaming, confined, idempotent PDF storage
//! - [`engine`] - per-query pipeline, run summary and manifest
//! - [`diagnostics`] - optional raw payload capture
//! - [`config`] - tunables with documented defaults

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod diagnostics;
pub mod download;
pub mod engine;
pub mod executor;
pub mod query;
pub mod resolver;
pub mod search;
pub mod session;
pub mod text;
pub mod user_agent;

// Re-export commonly used types
pub use config::{EngineOptions, HttpSettings, ParserPolicy, PortalSettings, RetrySettings};
pub use diagnostics::DiagnosticsRecorder;
pub use download::{DownloadError, DownloadManager, DownloadOutcome, DownloadStatus};
pub use engine::{QueryEngine, QueryReport, QueryStatus, RecordStatus, RunReport, RunSummary, write_manifest};
pub use executor::{ExecutorError, ExecutorErrorKind, PortalRequest, RequestExecutor};
pub use query::{NormalizedQuery, normalize};
pub use resolver::{ArtifactLocation, ArtifactResolver, ResolveFailure};
pub use search::{PageOutcome, ResultParser, ResultRecord, SearchPage};
pub use session::{
    BrowserDriver, CaptureError, CapturedSession, ChromiumDriver, ExecutionSession, SessionCapturer, SessionHandle,
    SessionSource, materialize,
};
