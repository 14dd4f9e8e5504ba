//! Download manager: streams resolved artifacts into the output directory.
//!
//! - Bytes go to a hidden temporary file next to the destination and are
//!   renamed into place only after the transfer completed and, when the
//!   server declared one, the byte count matched `Content-Length`.
//! - An existing destination file is reported as skipped without any
//!   request, so re-runs are idempotent.
//! - Destinations outside the output directory are refused.

mod error;
mod filename;
mod manager;

use std::path::PathBuf;

use serde::Serialize;

pub use error::DownloadError;
pub use filename::{artifact_file_name, confine_dir};
pub use manager::DownloadManager;

use crate::resolver::ArtifactLocation;

/// Terminal state of one download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum DownloadStatus {
    /// Written and renamed into place.
    Completed,
    /// The destination already existed; nothing was requested.
    SkippedExists,
    /// Gave up after the attempt bound.
    Failed {
        /// Last error, rendered.
        reason: String,
    },
}

/// Emitted exactly once per attempted patent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadOutcome {
    /// Publication number.
    pub patent_id: String,
    /// Final (or intended) file path.
    pub destination_path: PathBuf,
    /// Bytes on disk.
    pub byte_count: u64,
    /// Hex SHA-256 of the streamed bytes; only for fresh downloads.
    pub sha256: Option<String>,
    /// Result.
    #[serde(flatten)]
    pub status: DownloadStatus,
    /// The failure was a lost session; no further request can succeed.
    #[serde(skip)]
    pub session_fatal: bool,
}

impl DownloadOutcome {
    fn failed(location: &ArtifactLocation, destination_path: PathBuf, error: &DownloadError) -> Self {
        Self {
            patent_id: location.patent_id.clone(),
            destination_path,
            byte_count: 0,
            sha256: None,
            status: DownloadStatus::Failed {
                reason: error.to_string(),
            },
            session_fatal: error.is_session_fatal(),
        }
    }

    /// Whether the file is now present at the destination.
    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(self.status, DownloadStatus::Completed | DownloadStatus::SkippedExists)
    }
}
