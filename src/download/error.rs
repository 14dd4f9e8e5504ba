//! Error types for the download module.

use std::path::PathBuf;

use thiserror::Error;

use crate::executor::ExecutorError;

/// Errors that can occur while storing an artifact.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The request failed after the executor's retry policy.
    #[error(transparent)]
    Request(#[from] ExecutorError),

    /// The body stream broke off mid-transfer.
    #[error("stream interrupted downloading {url}: {source}")]
    Stream {
        /// Artifact URL.
        url: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// File system error while writing or renaming.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Streamed byte count differs from the declared `Content-Length`.
    #[error("integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}")]
    Integrity {
        /// Temporary file that failed verification.
        path: PathBuf,
        /// Declared size.
        expected_bytes: u64,
        /// Bytes received.
        actual_bytes: u64,
    },

    /// The portal answered with a web page instead of a document.
    #[error("expected a PDF from {url} but received {content_type}")]
    NotADocument {
        /// Artifact URL.
        url: String,
        /// Reported content type.
        content_type: String,
    },

    /// Destination resolves outside the output directory.
    #[error("refusing to write {path}: outside output directory {root}")]
    OutsideOutputDir {
        /// Requested destination.
        path: PathBuf,
        /// Configured output directory.
        root: PathBuf,
    },
}

impl DownloadError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an integrity error.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a confinement error.
    pub fn outside_output_dir(path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self::OutsideOutputDir {
            path: path.into(),
            root: root.into(),
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// Request errors already went through the executor's policy and are
    /// not retried again here.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Stream { .. } | Self::Integrity { .. })
    }

    /// Whether the session itself was lost while requesting the artifact.
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Request(e) if e.is_session_fatal())
    }
}
