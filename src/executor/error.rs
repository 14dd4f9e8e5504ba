//! Errors surfaced by the request executor after its retry policy is spent.

use thiserror::Error;

use crate::session::SessionError;

/// Coarse category of an [`ExecutorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorErrorKind {
    /// Connection reset, timeout, DNS, or repeated 5xx.
    Network,
    /// The portal kept throttling.
    RateLimited,
    /// Authorization failed again after a re-capture.
    SessionExpired,
    /// Re-capture itself failed.
    Recapture,
    /// Non-retryable HTTP status.
    Http,
    /// The request could not be built.
    InvalidRequest,
}

/// A request that failed after retry/backoff policy was exhausted.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Transport failure or repeated transient status.
    #[error("network error for {url} after {attempts} attempt(s): {message}")]
    Network {
        /// Request URL.
        url: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        message: String,
        /// Last HTTP status, when the failure was a 5xx.
        status: Option<u16>,
    },

    /// The portal kept answering with block signals.
    #[error("blocked by the portal (HTTP {status}) for {url} after {attempts} attempt(s)\n  Suggestion: wait before re-running or raise --delay")]
    RateLimited {
        /// Request URL.
        url: String,
        /// Last status.
        status: u16,
        /// Attempts made.
        attempts: u32,
    },

    /// A second authorization failure right after a re-capture.
    #[error("session rejected (HTTP {status}) for {url} after re-capture")]
    SessionExpired {
        /// Request URL.
        url: String,
        /// Status of the second failure.
        status: u16,
    },

    /// The session could not be re-captured.
    #[error("session re-capture failed while requesting {url}: {source}")]
    Recapture {
        /// Request URL.
        url: String,
        /// Capture or materialization failure.
        #[source]
        source: SessionError,
    },

    /// Status that retrying cannot fix (404, 400, ...).
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// Request URL.
        url: String,
        /// Status code.
        status: u16,
    },

    /// URL or header could not be turned into a request.
    #[error("invalid request for {url}: {message}")]
    InvalidRequest {
        /// Offending URL or target description.
        url: String,
        /// Builder error.
        message: String,
    },
}

impl ExecutorError {
    /// Creates a network error.
    pub fn network(url: impl Into<String>, attempts: u32, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.into(),
            attempts,
            message: message.into(),
            status: None,
        }
    }

    /// Creates an invalid-request error.
    pub fn invalid_request(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Coarse category.
    #[must_use]
    pub fn kind(&self) -> ExecutorErrorKind {
        match self {
            Self::Network { .. } => ExecutorErrorKind::Network,
            Self::RateLimited { .. } => ExecutorErrorKind::RateLimited,
            Self::SessionExpired { .. } => ExecutorErrorKind::SessionExpired,
            Self::Recapture { .. } => ExecutorErrorKind::Recapture,
            Self::HttpStatus { .. } => ExecutorErrorKind::Http,
            Self::InvalidRequest { .. } => ExecutorErrorKind::InvalidRequest,
        }
    }

    /// HTTP status involved, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Network { status, .. } => *status,
            Self::RateLimited { status, .. }
            | Self::SessionExpired { status, .. }
            | Self::HttpStatus { status, .. } => Some(*status),
            Self::Recapture { .. } | Self::InvalidRequest { .. } => None,
        }
    }

    /// Request URL.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Network { url, .. }
            | Self::RateLimited { url, .. }
            | Self::SessionExpired { url, .. }
            | Self::Recapture { url, .. }
            | Self::HttpStatus { url, .. }
            | Self::InvalidRequest { url, .. } => url,
        }
    }

    /// Whether a later run could succeed without changes.
    ///
    /// Retries are already exhausted when this error is returned, so only
    /// throttling is reported as worth retrying later.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether the failure concerns the session as a whole rather than one
    /// request, so continuing the run would fail the same way.
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::SessionExpired { .. } | Self::Recapture { .. })
    }
}
