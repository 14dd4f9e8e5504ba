//! Tunable settings for the session bridge, executor, parser and engine.
//!
//! The portal's throttling thresholds are found empirically and drift over
//! time, so every constant the retry and pacing logic relies on lives here
//! with a documented default instead of being baked into the call sites.

use std::time::Duration;

/// Default portal origin.
pub const DEFAULT_PORTAL_ORIGIN: &str = "https://patents.google.com";

/// Path fragment identifying the portal's search XHR.
pub const DEFAULT_SEARCH_PATH_MARKER: &str = "/xhr/query";

/// Default number of results requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Default number of records processed per query.
pub const DEFAULT_MAX_RESULTS: usize = 5;

/// Default bound on concurrent detail/download work.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default attempts for transient network failures (first try included).
pub const DEFAULT_NETWORK_ATTEMPTS: u32 = 3;

/// Default minimum delay between two requests to the same host.
pub const DEFAULT_MIN_REQUEST_DELAY: Duration = Duration::from_millis(1000);

/// Default browser capture budget.
pub const DEFAULT_CAPTURE_BUDGET: Duration = Duration::from_secs(30);

/// Where the portal lives and how its search request is recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalSettings {
    /// Scheme and host, no trailing slash.
    pub origin: String,
    /// Substring identifying the search XHR among observed requests.
    pub search_path_marker: String,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            origin: DEFAULT_PORTAL_ORIGIN.to_string(),
            search_path_marker: DEFAULT_SEARCH_PATH_MARKER.to_string(),
        }
    }
}

impl PortalSettings {
    /// Settings pointing at a different origin (used by tests and mirrors).
    #[must_use]
    pub fn with_origin(origin: impl Into<String>) -> Self {
        let origin = origin.into();
        Self {
            origin: origin.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Entry page that makes the portal fire a search XHR for `query`.
    #[must_use]
    pub fn entry_url(&self, query: &str) -> String {
        format!("{}/?q={}&hl=en", self.origin, urlencoding::encode(query))
    }
}

/// Transport settings for the materialized HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout for search and detail requests.
    pub request_timeout: Duration,
    /// Whole-request timeout for artifact downloads.
    pub download_timeout: Duration,
    /// Idle connections kept per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(300),
            pool_max_idle_per_host: 8,
        }
    }
}

/// Retry, backoff and pacing constants used by the request executor.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    /// First delay after a block signal.
    pub block_base_delay: Duration,
    /// Ceiling for the exponential block delay.
    pub block_max_delay: Duration,
    /// Block signals tolerated for one request before giving up.
    pub max_block_retries: u32,
    /// Upper bound of random jitter added to each block delay.
    pub jitter: Duration,
    /// Attempts for transient network failures, first try included.
    pub network_attempts: u32,
    /// Linear step between transient retries (attempt n waits n * step).
    pub network_retry_step: Duration,
    /// Minimum spacing between requests to one host, applied on success too.
    pub min_request_delay: Duration,
    /// Age after which a captured session is replaced before use.
    pub session_max_age: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            block_base_delay: Duration::from_secs(2),
            block_max_delay: Duration::from_secs(60),
            max_block_retries: 5,
            jitter: Duration::from_millis(250),
            network_attempts: DEFAULT_NETWORK_ATTEMPTS,
            network_retry_step: Duration::from_secs(1),
            min_request_delay: DEFAULT_MIN_REQUEST_DELAY,
            session_max_age: Duration::from_secs(30 * 60),
        }
    }
}

impl RetrySettings {
    /// Settings without sleeps, for tests driving mock servers.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            block_base_delay: Duration::from_millis(1),
            block_max_delay: Duration::from_millis(8),
            jitter: Duration::ZERO,
            network_retry_step: Duration::from_millis(1),
            min_request_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// How the result parser treats ambiguous payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct ParserPolicy {
    /// Substrings that mark a portal-reported query defect.
    pub user_error_markers: Vec<String>,
    /// Abort a page when the share of malformed entries exceeds this ratio.
    /// `None` skips malformed entries and never aborts.
    pub max_malformed_ratio: Option<f64>,
}

impl Default for ParserPolicy {
    fn default() -> Self {
        Self {
            user_error_markers: vec!["\"user_error\"".to_string(), "\"syntax_error\"".to_string()],
            max_malformed_ratio: None,
        }
    }
}

/// Per-run behavior of the query engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Records processed per query.
    pub max_results: usize,
    /// Results requested per search page.
    pub page_size: u32,
    /// Concurrent detail/download pipelines.
    pub concurrency: usize,
    /// Report totals and first-page records only.
    pub count_only: bool,
    /// Attempts per artifact download, first try included.
    pub download_attempts: u32,
    /// Grace period for in-flight work after an interrupt.
    pub drain_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            count_only: false,
            download_attempts: 2,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_url_encodes_query() {
        let portal = PortalSettings::default();
        assert_eq!(
            portal.entry_url("TI=neural AND AB=pruning"),
            "https://patents.google.com/?q=TI%3Dneural%20AND%20AB%3Dpruning&hl=en"
        );
    }

    #[test]
    fn test_with_origin_strips_trailing_slash() {
        let portal = PortalSettings::with_origin("http://127.0.0.1:9999/");
        assert_eq!(portal.origin, "http://127.0.0.1:9999");
        assert_eq!(portal.search_path_marker, "/xhr/query");
    }

    #[test]
    fn test_retry_defaults_are_documented_values() {
        let retry = RetrySettings::default();
        assert_eq!(retry.block_base_delay, Duration::from_secs(2));
        assert_eq!(retry.block_max_delay, Duration::from_secs(60));
        assert_eq!(retry.network_attempts, 3);
        assert_eq!(retry.min_request_delay, Duration::from_millis(1000));
    }
}
