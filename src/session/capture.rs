//! One-shot session capture through a browser collaborator.
//!
//! The browser is driven just long enough to observe the first outbound
//! search XHR. The request's URL, method and headers, the cookie jar and any
//! page-embedded tokens are copied into an immutable [`CapturedSession`];
//! the browser is released afterwards.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::cookies::CapturedCookie;
use crate::diagnostics::DiagnosticsRecorder;

/// Why a capture attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureReason {
    /// The browser could not reach the entry page.
    Network,
    /// The hard capture budget elapsed.
    Timeout,
    /// The page loaded but no request matched the search shape.
    NoMatchingRequest,
    /// The browser failed to launch or died mid-capture.
    BrowserCrash,
}

impl CaptureReason {
    /// Short machine-readable code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::NoMatchingRequest => "no-matching-request",
            Self::BrowserCrash => "browser-crash",
        }
    }
}

/// Failure to obtain a usable session from the browser.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    /// Navigation to the entry page failed.
    #[error("[capture:network] could not load {entry_url}: {message}")]
    Network {
        /// Page the browser was sent to.
        entry_url: String,
        /// Driver-reported cause.
        message: String,
    },

    /// Capture exceeded its budget.
    #[error("[capture:timeout] no search request observed from {entry_url} within {budget:?}")]
    Timeout {
        /// Page the browser was sent to.
        entry_url: String,
        /// Budget that elapsed.
        budget: Duration,
    },

    /// The page never issued a request matching the search shape.
    #[error("[capture:no-matching-request] {entry_url} issued no request containing '{pattern}'")]
    NoMatchingRequest {
        /// Page the browser was sent to.
        entry_url: String,
        /// Substring that was being waited for.
        pattern: String,
    },

    /// The browser could not be launched or crashed.
    #[error("[capture:browser-crash] {message}")]
    BrowserCrash {
        /// Driver-reported cause.
        message: String,
    },
}

impl CaptureError {
    /// Creates a network error.
    pub fn network(entry_url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            entry_url: entry_url.into(),
            message: message.into(),
        }
    }

    /// Creates a browser-crash error.
    pub fn browser_crash(message: impl Into<String>) -> Self {
        Self::BrowserCrash {
            message: message.into(),
        }
    }

    /// Creates a no-matching-request error.
    pub fn no_matching_request(entry_url: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::NoMatchingRequest {
            entry_url: entry_url.into(),
            pattern: pattern.into(),
        }
    }

    /// Reason code for reporting.
    #[must_use]
    pub fn reason(&self) -> CaptureReason {
        match self {
            Self::Network { .. } => CaptureReason::Network,
            Self::Timeout { .. } => CaptureReason::Timeout,
            Self::NoMatchingRequest { .. } => CaptureReason::NoMatchingRequest,
            Self::BrowserCrash { .. } => CaptureReason::BrowserCrash,
        }
    }
}

/// Shape of the observed outbound search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestTemplate {
    /// Full request URL including the captured query string.
    pub url: String,
    /// HTTP method, upper case.
    pub method: String,
    /// Request body for non-GET searches.
    pub body: Option<String>,
}

/// What a browser driver hands back after observing the search XHR.
#[derive(Debug, Clone, Default)]
pub struct BrowserObservation {
    /// URL of the matching request.
    pub request_url: String,
    /// Method of the matching request.
    pub request_method: String,
    /// Headers of the matching request, any case.
    pub request_headers: Vec<(String, String)>,
    /// Body of the matching request, if any.
    pub request_body: Option<String>,
    /// Browser cookies after the request was issued.
    pub cookies: Vec<CapturedCookie>,
    /// Tokens read out of page state.
    pub page_tokens: BTreeMap<String, String>,
    /// Page HTML at capture time, kept for diagnostics only.
    pub page_html: Option<String>,
}

/// Browser-automation collaborator.
///
/// Implementations navigate to `entry_url`, wait for the first request whose
/// URL contains `pattern`, and read the browser's cookies. The core does not
/// depend on any particular automation protocol beyond that.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Observes one matching request.
    async fn observe(
        &self,
        entry_url: &str,
        pattern: &str,
        budget: Duration,
    ) -> Result<BrowserObservation, CaptureError>;
}

/// Anything that can produce a fresh [`CapturedSession`] on demand.
///
/// The executor holds one of these to re-capture after a session expiry.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Produces a new session snapshot.
    async fn capture(&self) -> Result<CapturedSession, CaptureError>;
}

/// Immutable snapshot of a browser-issued session.
#[derive(Debug, Clone, Serialize)]
pub struct CapturedSession {
    /// Page the browser was pointed at.
    pub entry_url: String,
    /// Browser cookies (values redacted when serialized).
    pub cookies: Vec<CapturedCookie>,
    /// Lower-cased request headers of the observed search request.
    pub headers: BTreeMap<String, String>,
    /// Tokens embedded in page state.
    pub page_tokens: BTreeMap<String, String>,
    /// When the snapshot was taken.
    pub token_snapshot_time: SystemTime,
    /// The observed search request.
    pub request_template: RequestTemplate,
}

impl CapturedSession {
    /// Time elapsed since the snapshot. Zero if the clock went backwards.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.token_snapshot_time.elapsed().unwrap_or_default()
    }

    /// Header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    fn from_observation(entry_url: &str, observation: BrowserObservation) -> Self {
        let headers = observation
            .request_headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        let method = if observation.request_method.is_empty() {
            "GET".to_string()
        } else {
            observation.request_method.to_ascii_uppercase()
        };

        Self {
            entry_url: entry_url.to_string(),
            cookies: observation.cookies,
            headers,
            page_tokens: observation.page_tokens,
            token_snapshot_time: SystemTime::now(),
            request_template: RequestTemplate {
                url: observation.request_url,
                method,
                body: observation.request_body,
            },
        }
    }
}

/// Drives a [`BrowserDriver`] under a hard timeout and validates the result.
pub struct SessionCapturer<D> {
    driver: D,
    entry_url: String,
    pattern: String,
    budget: Duration,
    diagnostics: DiagnosticsRecorder,
    diagnostics_label: String,
}

impl<D: BrowserDriver> SessionCapturer<D> {
    /// Creates a capturer that re-uses `entry_url` and `budget` for every
    /// capture issued through [`SessionSource`].
    pub fn new(
        driver: D,
        entry_url: impl Into<String>,
        pattern: impl Into<String>,
        budget: Duration,
    ) -> Self {
        Self {
            driver,
            entry_url: entry_url.into(),
            pattern: pattern.into(),
            budget,
            diagnostics: DiagnosticsRecorder::disabled(),
            diagnostics_label: String::new(),
        }
    }

    /// Writes captured payloads under `label` when `recorder` is enabled.
    #[must_use]
    pub fn with_diagnostics(mut self, recorder: DiagnosticsRecorder, label: impl Into<String>) -> Self {
        self.diagnostics = recorder;
        self.diagnostics_label = label.into();
        self
    }

    /// Captures a session from `entry_url` within `budget`.
    ///
    /// # Errors
    ///
    /// Returns a [`CaptureError`] carrying a reason code when the browser
    /// could not produce a matching request in time.
    #[instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn capture_at(
        &self,
        entry_url: &str,
        budget: Duration,
    ) -> Result<CapturedSession, CaptureError> {
        info!("capturing portal session");
        let observed = tokio::time::timeout(
            budget,
            self.driver.observe(entry_url, &self.pattern, budget),
        )
        .await;

        let observation = match observed {
            Ok(Ok(observation)) => observation,
            Ok(Err(e)) => {
                warn!(reason = e.reason().as_str(), error = %e, "session capture failed");
                return Err(e);
            }
            Err(_) => {
                warn!(budget_ms = budget.as_millis(), "session capture timed out");
                return Err(CaptureError::Timeout {
                    entry_url: entry_url.to_string(),
                    budget,
                });
            }
        };

        if observation.request_url.is_empty() || !observation.request_url.contains(&self.pattern) {
            return Err(CaptureError::no_matching_request(entry_url, &self.pattern));
        }

        let page_html = observation.page_html.clone();
        let session = CapturedSession::from_observation(entry_url, observation);
        debug!(
            cookies = session.cookies.len(),
            headers = session.headers.len(),
            tokens = session.page_tokens.len(),
            method = %session.request_template.method,
            "captured search request"
        );
        self.record_diagnostics(&session, page_html);
        Ok(session)
    }

    fn record_diagnostics(&self, session: &CapturedSession, page_html: Option<String>) {
        if !self.diagnostics.is_enabled() {
            return;
        }
        match serde_json::to_vec_pretty(session) {
            Ok(json) => self.diagnostics.record_in_background(
                &self.diagnostics_label,
                "captured_session.json",
                json,
            ),
            Err(e) => warn!(error = %e, "could not serialize captured session"),
        }
        if let Some(html) = page_html {
            self.diagnostics.record_in_background(
                &self.diagnostics_label,
                "entry_page.html",
                html.into_bytes(),
            );
        }
    }
}

#[async_trait]
impl<D: BrowserDriver> SessionSource for SessionCapturer<D> {
    async fn capture(&self) -> Result<CapturedSession, CaptureError> {
        self.capture_at(&self.entry_url, self.budget).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FakeDriver {
        outcome: Result<BrowserObservation, CaptureError>,
        delay: Duration,
    }

    #[async_trait]
    impl BrowserDriver for FakeDriver {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn observe(
            &self,
            _entry_url: &str,
            _pattern: &str,
            _budget: Duration,
        ) -> Result<BrowserObservation, CaptureError> {
            tokio::time::sleep(self.delay).await;
            self.outcome.clone()
        }
    }

    fn observation() -> BrowserObservation {
        BrowserObservation {
            request_url: "https://patents.google.com/xhr/query?url=q%3Dx&exp=".to_string(),
            request_method: "get".to_string(),
            request_headers: vec![
                ("User-Agent".to_string(), "Mozilla/5.0 test".to_string()),
                ("X-Same-Domain".to_string(), "1".to_string()),
            ],
            request_body: None,
            cookies: vec![CapturedCookie::new(".google.com", "NID", "secret")],
            page_tokens: BTreeMap::from([("xsrf".to_string(), "tok".to_string())]),
            page_html: Some("<html></html>".to_string()),
        }
    }

    fn capturer(outcome: Result<BrowserObservation, CaptureError>, delay: Duration) -> SessionCapturer<FakeDriver> {
        SessionCapturer::new(
            FakeDriver { outcome, delay },
            "https://patents.google.com/?q=x&hl=en",
            "/xhr/query",
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_capture_builds_session_from_observation() {
        let session = capturer(Ok(observation()), Duration::ZERO)
            .capture()
            .await
            .unwrap();

        assert_eq!(session.request_template.method, "GET");
        assert!(session.request_template.url.contains("/xhr/query"));
        assert_eq!(session.header("user-agent"), Some("Mozilla/5.0 test"));
        assert_eq!(session.header("X-SAME-DOMAIN"), Some("1"));
        assert_eq!(session.cookies.len(), 1);
        assert_eq!(session.page_tokens.get("xsrf").unwrap(), "tok");
        assert!(session.age() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_capture_times_out_with_reason_code() {
        let capturer = capturer(Ok(observation()), Duration::from_secs(10));
        let err = capturer
            .capture_at("https://patents.google.com/", Duration::from_millis(20))
            .await
            .unwrap_err();

        assert_eq!(err.reason(), CaptureReason::Timeout);
        assert!(err.to_string().contains("[capture:timeout]"));
    }

    #[tokio::test]
    async fn test_capture_propagates_driver_navigation_error() {
        let err = capturer(
            Err(CaptureError::network("https://patents.google.com/", "net::ERR_NAME_NOT_RESOLVED")),
            Duration::ZERO,
        )
        .capture()
        .await
        .unwrap_err();

        assert_eq!(err.reason(), CaptureReason::Network);
        assert_eq!(err.reason().as_str(), "network");
    }

    #[tokio::test]
    async fn test_capture_rejects_non_matching_request() {
        let mut obs = observation();
        obs.request_url = "https://patents.google.com/static/app.js".to_string();
        let err = capturer(Ok(obs), Duration::ZERO).capture().await.unwrap_err();

        assert_eq!(err.reason(), CaptureReason::NoMatchingRequest);
    }

    #[tokio::test]
    async fn test_capture_records_redacted_diagnostics() {
        let temp = TempDir::new().unwrap();
        let recorder = DiagnosticsRecorder::new(temp.path());
        let capturer = capturer(Ok(observation()), Duration::ZERO)
            .with_diagnostics(recorder.clone(), "TI=x");

        capturer.capture().await.unwrap();

        let file = recorder.query_dir("TI=x").unwrap().join("captured_session.json");
        let mut body = None;
        for _ in 0..100 {
            if let Ok(text) = std::fs::read_to_string(&file)
                && serde_json::from_str::<serde_json::Value>(&text).is_ok()
            {
                body = Some(text);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let body = body.unwrap();
        assert!(body.contains("NID"));
        assert!(!body.contains("secret"));
    }

    #[test]
    fn test_capture_reason_codes() {
        assert_eq!(CaptureReason::BrowserCrash.as_str(), "browser-crash");
        assert_eq!(CaptureReason::NoMatchingRequest.as_str(), "no-matching-request");
    }
}
