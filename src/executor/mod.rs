//! Request execution with retry, backoff and session recovery.
//!
//! Every portal request (search page, detail page, artifact download) goes
//! through [`RequestExecutor::execute`], which applies the same policy:
//!
//! - 429, or 403/503 with a block signature: exponential backoff shared by
//!   all in-flight requests, up to a bounded number of block signals.
//! - Transport errors and plain 5xx: bounded retry with linear backoff.
//! - 401, or 403 without a block signature: one re-capture of the session,
//!   then exactly one more try. A second such failure is returned.
//! - Any successful response clears the backoff state.
//!
//! A per-host minimum delay applies before every attempt.

pub mod backoff;
pub mod classify;
pub mod error;
pub mod pacer;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::{Method, Response};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub use backoff::{BackoffPolicy, BackoffState};
pub use classify::{ResponseClass, classify_response};
pub use error::{ExecutorError, ExecutorErrorKind};
pub use pacer::{RequestPacer, parse_retry_after};

use crate::config::RetrySettings;
use crate::search::{SearchSpec, build_search_url};
use crate::session::{ExecutionSession, SessionHandle};

/// Maximum body bytes kept from a failed response for classification.
const ERROR_BODY_SNIPPET: usize = 4096;

/// What a request is for. Used in logs and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPurpose {
    /// A search results page.
    Search,
    /// A patent detail page.
    Detail,
    /// A PDF download.
    Artifact,
}

/// Where a request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
    /// A fixed absolute URL.
    Url(String),
    /// A search page, built from whichever session sends it.
    Search(SearchSpec),
}

/// A request in session-independent form.
#[derive(Debug, Clone)]
pub struct PortalRequest {
    /// Destination.
    pub target: RequestTarget,
    /// Per-request headers on top of the session's defaults.
    pub headers: Vec<(String, String)>,
    /// Overrides the client's request timeout.
    pub timeout: Option<Duration>,
    /// Category for logs.
    pub purpose: RequestPurpose,
}

impl PortalRequest {
    /// GET of a fixed URL.
    #[must_use]
    pub fn get(url: impl Into<String>, purpose: RequestPurpose) -> Self {
        Self {
            target: RequestTarget::Url(url.into()),
            headers: Vec::new(),
            timeout: None,
            purpose,
        }
    }

    /// A search page request replaying the captured method and body.
    #[must_use]
    pub fn search(spec: SearchSpec) -> Self {
        Self {
            target: RequestTarget::Search(spec),
            headers: Vec::new(),
            timeout: None,
            purpose: RequestPurpose::Search,
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets a per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn describe(&self) -> String {
        match &self.target {
            RequestTarget::Url(url) => url.clone(),
            RequestTarget::Search(spec) => format!("search '{}' page {}", spec.query, spec.page_index),
        }
    }
}

/// A fully read text response.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects.
    pub final_url: String,
    /// `Content-Type` header, if any.
    pub content_type: Option<String>,
    /// Decoded body.
    pub body: String,
}

/// Counters for the run summary.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    requests: AtomicUsize,
    block_signals: AtomicUsize,
    transient_retries: AtomicUsize,
}

impl ExecutorStats {
    /// Requests put on the wire.
    #[must_use]
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Block signals received.
    #[must_use]
    pub fn block_signals(&self) -> usize {
        self.block_signals.load(Ordering::SeqCst)
    }

    /// Retries after transport failures or 5xx.
    #[must_use]
    pub fn transient_retries(&self) -> usize {
        self.transient_retries.load(Ordering::SeqCst)
    }
}

/// Issues requests through the active session.
///
/// The only owner of [`BackoffState`]; every call site feeds it through here.
#[derive(Debug)]
pub struct RequestExecutor {
    sessions: Arc<SessionHandle>,
    pacer: RequestPacer,
    policy: BackoffPolicy,
    backoff: Mutex<BackoffState>,
    network_attempts: u32,
    network_retry_step: Duration,
    stats: ExecutorStats,
}

impl RequestExecutor {
    /// Creates an executor over `sessions`.
    #[must_use]
    pub fn new(sessions: Arc<SessionHandle>, settings: &RetrySettings) -> Self {
        Self {
            sessions,
            pacer: RequestPacer::new(settings.min_request_delay),
            policy: BackoffPolicy::from_settings(settings),
            backoff: Mutex::new(BackoffState::default()),
            network_attempts: settings.network_attempts.max(1),
            network_retry_step: settings.network_retry_step,
            stats: ExecutorStats::default(),
        }
    }

    /// The session handle, for re-capture counts.
    #[must_use]
    pub fn sessions(&self) -> &SessionHandle {
        &self.sessions
    }

    /// Request counters.
    #[must_use]
    pub fn stats(&self) -> &ExecutorStats {
        &self.stats
    }

    /// Consecutive block signals not yet cleared by a success.
    pub async fn consecutive_blocks(&self) -> u32 {
        self.backoff.lock().await.consecutive()
    }

    /// Sends `request` and returns the first successful response.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] once the retry policy for the failure
    /// class is exhausted.
    #[instrument(skip(self, request), fields(purpose = ?request.purpose, target = %request.describe()))]
    pub async fn execute(&self, request: &PortalRequest) -> Result<Response, ExecutorError> {
        let mut attempt = Attempt {
            session: self.sessions.current().await,
            transient_failures: 0,
            block_signals: 0,
            recaptured: false,
        };

        loop {
            let url = resolve_target(&request.target, &attempt.session)?;
            self.wait_for_backoff().await;
            self.pacer.acquire(&url).await;

            self.stats.requests.fetch_add(1, Ordering::SeqCst);
            let sent = build_request(&attempt.session, request, &url).send().await;

            let response = match sent {
                Ok(response) => response,
                Err(e) if e.is_builder() => {
                    return Err(ExecutorError::invalid_request(url, e.to_string()));
                }
                Err(e) => {
                    attempt.transient_failures += 1;
                    if attempt.transient_failures >= self.network_attempts {
                        warn!(url = %url, attempts = attempt.transient_failures, error = %e, "network retries exhausted");
                        return Err(ExecutorError::network(url, attempt.transient_failures, e.to_string()));
                    }
                    self.sleep_linear(attempt.transient_failures, &url, &e.to_string()).await;
                    continue;
                }
            };

            let status = response.status();
            let final_url = response.url().to_string();
            let failure = if status.is_success() {
                match classify_response(status, &final_url, "") {
                    ResponseClass::Success => {
                        self.backoff.lock().await.reset();
                        debug!(status = status.as_u16(), "request succeeded");
                        return Ok(response);
                    }
                    class => Failure {
                        class,
                        status: status.as_u16(),
                        retry_after: None,
                    },
                }
            } else {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                let body = error_body_snippet(response).await;
                Failure {
                    class: classify_response(status, &final_url, &body),
                    status: status.as_u16(),
                    retry_after,
                }
            };

            match self.on_failure(failure, &url, &mut attempt).await {
                Next::Retry => {}
                Next::Fail(err) => return Err(err),
            }
        }
    }

    /// Like [`execute`](Self::execute), reading the whole body as text.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] when the request fails or the body cannot
    /// be read.
    pub async fn fetch_text(&self, request: &PortalRequest) -> Result<FetchedPage, ExecutorError> {
        let response = self.execute(request).await?;
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| ExecutorError::network(&final_url, 1, format!("failed to read body: {e}")))?;
        Ok(FetchedPage {
            final_url,
            content_type,
            body,
        })
    }

    /// Applies the policy for one failed attempt.
    async fn on_failure(&self, failure: Failure, url: &str, attempt: &mut Attempt) -> Next {
        let Failure {
            class,
            status,
            retry_after,
        } = failure;

        match class {
            ResponseClass::Blocked => {
                attempt.block_signals += 1;
                self.stats.block_signals.fetch_add(1, Ordering::SeqCst);
                if attempt.block_signals > self.policy.max_retries() {
                    warn!(url, status, attempts = attempt.block_signals, "block backoff exhausted");
                    return Next::Fail(ExecutorError::RateLimited {
                        url: url.to_string(),
                        status,
                        attempts: attempt.block_signals,
                    });
                }
                let delay = self.backoff.lock().await.record_block(&self.policy, retry_after);
                warn!(url, status, delay_ms = delay.as_millis(), "portal block signal; backing off");
                Next::Retry
            }
            ResponseClass::SessionExpired => {
                if attempt.recaptured {
                    warn!(url, status, "authorization failed again after re-capture");
                    return Next::Fail(ExecutorError::SessionExpired {
                        url: url.to_string(),
                        status,
                    });
                }
                attempt.recaptured = true;
                info!(url, status, generation = attempt.session.generation(), "session rejected; re-capturing");
                match self.sessions.refresh(attempt.session.generation()).await {
                    Ok(fresh) => {
                        attempt.session = fresh;
                        Next::Retry
                    }
                    Err(source) => Next::Fail(ExecutorError::Recapture {
                        url: url.to_string(),
                        source,
                    }),
                }
            }
            ResponseClass::Transient => {
                attempt.transient_failures += 1;
                if attempt.transient_failures >= self.network_attempts {
                    return Next::Fail(ExecutorError::Network {
                        url: url.to_string(),
                        attempts: attempt.transient_failures,
                        message: format!("HTTP {status}"),
                        status: Some(status),
                    });
                }
                self.sleep_linear(attempt.transient_failures, url, &format!("HTTP {status}"))
                    .await;
                Next::Retry
            }
            ResponseClass::Permanent | ResponseClass::Success => Next::Fail(ExecutorError::HttpStatus {
                url: url.to_string(),
                status,
            }),
        }
    }

    async fn wait_for_backoff(&self) {
        let resume_at = self.backoff.lock().await.resume_at();
        if let Some(at) = resume_at
            && at > tokio::time::Instant::now()
        {
            tokio::time::sleep_until(at).await;
        }
    }

    async fn sleep_linear(&self, attempt: u32, url: &str, cause: &str) {
        self.stats.transient_retries.fetch_add(1, Ordering::SeqCst);
        let delay = self.network_retry_step * attempt;
        debug!(url, attempt, delay_ms = delay.as_millis(), cause, "retrying after transient failure");
        tokio::time::sleep(delay).await;
    }
}

/// Per-call retry bookkeeping.
struct Attempt {
    session: Arc<ExecutionSession>,
    transient_failures: u32,
    block_signals: u32,
    recaptured: bool,
}

struct Failure {
    class: ResponseClass,
    status: u16,
    retry_after: Option<Duration>,
}

enum Next {
    Retry,
    Fail(ExecutorError),
}

fn resolve_target(target: &RequestTarget, session: &ExecutionSession) -> Result<String, ExecutorError> {
    match target {
        RequestTarget::Url(url) => {
            url::Url::parse(url).map_err(|e| ExecutorError::invalid_request(url, e.to_string()))?;
            Ok(url.clone())
        }
        RequestTarget::Search(spec) => build_search_url(session.template(), spec)
            .map_err(|e| ExecutorError::invalid_request(&session.template().url, e.to_string())),
    }
}

fn build_request(session: &ExecutionSession, request: &PortalRequest, url: &str) -> reqwest::RequestBuilder {
    let (method, body) = match &request.target {
        RequestTarget::Search(_) => (
            Method::from_bytes(session.template().method.as_bytes()).unwrap_or(Method::GET),
            session.template().body.clone(),
        ),
        RequestTarget::Url(_) => (Method::GET, None),
    };

    let mut builder = session.client().request(method, url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = body {
        builder = builder.body(body);
    }
    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }
    builder
}

async fn error_body_snippet(response: Response) -> String {
    match response.text().await {
        Ok(mut text) => {
            if text.len() > ERROR_BODY_SNIPPET {
                let mut cut = ERROR_BODY_SNIPPET;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
            text
        }
        Err(_) => String::new(),
    }
}
