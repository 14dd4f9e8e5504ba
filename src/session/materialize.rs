//! Turns a [`CapturedSession`] into a pooled direct-HTTP client.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, REFERER, USER_AGENT};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::capture::{CapturedSession, RequestTemplate};
use super::cookies::load_cookies_into_jar;
use crate::config::HttpSettings;
use crate::user_agent::BROWSER_USER_AGENT;

/// Captured headers that must not be replayed verbatim.
const NON_REPLAYABLE_HEADERS: &[&str] = &[
    "cookie",
    "host",
    "content-length",
    "origin",
    "connection",
    "accept-encoding",
];

/// Page-token name fragments and the request header each is replayed as.
const TOKEN_HEADERS: &[(&str, &str)] = &[("xsrf", "x-xsrf-token"), ("csrf", "x-csrf-token")];

/// Failure to build an HTTP client from a captured session.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// The request template URL does not parse.
    #[error("captured request URL is invalid: {url}")]
    InvalidTemplate {
        /// Offending URL.
        url: String,
    },

    /// reqwest refused the client configuration.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// Underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

/// A reusable HTTP session bound to one captured snapshot.
///
/// Shared read-only by every in-flight request. Re-capture produces a new
/// value; this one is never mutated.
#[derive(Debug)]
pub struct ExecutionSession {
    client: Client,
    template: RequestTemplate,
    generation: u64,
    captured_at: SystemTime,
}

impl ExecutionSession {
    /// The pooled client carrying cookies and replay headers.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The observed search request.
    #[must_use]
    pub fn template(&self) -> &RequestTemplate {
        &self.template
    }

    /// Monotonic counter distinguishing successive captures.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Age of the underlying snapshot.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed().unwrap_or_default()
    }
}

/// Builds an [`ExecutionSession`]. Pure construction; no network traffic.
///
/// # Errors
///
/// Returns [`MaterializeError`] when the template URL is invalid or the
/// client cannot be built.
#[instrument(skip(captured, settings))]
pub fn materialize(
    captured: &CapturedSession,
    settings: &HttpSettings,
    generation: u64,
) -> Result<Arc<ExecutionSession>, MaterializeError> {
    if url::Url::parse(&captured.request_template.url).is_err() {
        return Err(MaterializeError::InvalidTemplate {
            url: captured.request_template.url.clone(),
        });
    }

    let jar = load_cookies_into_jar(&captured.cookies);
    let headers = replay_headers(captured);
    debug!(headers = headers.len(), cookies = captured.cookies.len(), "materializing session");

    let client = Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .pool_max_idle_per_host(settings.pool_max_idle_per_host)
        .gzip(true)
        .cookie_provider(jar)
        .default_headers(headers)
        .build()
        .map_err(|source| MaterializeError::Client { source })?;

    Ok(Arc::new(ExecutionSession {
        client,
        template: captured.request_template.clone(),
        generation,
        captured_at: captured.token_snapshot_time,
    }))
}

/// Default headers replayed on every request of the session.
fn replay_headers(captured: &CapturedSession) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in &captured.headers {
        if name.starts_with(':') || NON_REPLAYABLE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "skipping captured header that is not valid HTTP"),
        }
    }

    if !headers.contains_key(USER_AGENT) {
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    }
    if !headers.contains_key("x-same-domain") {
        headers.insert("x-same-domain", HeaderValue::from_static("1"));
    }
    if !headers.contains_key(REFERER)
        && let Ok(referer) = HeaderValue::from_str(&captured.entry_url)
    {
        headers.insert(REFERER, referer);
    }
    replay_page_tokens(captured, &mut headers);

    headers
}

/// Sends anti-forgery tokens read from the page, unless the observed
/// request already carried the header.
fn replay_page_tokens(captured: &CapturedSession, headers: &mut HeaderMap) {
    for (name, value) in &captured.page_tokens {
        let lowered = name.to_ascii_lowercase();
        let Some(&(_, header)) = TOKEN_HEADERS.iter().find(|&&(fragment, _)| lowered.contains(fragment)) else {
            continue;
        };
        if value.is_empty() || headers.contains_key(header) {
            continue;
        }
        match HeaderValue::from_str(value) {
            Ok(value) => {
                debug!(token = %name, header, "replaying page token");
                headers.insert(header, value);
            }
            Err(_) => warn!(token = %name, "skipping page token that is not a valid header value"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn captured(url: &str, headers: &[(&str, &str)]) -> CapturedSession {
        CapturedSession {
            entry_url: "https://patents.google.com/?q=x&hl=en".to_string(),
            cookies: Vec::new(),
            headers: headers
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
            page_tokens: BTreeMap::new(),
            token_snapshot_time: SystemTime::now(),
            request_template: RequestTemplate {
                url: url.to_string(),
                method: "GET".to_string(),
                body: None,
            },
        }
    }

    #[test]
    fn test_replay_headers_drops_non_replayable_and_pseudo_headers() {
        let session = captured(
            "https://patents.google.com/xhr/query?url=q%3Dx",
            &[
                ("cookie", "NID=1"),
                ("host", "patents.google.com"),
                (":authority", "patents.google.com"),
                ("accept-language", "en-US"),
                ("user-agent", "Mozilla/5.0 captured"),
            ],
        );
        let headers = replay_headers(&session);

        assert!(headers.get("cookie").is_none());
        assert!(headers.get("host").is_none());
        assert_eq!(headers.get("accept-language").unwrap(), "en-US");
        assert_eq!(headers.get(USER_AGENT).unwrap(), "Mozilla/5.0 captured");
    }

    #[test]
    fn test_replay_headers_fills_required_defaults() {
        let headers = replay_headers(&captured("https://patents.google.com/xhr/query", &[]));

        assert_eq!(headers.get(USER_AGENT).unwrap(), BROWSER_USER_AGENT);
        assert_eq!(headers.get("x-same-domain").unwrap(), "1");
        assert_eq!(
            headers.get(REFERER).unwrap(),
            "https://patents.google.com/?q=x&hl=en"
        );
    }

    #[test]
    fn test_replay_headers_carries_page_tokens() {
        let mut session = captured("https://patents.google.com/xhr/query", &[("x-csrf-token", "observed")]);
        session.page_tokens.insert("xsrf-token".to_string(), "abc123".to_string());
        session.page_tokens.insert("csrf_token".to_string(), "from-page".to_string());
        session.page_tokens.insert("session-hint".to_string(), "ignored".to_string());
        session.page_tokens.insert("XSRF-empty".to_string(), String::new());

        let headers = replay_headers(&session);

        assert_eq!(headers.get("x-xsrf-token").unwrap(), "abc123");
        assert_eq!(headers.get("x-csrf-token").unwrap(), "observed");
        assert!(headers.get("session-hint").is_none());
    }

    #[test]
    fn test_replay_headers_skips_invalid_values() {
        let headers = replay_headers(&captured(
            "https://patents.google.com/xhr/query",
            &[("x-bad", "line\nbreak")],
        ));
        assert!(headers.get("x-bad").is_none());
    }

    #[test]
    fn test_materialize_rejects_invalid_template() {
        let err = materialize(&captured("not a url", &[]), &HttpSettings::default(), 1).unwrap_err();
        assert!(matches!(err, MaterializeError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_materialize_keeps_template_and_generation() {
        let session =
            materialize(&captured("https://patents.google.com/xhr/query?url=q%3Dx", &[]), &HttpSettings::default(), 7)
                .unwrap();
        assert_eq!(session.generation(), 7);
        assert_eq!(session.template().method, "GET");
        assert!(session.age() < Duration::from_secs(5));
    }
}
