//! Browser cookies captured during the session bridge and their jar loading.

use std::fmt;
use std::sync::Arc;

use reqwest::cookie::Jar;
use serde::{Serialize, Serializer};
use tracing::{debug, instrument, warn};

/// One cookie read out of the browser after the search XHR was observed.
///
/// The value is redacted from `Debug` and serialized output so that
/// diagnostics and logs never carry session credentials.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct CapturedCookie {
    /// Cookie domain (leading dot allowed, e.g. `.google.com`).
    pub domain: String,
    /// Cookie name.
    pub name: String,
    #[serde(serialize_with = "redact")]
    value: String,
    /// URL path scope.
    pub path: String,
    /// HTTPS-only flag.
    pub secure: bool,
}

fn redact<S: Serializer>(_value: &str, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str("[REDACTED]")
}

impl CapturedCookie {
    /// Creates a cookie scoped to `/` on `domain`.
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            secure: true,
        }
    }

    /// Overrides the path scope.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Overrides the secure flag.
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Returns the cookie value. Avoid logging it.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for CapturedCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedCookie")
            .field("domain", &self.domain)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("path", &self.path)
            .field("secure", &self.secure)
            .finish()
    }
}

/// Loads captured cookies into a jar for `reqwest::ClientBuilder::cookie_provider`.
///
/// Cookies with an empty name or a domain that cannot form a URL are skipped.
#[instrument(level = "debug", skip(cookies), fields(count = cookies.len()))]
pub fn load_cookies_into_jar(cookies: &[CapturedCookie]) -> Arc<Jar> {
    let jar = Arc::new(Jar::default());

    for cookie in cookies {
        if cookie.name.is_empty() {
            warn!(domain = %cookie.domain, "skipping captured cookie without a name");
            continue;
        }
        match origin_url(cookie).parse::<url::Url>() {
            Ok(url) => {
                jar.add_cookie_str(&set_cookie_string(cookie), &url);
                debug!(domain = %cookie.domain, name = %cookie.name, "loaded cookie into jar");
            }
            Err(_) => {
                warn!(
                    domain = %cookie.domain,
                    name = %cookie.name,
                    "skipping cookie with unparseable domain"
                );
            }
        }
    }

    jar
}

fn set_cookie_string(cookie: &CapturedCookie) -> String {
    let mut parts = vec![
        format!("{}={}", cookie.name, cookie.value()),
        format!("Path={}", cookie.path),
    ];
    // Host-only cookies have no leading dot; adding Domain would widen them.
    if cookie.domain.starts_with('.') {
        parts.push(format!("Domain={}", cookie.domain));
    }
    if cookie.secure {
        parts.push("Secure".to_string());
    }
    parts.join("; ")
}

fn origin_url(cookie: &CapturedCookie) -> String {
    let scheme = if cookie.secure { "https" } else { "http" };
    let host = cookie.domain.strip_prefix('.').unwrap_or(&cookie.domain);
    format!("{scheme}://{host}{}", cookie.path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;

    #[test]
    fn test_captured_cookie_debug_redacts_value() {
        let cookie = CapturedCookie::new(".google.com", "NID", "secret-token");
        let rendered = format!("{cookie:?}");
        assert!(rendered.contains("NID"));
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("secret-token"));
    }

    #[test]
    fn test_captured_cookie_serialize_redacts_value() {
        let cookie = CapturedCookie::new("patents.google.com", "SID", "secret-token");
        let json = serde_json::to_string(&cookie).unwrap();
        assert!(json.contains("\"[REDACTED]\""));
        assert!(!json.contains("secret-token"));
    }

    #[test]
    fn test_load_cookies_into_jar_domain_cookie_matches_subdomain() {
        let cookies = vec![CapturedCookie::new(".google.com", "NID", "abc123")];
        let jar = load_cookies_into_jar(&cookies);

        let url = "https://patents.google.com/xhr/query".parse::<url::Url>().unwrap();
        let header = jar.cookies(&url).unwrap();
        assert!(header.to_str().unwrap().contains("NID=abc123"));
    }

    #[test]
    fn test_load_cookies_into_jar_host_only_cookie() {
        let cookies = vec![CapturedCookie::new("127.0.0.1", "SID", "v").with_secure(false)];
        let jar = load_cookies_into_jar(&cookies);

        let url = "http://127.0.0.1:8080/xhr/query".parse::<url::Url>().unwrap();
        let header = jar.cookies(&url).unwrap();
        assert_eq!(header.to_str().unwrap(), "SID=v");
    }

    #[test]
    fn test_load_cookies_into_jar_secure_cookie_not_sent_over_http() {
        let cookies = vec![CapturedCookie::new(".google.com", "NID", "abc")];
        let jar = load_cookies_into_jar(&cookies);

        let url = "http://patents.google.com/".parse::<url::Url>().unwrap();
        assert!(jar.cookies(&url).is_none());
    }

    #[test]
    fn test_load_cookies_into_jar_skips_nameless_cookie() {
        let cookies = vec![CapturedCookie::new(".google.com", "", "abc")];
        let jar = load_cookies_into_jar(&cookies);

        let url = "https://patents.google.com/".parse::<url::Url>().unwrap();
        assert!(jar.cookies(&url).is_none());
    }
}
