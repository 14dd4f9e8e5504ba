//! Chromium-backed [`BrowserDriver`] built on the DevTools protocol.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::EventRequestWillBeSent;
use chromiumoxide::page::Page;
use futures_util::{Stream, StreamExt};
use tracing::{debug, instrument, warn};

use super::capture::{BrowserDriver, BrowserObservation, CaptureError};
use super::cookies::CapturedCookie;

/// Script returning token-looking values from page state as a flat map.
const PAGE_TOKEN_SCRIPT: &str = r"(() => {
    const out = {};
    for (const meta of document.querySelectorAll('meta[name]')) {
        const name = meta.getAttribute('name') || '';
        if (/token|xsrf|csrf/i.test(name)) { out[name] = meta.getAttribute('content') || ''; }
    }
    return out;
})()";

/// Buttons that accept a cookie-consent interstitial, tried in order.
const CONSENT_SELECTORS: &[&str] = &["#L2AGLb", "#introAgreeButton", "form[action*='consent'] button"];

/// Share of the budget spent waiting before the entry page is loaded again.
fn first_pass_budget(budget: Duration) -> Duration {
    budget / 2
}

/// Launches a local Chromium for each capture and closes it afterwards.
#[derive(Debug, Clone, Default)]
pub struct ChromiumDriver {
    headless: bool,
    executable: Option<PathBuf>,
}

impl ChromiumDriver {
    /// Creates a driver. Headed unless `headless` is set.
    #[must_use]
    pub fn new(headless: bool) -> Self {
        Self {
            headless,
            executable: None,
        }
    }

    /// Uses a specific Chrome/Chromium binary instead of auto-detection.
    #[must_use]
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    fn config(&self) -> Result<BrowserConfig, CaptureError> {
        let mut builder = BrowserConfig::builder()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--lang=en-US");
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        builder
            .build()
            .map_err(|e| CaptureError::browser_crash(format!("invalid browser config: {e}")))
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    fn name(&self) -> &'static str {
        "chromium"
    }

    #[instrument(skip(self), fields(headless = self.headless))]
    async fn observe(
        &self,
        entry_url: &str,
        pattern: &str,
        budget: Duration,
    ) -> Result<BrowserObservation, CaptureError> {
        let (mut browser, mut handler) = Browser::launch(self.config()?)
            .await
            .map_err(|e| CaptureError::browser_crash(format!("failed to launch Chromium: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let outcome = tokio::time::timeout(budget, observe_on_page(&browser, entry_url, pattern, budget))
            .await
            .unwrap_or_else(|_| {
                Err(CaptureError::Timeout {
                    entry_url: entry_url.to_string(),
                    budget,
                })
            });

        if let Err(e) = browser.close().await {
            debug!(error = %e, "browser close reported an error");
        }
        handler_task.abort();
        outcome
    }
}

async fn observe_on_page(
    browser: &Browser,
    entry_url: &str,
    pattern: &str,
    budget: Duration,
) -> Result<BrowserObservation, CaptureError> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| CaptureError::browser_crash(format!("failed to open page: {e}")))?;

    let mut requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(|e| CaptureError::browser_crash(format!("failed to watch network: {e}")))?;

    navigate(&page, entry_url).await?;
    if dismiss_consent(&page).await {
        navigate(&page, entry_url).await?;
    }

    let first_pass = tokio::time::timeout(first_pass_budget(budget), next_search_request(&mut requests, pattern)).await;
    let event = match first_pass {
        Ok(event) => event,
        Err(_) => {
            debug!("no search request yet, loading entry page again");
            dismiss_consent(&page).await;
            navigate(&page, entry_url).await?;
            next_search_request(&mut requests, pattern).await
        }
    }
    .ok_or_else(|| CaptureError::no_matching_request(entry_url, pattern))?;

    debug!(url = %event.request.url, "observed search request");
    let mut observation = BrowserObservation {
        request_url: event.request.url.clone(),
        request_method: event.request.method.clone(),
        request_headers: header_pairs(&event.request.headers),
        ..BrowserObservation::default()
    };

    observation.cookies = read_cookies(&page).await?;
    observation.page_tokens = read_page_tokens(&page).await;
    observation.page_html = page.content().await.ok();
    Ok(observation)
}

async fn navigate(page: &Page, url: &str) -> Result<(), CaptureError> {
    page.goto(url)
        .await
        .map_err(|e| CaptureError::network(url, e.to_string()))?;
    Ok(())
}

async fn next_search_request<S>(requests: &mut S, pattern: &str) -> Option<Arc<EventRequestWillBeSent>>
where
    S: Stream<Item = Arc<EventRequestWillBeSent>> + Unpin,
{
    while let Some(event) = requests.next().await {
        if event.request.url.contains(pattern) {
            return Some(event);
        }
    }
    None
}

/// Clicks the first consent button present. Returns whether one was clicked.
async fn dismiss_consent(page: &Page) -> bool {
    for selector in CONSENT_SELECTORS {
        let Ok(button) = page.find_element(*selector).await else {
            continue;
        };
        match button.click().await {
            Ok(_) => {
                debug!(selector, "dismissed consent interstitial");
                return true;
            }
            Err(e) => debug!(selector, error = %e, "consent button not clickable"),
        }
    }
    false
}

fn header_pairs(headers: &impl serde::Serialize) -> Vec<(String, String)> {
    let Ok(serde_json::Value::Object(map)) = serde_json::to_value(headers) else {
        return Vec::new();
    };
    map.into_iter()
        .filter_map(|(name, value)| match value {
            serde_json::Value::String(s) => Some((name, s)),
            _ => None,
        })
        .collect()
}

async fn read_cookies(page: &Page) -> Result<Vec<CapturedCookie>, CaptureError> {
    let cookies = page
        .get_cookies()
        .await
        .map_err(|e| CaptureError::browser_crash(format!("failed to read cookies: {e}")))?;
    Ok(cookies
        .into_iter()
        .map(|c| {
            CapturedCookie::new(c.domain, c.name, c.value)
                .with_path(c.path)
                .with_secure(c.secure)
        })
        .collect())
}

async fn read_page_tokens(page: &Page) -> BTreeMap<String, String> {
    match page.evaluate(PAGE_TOKEN_SCRIPT).await {
        Ok(result) => result.into_value().unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "could not read page tokens");
            BTreeMap::new()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_header_pairs_keeps_string_values() {
        let headers = serde_json::json!({
            "User-Agent": "Mozilla/5.0",
            "X-Same-Domain": "1",
            "X-Weird": 3
        });
        let mut pairs = header_pairs(&headers);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("User-Agent".to_string(), "Mozilla/5.0".to_string()),
                ("X-Same-Domain".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_header_pairs_non_object_is_empty() {
        assert!(header_pairs(&serde_json::json!("x")).is_empty());
    }

    #[test]
    fn test_consent_selectors_cover_known_interstitials() {
        assert_eq!(CONSENT_SELECTORS[0], "#L2AGLb");
        assert!(CONSENT_SELECTORS.contains(&"#introAgreeButton"));
        assert!(CONSENT_SELECTORS.contains(&"form[action*='consent'] button"));
    }

    #[test]
    fn test_first_pass_leaves_time_for_second_navigation() {
        let budget = Duration::from_secs(60);
        let first = first_pass_budget(budget);
        assert!(first > Duration::ZERO);
        assert!(first < budget);
    }

    #[tokio::test]
    #[ignore = "requires a local Chromium and network access"]
    async fn test_chromium_driver_captures_portal_search() {
        let driver = ChromiumDriver::new(true);
        let observation = driver
            .observe(
                "https://patents.google.com/?q=TI%3Dneural&hl=en",
                "/xhr/query",
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert!(observation.request_url.contains("/xhr/query"));
    }
}
