//! Per-host minimum spacing between requests.
//!
//! The spacing applies to every request, successful or not. Requests to
//! different hosts (portal vs. artifact storage) do not wait for each other.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Upper bound honored for a `Retry-After` value.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Enforces a minimum delay between requests to the same host.
#[derive(Debug)]
pub struct RequestPacer {
    min_delay: Duration,
    // Arc lets the DashMap shard lock drop before awaiting the inner Mutex.
    hosts: DashMap<String, Arc<Mutex<Option<Instant>>>>,
}

impl RequestPacer {
    /// Creates a pacer. A zero delay disables pacing.
    #[must_use]
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            hosts: DashMap::new(),
        }
    }

    /// Configured spacing.
    #[must_use]
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Waits until a request to `url`'s host may be sent, then claims the slot.
    ///
    /// The first request to a host goes out immediately.
    pub async fn acquire(&self, url: &str) {
        if self.min_delay.is_zero() {
            return;
        }
        let host = host_key(url);
        let slot = Arc::clone(
            self.hosts
                .entry(host.clone())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .value(),
        );

        let mut last = slot.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_delay;
            let now = Instant::now();
            if ready_at > now {
                let wait = ready_at - now;
                debug!(host = %host, wait_ms = wait.as_millis(), "pacing request");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
        trace!(host = %host, "request slot claimed");
    }
}

fn host_key(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.host_str()
                .map(|h| format!("{}:{}", h.to_ascii_lowercase(), u.port_or_known_default().unwrap_or(0)))
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a `Retry-After` header value (delta-seconds or HTTP-date).
///
/// Values above one hour are capped; dates in the past yield zero.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }
    match httpdate::parse_http_date(value) {
        Ok(at) => Some(
            at.duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO)
                .min(MAX_RETRY_AFTER),
        ),
        Err(_) => {
            warn!(value, "ignoring unparseable Retry-After header");
            None
        }
    }
}
