//! Exponential backoff for portal block signals.
//!
//! # Delay Calculation
//!
//! ```text
//! delay(n) = min(base * 2^(n - 1), cap)        n = consecutive block signals
//! wait     = max(delay(n) + jitter, Retry-After)
//! ```
//!
//! With the defaults (2 s base, 60 s cap) successive blocks wait roughly
//! 2 s, 4 s, 8 s, 16 s, 32 s, 60 s. Any successful response resets the count.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RetrySettings;

/// Constants of the block backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
    jitter: Duration,
    max_retries: u32,
}

impl BackoffPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(base: Duration, cap: Duration, jitter: Duration, max_retries: u32) -> Self {
        Self {
            base,
            cap: cap.max(base),
            jitter,
            max_retries,
        }
    }

    /// Policy taken from executor settings.
    #[must_use]
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings.block_base_delay,
            settings.block_max_delay,
            settings.jitter,
            settings.max_block_retries,
        )
    }

    /// Deterministic delay after `consecutive` block signals (1-based).
    #[must_use]
    pub fn delay_for(&self, consecutive: u32) -> Duration {
        if consecutive == 0 {
            return Duration::ZERO;
        }
        let exponent = (consecutive - 1).min(31);
        self.base
            .checked_mul(1_u32 << exponent)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Block signals tolerated for one request.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[allow(clippy::cast_possible_truncation)]
    fn jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = self.jitter.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

/// Consecutive block signals and the instant traffic may resume.
///
/// Owned by the request executor; every request waits for
/// [`resume_at`](Self::resume_at) before going out.
#[derive(Debug, Default)]
pub struct BackoffState {
    consecutive: u32,
    first_signal: Option<Instant>,
    last_signal: Option<Instant>,
    resume_at: Option<Instant>,
}

impl BackoffState {
    /// Records a block signal and returns the wait it imposes.
    pub fn record_block(&mut self, policy: &BackoffPolicy, retry_after: Option<Duration>) -> Duration {
        let now = Instant::now();
        self.consecutive = self.consecutive.saturating_add(1);
        self.first_signal.get_or_insert(now);
        self.last_signal = Some(now);

        let computed = policy.delay_for(self.consecutive) + policy.jitter();
        let delay = retry_after.map_or(computed, |ra| ra.max(computed));
        let resume = now + delay;
        self.resume_at = Some(self.resume_at.map_or(resume, |existing| existing.max(resume)));

        debug!(
            consecutive = self.consecutive,
            delay_ms = delay.as_millis(),
            "block signal recorded"
        );
        delay
    }

    /// Clears the throttle after a successful response.
    pub fn reset(&mut self) {
        if self.consecutive > 0 {
            debug!(consecutive = self.consecutive, "backoff reset after success");
        }
        *self = Self::default();
    }

    /// Consecutive block signals since the last success.
    #[must_use]
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Whether any block signal is outstanding.
    #[must_use]
    pub fn is_throttled(&self) -> bool {
        self.consecutive > 0
    }

    /// Time the current throttle period has lasted.
    #[must_use]
    pub fn throttled_for(&self) -> Duration {
        self.first_signal.map_or(Duration::ZERO, |first| first.elapsed())
    }

    /// Earliest instant the next request may be sent.
    #[must_use]
    pub fn resume_at(&self) -> Option<Instant> {
        self.resume_at
    }
}
