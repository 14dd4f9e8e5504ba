//! Atomic replacement of the active [`ExecutionSession`].
//!
//! Requests clone the current `Arc` and keep using it until they finish, so
//! a re-capture never disturbs in-flight work. Concurrent callers that see
//! the same stale generation share a single re-capture.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

use super::capture::{CaptureError, CapturedSession, SessionSource};
use super::materialize::{ExecutionSession, MaterializeError, materialize};
use crate::config::HttpSettings;

/// Failure to replace the active session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The browser phase failed.
    #[error(transparent)]
    Capture(#[from] CaptureError),
    /// The captured snapshot could not be turned into a client.
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
}

/// Owns the current session and the means to replace it.
pub struct SessionHandle {
    current: RwLock<Arc<ExecutionSession>>,
    source: Arc<dyn SessionSource>,
    settings: HttpSettings,
    max_age: Duration,
    refresh_lock: Mutex<()>,
    age_retry_after: Mutex<Option<Instant>>,
    next_generation: AtomicU64,
    recaptures: AtomicUsize,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("max_age", &self.max_age)
            .field("recaptures", &self.recaptures.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    /// Materializes `initial` as generation 1.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializeError`] if the snapshot cannot be materialized.
    pub fn new(
        initial: &CapturedSession,
        source: Arc<dyn SessionSource>,
        settings: HttpSettings,
        max_age: Duration,
    ) -> Result<Self, MaterializeError> {
        let session = materialize(initial, &settings, 1)?;
        Ok(Self {
            current: RwLock::new(session),
            source,
            settings,
            max_age,
            refresh_lock: Mutex::new(()),
            age_retry_after: Mutex::new(None),
            next_generation: AtomicU64::new(2),
            recaptures: AtomicUsize::new(0),
        })
    }

    /// Returns the active session, replacing it first when it is too old.
    ///
    /// An age-triggered re-capture that fails keeps the old session and is
    /// not retried for another `max_age`; expiry is then detected on the
    /// next authorization failure.
    pub async fn current(&self) -> Arc<ExecutionSession> {
        let session = Arc::clone(&*self.current.read().await);
        if session.age() <= self.max_age {
            return session;
        }

        let _guard = self.refresh_lock.lock().await;
        let mut retry_after = self.age_retry_after.lock().await;
        if retry_after.is_some_and(|at| Instant::now() < at) {
            return Arc::clone(&*self.current.read().await);
        }
        info!(
            age_secs = session.age().as_secs(),
            max_age_secs = self.max_age.as_secs(),
            "session exceeded maximum age"
        );
        match self.recapture_locked(session.generation()).await {
            Ok(fresh) => {
                *retry_after = None;
                fresh
            }
            Err(e) => {
                warn!(error = %e, "age-triggered re-capture failed; keeping current session");
                *retry_after = Some(Instant::now() + self.max_age);
                session
            }
        }
    }

    /// Replaces the session unless another caller already replaced
    /// `stale_generation`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when capture or materialization fails. The
    /// previous session stays active in that case.
    #[instrument(skip(self))]
    pub async fn refresh(&self, stale_generation: u64) -> Result<Arc<ExecutionSession>, SessionError> {
        let _guard = self.refresh_lock.lock().await;
        self.recapture_locked(stale_generation).await
    }

    /// Body of [`Self::refresh`]; the caller holds `refresh_lock`.
    async fn recapture_locked(&self, stale_generation: u64) -> Result<Arc<ExecutionSession>, SessionError> {
        let active = Arc::clone(&*self.current.read().await);
        if active.generation() != stale_generation {
            return Ok(active);
        }

        let captured = self.source.capture().await?;
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let fresh = materialize(&captured, &self.settings, generation)?;
        *self.current.write().await = Arc::clone(&fresh);
        self.recaptures.fetch_add(1, Ordering::SeqCst);
        info!(generation, "session re-captured");
        Ok(fresh)
    }

    /// Number of successful re-captures so far.
    #[must_use]
    pub fn recapture_count(&self) -> usize {
        self.recaptures.load(Ordering::SeqCst)
    }
}
