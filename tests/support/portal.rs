//! A captured session pointing at a mock portal, without a browser.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use patent_core::session::{CaptureError, CapturedSession, RequestTemplate, SessionSource};
use patent_core::{HttpSettings, RequestExecutor, RetrySettings, SessionHandle};

/// Session whose search template targets `{server_uri}/xhr/query`.
pub fn captured_session(server_uri: &str) -> CapturedSession {
    CapturedSession {
        entry_url: format!("{server_uri}/?q=seed&hl=en"),
        cookies: Vec::new(),
        headers: BTreeMap::from([("x-client-data".to_string(), "test".to_string())]),
        page_tokens: BTreeMap::new(),
        token_snapshot_time: SystemTime::now(),
        request_template: RequestTemplate {
            url: format!("{server_uri}/xhr/query?url=q%3Dseed%26num%3D10&exp="),
            method: "GET".to_string(),
            body: None,
        },
    }
}

/// Hands out the same snapshot on every capture and counts the calls.
pub struct StaticSource {
    session: CapturedSession,
    captures: AtomicUsize,
}

impl StaticSource {
    pub fn new(session: CapturedSession) -> Self {
        Self {
            session,
            captures: AtomicUsize::new(0),
        }
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionSource for StaticSource {
    async fn capture(&self) -> Result<CapturedSession, CaptureError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let mut session = self.session.clone();
        session.token_snapshot_time = SystemTime::now();
        Ok(session)
    }
}

/// An executor on a fresh session against `server_uri`, with no sleeps.
pub fn executor_for(server_uri: &str) -> (Arc<RequestExecutor>, Arc<StaticSource>) {
    executor_with(server_uri, RetrySettings::immediate())
}

pub fn executor_with(server_uri: &str, retry: RetrySettings) -> (Arc<RequestExecutor>, Arc<StaticSource>) {
    let initial = captured_session(server_uri);
    let source = Arc::new(StaticSource::new(initial.clone()));
    let settings = HttpSettings {
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(10),
        ..HttpSettings::default()
    };
    let handle = SessionHandle::new(&initial, Arc::clone(&source) as Arc<dyn SessionSource>, settings, retry.session_max_age)
        .unwrap();
    (Arc::new(RequestExecutor::new(Arc::new(handle), &retry)), source)
}
