//! Integration tests for the request executor against a mock portal.

use patent_core::executor::RequestPurpose;
use patent_core::search::SearchSpec;
use patent_core::{ExecutorError, ExecutorErrorKind, PortalRequest};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::portal::executor_for;
use support::socket_guard::start_mock_server_or_skip;

#[tokio::test]
async fn test_search_request_rewrites_inner_query_and_replays_headers() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/xhr/query"))
        .and(query_param("url", "q=TI%3Dneural&num=25&page=1"))
        .and(query_param("exp", ""))
        .and(wiremock::matchers::header("x-client-data", "test"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"results\":{}}"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (executor, _source) = executor_for(&mock_server.uri());
    let page = executor
        .fetch_text(&PortalRequest::search(SearchSpec {
            query: "TI=neural".to_string(),
            page_size: 25,
            page_index: 1,
        }))
        .await
        .unwrap();

    assert_eq!(page.body, "{\"results\":{}}");
    assert_eq!(executor.stats().requests(), 1);
}

#[tokio::test]
async fn test_single_unauthorized_triggers_one_recapture_then_succeeds() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/patent/US1/en"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/patent/US1/en"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .mount(&mock_server)
        .await;

    let (executor, source) = executor_for(&mock_server.uri());
    let url = format!("{}/patent/US1/en", mock_server.uri());
    let page = executor
        .fetch_text(&PortalRequest::get(url, RequestPurpose::Detail))
        .await
        .unwrap();

    assert_eq!(page.body, "<html>ok</html>");
    assert_eq!(source.captures(), 1);
    assert_eq!(executor.sessions().recapture_count(), 1);
    assert_eq!(executor.sessions().current().await.generation(), 2);
}

#[tokio::test]
async fn test_second_unauthorized_after_recapture_is_fatal() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/patent/US1/en"))
        .respond_with(ResponseTemplate::new(403).set_body_string("{\"error\":\"forbidden\"}"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let (executor, source) = executor_for(&mock_server.uri());
    let url = format!("{}/patent/US1/en", mock_server.uri());
    let err = executor
        .execute(&PortalRequest::get(url, RequestPurpose::Detail))
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutorError::SessionExpired { status: 403, .. }), "{err:?}");
    assert!(err.is_session_fatal());
    assert!(!err.is_retriable());
    assert_eq!(source.captures(), 1, "exactly one re-capture per request");
}

#[tokio::test]
async fn test_persistent_429_exhausts_block_retries() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    // First try plus five block retries with the default bound.
    Mock::given(method("GET"))
        .and(path("/patent/US1/en"))
        .respond_with(ResponseTemplate::new(429))
        .expect(6)
        .mount(&mock_server)
        .await;

    let (executor, source) = executor_for(&mock_server.uri());
    let url = format!("{}/patent/US1/en", mock_server.uri());
    let err = executor
        .execute(&PortalRequest::get(url, RequestPurpose::Detail))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ExecutorErrorKind::RateLimited);
    assert!(err.is_retriable());
    assert!(matches!(err, ExecutorError::RateLimited { attempts: 6, status: 429, .. }));
    assert_eq!(source.captures(), 0, "throttling never re-captures");
    assert_eq!(executor.stats().block_signals(), 6);
}

#[tokio::test]
async fn test_success_resets_shared_backoff() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/patent/US1/en"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/patent/US1/en"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let (executor, _source) = executor_for(&mock_server.uri());
    let url = format!("{}/patent/US1/en", mock_server.uri());
    executor
        .execute(&PortalRequest::get(url, RequestPurpose::Detail))
        .await
        .unwrap();

    assert_eq!(executor.stats().block_signals(), 2);
    assert_eq!(executor.consecutive_blocks().await, 0);
}

#[tokio::test]
async fn test_transient_5xx_is_retried_linearly() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/patent/US1/en"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/patent/US1/en"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let (executor, _source) = executor_for(&mock_server.uri());
    let url = format!("{}/patent/US1/en", mock_server.uri());
    executor
        .execute(&PortalRequest::get(url, RequestPurpose::Detail))
        .await
        .unwrap();

    assert_eq!(executor.stats().transient_retries(), 1);
    assert_eq!(executor.stats().requests(), 2);
}

#[tokio::test]
async fn test_persistent_5xx_gives_network_error_after_attempt_bound() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/patent/US1/en"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let (executor, _source) = executor_for(&mock_server.uri());
    let url = format!("{}/patent/US1/en", mock_server.uri());
    let err = executor
        .execute(&PortalRequest::get(url, RequestPurpose::Detail))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ExecutorErrorKind::Network);
    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn test_not_found_is_permanent() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/patent/US404/en"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (executor, _source) = executor_for(&mock_server.uri());
    let url = format!("{}/patent/US404/en", mock_server.uri());
    let err = executor
        .execute(&PortalRequest::get(url, RequestPurpose::Detail))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ExecutorErrorKind::Http);
    assert!(!err.is_session_fatal());
}
