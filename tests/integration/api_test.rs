//! HTTP API tests.
//!
//! Drive the axum router in-process with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sqlbox::api::{self, AppState, RateLimiter};
use sqlbox::config::{ExecutorConfig, ServerConfig};
use sqlbox::db::{Fault, MockDatabaseClient};
use sqlbox::query::QueryExecutor;
use tower::ServiceExt;

fn app_with(mock: &MockDatabaseClient, limiter: RateLimiter) -> Router {
    let executor = QueryExecutor::with_blocklist(Arc::new(mock.clone()), ExecutorConfig::default());
    api::router(AppState::new(executor, limiter), &ServerConfig::default())
}

fn app(mock: &MockDatabaseClient) -> Router {
    app_with(mock, RateLimiter::new(1000, 1000))
}

fn execute_request(body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/v1/execute")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_execute_success() {
    let mock = MockDatabaseClient::new();
    let (status, body) = send(
        app(&mock),
        execute_request(r#"{"query": "CREATE TABLE t (x INT); INSERT INTO t VALUES (1)"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(
        body["output"],
        "Query OK, 0 row(s) affected\n\nQuery OK, 1 row(s) affected"
    );
    assert_eq!(body["error"], "");
    assert!(body["execution_time_ms"].is_u64());
    assert!(mock.live_namespaces().is_empty());
}

#[tokio::test]
async fn test_statement_failure_is_200() {
    let mock = MockDatabaseClient::new()
        .with_statement_fault("bad", Fault::Error("ERROR 1064 (42000): syntax".into()));
    let (status, body) = send(app(&mock), execute_request(r#"{"query": "SELECT bad"}"#)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["output"], "");
    assert_eq!(
        body["error"],
        "Query execution failed: error in statement 1: ERROR 1064 (42000): syntax"
    );
}

#[tokio::test]
async fn test_rejected_query_is_403() {
    let mock = MockDatabaseClient::new();
    let (status, body) = send(
        app(&mock),
        execute_request(r#"{"query": "DROP DATABASE student_db_x"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);
    assert_eq!(
        body["error"],
        "Security validation failed: DROP DATABASE command is not allowed"
    );
    assert!(mock.created_namespaces().is_empty());
}

#[tokio::test]
async fn test_commented_keywords_are_403() {
    let mock = MockDatabaseClient::new();
    let (status, body) = send(
        app(&mock),
        execute_request(r#"{"query": "DROP/**/DATABASE student_db_other"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body["error"],
        "Security validation failed: DROP DATABASE command is not allowed"
    );
    assert!(mock.created_namespaces().is_empty());
}

#[tokio::test]
async fn test_empty_query_is_400() {
    let mock = MockDatabaseClient::new();
    let (status, body) = send(app(&mock), execute_request(r#"{"query": "  "}"#)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "query cannot be empty");
}

#[tokio::test]
async fn test_malformed_json_is_400() {
    let mock = MockDatabaseClient::new();
    let (status, body) = send(app(&mock), execute_request(r#"{"sql": "SELECT 1"}"#)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid request format:"));
}

#[tokio::test]
async fn test_create_failure_is_500() {
    let mock =
        MockDatabaseClient::new().with_create_fault(Fault::Error("Too many connections".into()));
    let (status, body) = send(app(&mock), execute_request(r#"{"query": "SELECT 1"}"#)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to create sandbox: Too many connections");
}

#[tokio::test]
async fn test_client_timeout_is_honoured() {
    let mock = MockDatabaseClient::new().with_statement_fault("sleep", Fault::Hang);
    let (status, body) = send(
        app(&mock),
        execute_request(r#"{"query": "SELECT SLEEP(60)", "timeout_ms": 50}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Query execution timeout exceeded (50ms)");
    assert!(mock.live_namespaces().is_empty());
}

#[tokio::test]
async fn test_request_timeout_is_408_and_sandbox_dropped() {
    let mock = MockDatabaseClient::new().with_statement_fault("sleep", Fault::Hang);
    let executor = QueryExecutor::with_blocklist(Arc::new(mock.clone()), ExecutorConfig::default());
    let config = ServerConfig {
        request_timeout_secs: 1,
        ..Default::default()
    };
    let app = api::router(AppState::new(executor, RateLimiter::new(1000, 1000)), &config);

    let response = app
        .oneshot(execute_request(r#"{"query": "SELECT SLEEP(60)"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let created = mock.created_namespaces();
    assert_eq!(created.len(), 1);
    assert_eq!(mock.drop_count(&created[0]), 1);
    assert!(mock.live_namespaces().is_empty());
}

#[tokio::test]
async fn test_health() {
    let mock = MockDatabaseClient::new();

    for uri in ["/health", "/api/v1/health"] {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, body) = send(app(&mock), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["message"], "Server is running");
        let time = body["time"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(time).is_ok());
    }
}

#[tokio::test]
async fn test_rate_limit() {
    let mock = MockDatabaseClient::new();
    let app = app_with(&mock, RateLimiter::new(1, 2));

    for _ in 0..2 {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, _) = send(app.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(app, execute_request(r#"{"query": "SELECT 1"}"#)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        body["error"],
        "Rate limit exceeded. Please slow down your requests."
    );
    assert!(mock.created_namespaces().is_empty());
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let mock = MockDatabaseClient::new();
    let response = app(&mock)
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
