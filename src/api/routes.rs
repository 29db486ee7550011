//! HTTP handlers for query execution and health checks.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::AppState;
use crate::query::{ExecuteResponse, ExecutionState};

/// Body of `POST /api/v1/execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub query: String,
    /// Optional client deadline; the server's own query timeout still applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Body of the health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// HTTP status for each terminal state. Executed requests are 200 even on failure.
pub fn status_for(state: ExecutionState) -> StatusCode {
    match state {
        ExecutionState::Invalid => StatusCode::BAD_REQUEST,
        ExecutionState::Rejected => StatusCode::FORBIDDEN,
        ExecutionState::CreateFailed => StatusCode::INTERNAL_SERVER_ERROR,
        ExecutionState::Succeeded | ExecutionState::Failed | ExecutionState::TimedOut => {
            StatusCode::OK
        }
    }
}

/// `POST /api/v1/execute`
pub async fn execute_handler(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            debug!("Rejected request body: {}", rejection.body_text());
            let body = ExecuteResponse::failure(format!(
                "Invalid request format: {}",
                rejection.body_text()
            ));
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };

    let deadline = request
        .timeout_ms
        .map(|ms| Instant::now() + Duration::from_millis(ms));
    let report = state.executor.execute(&request.query, deadline).await;

    (status_for(report.state), Json(report.response)).into_response()
}

/// `GET /health` and `GET /api/v1/health`
pub async fn health_handler(State(state): State<AppState>) -> Response {
    match state.executor.db().ping().await {
        Ok(()) => {
            let body = HealthResponse {
                status: "healthy".to_string(),
                message: "Server is running".to_string(),
                time: Some(chrono::Utc::now().to_rfc3339()),
                error: None,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            warn!("Health check failed: {e}");
            let body = HealthResponse {
                status: "unhealthy".to_string(),
                message: "MySQL connection failed".to_string(),
                time: None,
                error: Some(e.to_string()),
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }
}

/// Refuses requests from clients that have used up their token bucket.
///
/// Requests without connection info (in-process tests) share one bucket.
pub async fn rate_limit(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let client = connect_info
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    if !state.limiter.check(client) {
        debug!(%client, "Rate limit exceeded");
        let body = serde_json::json!({
            "error": "Rate limit exceeded. Please slow down your requests."
        });
        return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    }

    next.run(request).await
}
