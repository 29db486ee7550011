//! HTTP API.
//!
//! Exposes the coordinator over axum with CORS, request timeouts, request
//! tracing, panic recovery and per-client rate limiting.

pub mod rate_limit;
pub mod routes;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, SqlboxError};
use crate::query::QueryExecutor;

pub use rate_limit::{RateLimiter, TokenBucket};
pub use routes::{ExecuteRequest, HealthResponse};

/// Room for JSON framing and escapes on top of the query itself.
const BODY_OVERHEAD: usize = 64 * 1024;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<QueryExecutor>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(executor: QueryExecutor, limiter: RateLimiter) -> Self {
        Self {
            executor: Arc::new(executor),
            limiter: Arc::new(limiter),
        }
    }
}

/// Builds the router with all routes and middleware.
pub fn router(state: AppState, config: &ServerConfig) -> Router {
    let body_limit = state
        .executor
        .config()
        .max_query_length
        .saturating_mul(2)
        .saturating_add(BODY_OVERHEAD);

    Router::new()
        .route("/health", get(routes::health_handler))
        .route("/api/v1/health", get(routes::health_handler))
        .route("/api/v1/execute", post(routes::execute_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            routes::rate_limit,
        ))
        .layer(cors_layer(&config.cors_origins))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<_> = origins.iter().filter_map(|s| s.parse().ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Serves the API until SIGINT or SIGTERM.
///
/// In-flight requests get `shutdown_timeout` to finish once a signal arrives.
pub async fn serve(state: AppState, config: &ServerConfig) -> Result<()> {
    let addr = config.socket_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| SqlboxError::internal(format!("failed to bind {addr}: {e}")))?;
    info!("Listening on {addr}");

    let app = router(state, config).into_make_service_with_connect_info::<SocketAddr>();
    let shutdown = Arc::new(Notify::new());
    let server = axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = Arc::clone(&shutdown);
            async move {
                shutdown_signal().await;
                shutdown.notify_one();
            }
        })
        .into_future();

    let drain_timeout = config.shutdown_timeout();
    let drain_expired = async {
        shutdown.notified().await;
        tokio::time::sleep(drain_timeout).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|e| SqlboxError::internal(format!("server error: {e}")))?;
        }
        _ = drain_expired => {
            warn!("Requests still in flight after {drain_timeout:?}, shutting down anyway");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {e}");
                let _ = ctrl_c.await;
                info!("Received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Received shutdown signal");
    }
}
