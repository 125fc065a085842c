//! Server initialization and routing.
//!
//! Handles router construction, the middleware stack, and graceful
//! shutdown, split between `build_router` and `start_server` so tests
//! can exercise the router without binding a real socket.

use crate::config::ServerConfig;
use crate::middleware::{log_requests, request_id};
use crate::queue;
use crate::routes::{api_info, jobs, not_found};
use crate::routes::health;
use crate::state::ServerState;
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the Axum router: public health routes plus the three job
/// endpoints.
///
/// Middleware stack (applied in reverse order): request ID tracking,
/// logging, timeout, compression, CORS, tracing span per request.
pub fn build_router(state: ServerState) -> Router {
    let cors = if state.config.enable_cors {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    let timeout_secs = state.config.timeout_secs;

    Router::new()
        .route("/", get(api_info))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics))
        .route("/api/v1/matching-jobs/{id}/run", post(jobs::trigger_run))
        .route("/api/v1/matching-jobs/{id}/updates", get(jobs::list_updates))
        .route("/ws/matching-jobs/{id}/", get(jobs::websocket_relay))
        .fallback(not_found)
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(timeout_secs)))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(from_fn(request_id))
        .layer(from_fn(log_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the matching server. Blocks until shut down via Ctrl+C or
/// SIGTERM.
pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json()
        .init();

    let addr: SocketAddr = config.socket_addr()?;
    let queue_capacity = config.queue_capacity;

    // The queue needs a sender before `ServerState` exists and `ServerState`
    // needs to exist before the queue worker can use it, so the channel is
    // wired up first and the worker spawned once state is ready.
    let (queue_tx, queue_rx) = tokio::sync::mpsc::channel(queue_capacity);
    let state = ServerState::new(config, queue_tx).await?;
    tokio::spawn(queue::run_worker(state.clone(), queue_rx));

    let app = build_router(state);

    tracing::info!("starting matching server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("received SIGTERM, shutting down..."),
    }
}
