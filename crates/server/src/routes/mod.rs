//! HTTP route handlers.
//!
//! - `health`: liveness, readiness, metrics
//! - `jobs`: matching job trigger, update replay, and the websocket relay

pub mod health;
pub mod jobs;

use crate::error::{ServerError, ServerResult};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// Root endpoint: service name, version, and the routes it exposes.
pub async fn api_info() -> ServerResult<impl IntoResponse> {
    Ok(Json(json!({
        "name": "matching-server",
        "version": env!("CARGO_PKG_VERSION"),
        "api_version": "v1",
        "endpoints": [
            "/api/v1/matching-jobs/{id}/run",
            "/api/v1/matching-jobs/{id}/updates",
            "/ws/matching-jobs/{id}/",
            "/health",
            "/ready",
            "/metrics"
        ]
    })))
}

/// 404 handler for undefined routes.
pub async fn not_found() -> ServerError {
    ServerError::NotFound
}
