use crate::error::ServerResult;
use crate::state::{ServerMetadata, ServerState};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::time::SystemTime;

/// Global server start time for uptime calculation
static SERVER_START_TIME: once_cell::sync::Lazy<SystemTime> = once_cell::sync::Lazy::new(SystemTime::now);

fn uptime_seconds() -> u64 {
    SERVER_START_TIME.elapsed().map(|d| d.as_secs()).unwrap_or(0)
}

/// Liveness probe. Returns 200 if the process is running.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "matching-server",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds(),
    }))
}

/// Readiness probe. Confirms the database pool accepts a connection.
pub async fn readiness_check(State(state): State<ServerState>) -> ServerResult<impl IntoResponse> {
    let db_status = match sqlx::query("SELECT 1").fetch_one(state.db.pool()).await {
        Ok(_) => "ready",
        Err(_) => "unavailable",
    };

    Ok(Json(json!({
        "status": if db_status == "ready" { "ready" } else { "degraded" },
        "service": "matching-server",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds(),
        "components": {
            "api": "ready",
            "database": db_status,
        }
    })))
}

/// Minimal metrics surface: no full metrics system here, but uptime is
/// still useful for operators wiring this into a scrape target later.
pub async fn metrics() -> ServerResult<impl IntoResponse> {
    Ok(Json(json!({ "uptime_seconds": uptime_seconds() })))
}

pub async fn server_metadata() -> ServerResult<impl IntoResponse> {
    let metadata = ServerMetadata { version: env!("CARGO_PKG_VERSION").to_string(), uptime_seconds: uptime_seconds() };
    Ok(Json(serde_json::to_value(metadata)?))
}
