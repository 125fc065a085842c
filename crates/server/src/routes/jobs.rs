//! Matching job trigger, replay, and realtime relay.

use std::cmp::{max, min};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;

/// `POST /api/v1/matching-jobs/{id}/run`: enqueues the job id onto the
/// background queue. Returns immediately; the caller observes progress
/// via `/updates` or the websocket relay.
pub async fn trigger_run(State(state): State<ServerState>, Path(id): Path<String>) -> ServerResult<impl IntoResponse> {
    let job_id = Uuid::parse_str(&id).map_err(|_| ServerError::BadRequest(format!("invalid job id: {id}")))?;

    state
        .queue_tx
        .send(job_id)
        .await
        .map_err(|_| ServerError::Internal("job queue is no longer accepting work".to_string()))?;

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(json!({ "job_id": job_id, "status": "queued" })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct UpdatesQuery {
    limit: Option<u32>,
}

/// `GET /api/v1/matching-jobs/{id}/updates?limit=<1..200>`: most recent
/// updates in reverse-chronological order.
pub async fn list_updates(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Query(query): Query<UpdatesQuery>,
) -> ServerResult<impl IntoResponse> {
    let job_id = Uuid::parse_str(&id).map_err(|_| ServerError::BadRequest(format!("invalid job id: {id}")))?;
    let page_limit = state.config.updates_page_limit;
    let limit = min(max(query.limit.unwrap_or(page_limit), 1), page_limit);

    let updates = state.db.recent_updates(job_id, limit).await?;
    Ok(Json(updates))
}

/// `GET /ws/matching-jobs/{id}/`: broadcast-only realtime relay. The path
/// segment is validated after upgrade so a malformed id can be reported
/// with the documented close code rather than a bare HTTP error.
pub async fn websocket_relay(ws: WebSocketUpgrade, State(state): State<ServerState>, Path(id): Path<String>) -> Response {
    ws.on_upgrade(move |socket| relay_loop(socket, id, state))
}

async fn relay_loop(mut socket: WebSocket, raw_id: String, state: ServerState) {
    let job_id = match Uuid::parse_str(&raw_id) {
        Ok(id) => id,
        Err(_) => {
            let _ = socket
                .send(Message::Close(Some(CloseFrame { code: 4001, reason: "malformed job id".into() })))
                .await;
            return;
        }
    };

    if !state.has_broadcast_layer() {
        let _ = socket
            .send(Message::Close(Some(CloseFrame { code: 4000, reason: "no broadcast layer configured".into() })))
            .await;
        return;
    }

    let sender = state.broadcast_sender(job_id);
    let mut events = sender.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(payload) = serde_json::to_string(&event) else { continue };
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }
        }
    }
}
