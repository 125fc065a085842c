//! End-to-end exercise of the HTTP trigger -> queue -> provider -> persist
//! pipeline against a real sqlite file and mocked provider endpoints.

use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use server::db::Db;
use server::server::build_router;
use server::state::ServerState;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Fixture {
    job_id: Uuid,
    target_chunk_id: Uuid,
}

async fn seed(db: &Db) -> Fixture {
    let workspace_id = Uuid::new_v4();
    let entity_type_id = Uuid::new_v4();
    let source_id = Uuid::new_v4();
    let target_id = Uuid::new_v4();
    let template_id = Uuid::new_v4();
    let job_id = Uuid::new_v4();
    let document_id = Uuid::new_v4();
    let target_document_id = Uuid::new_v4();
    let target_chunk_id = Uuid::new_v4();

    sqlx::query("INSERT INTO workspaces (id, slug) VALUES (?, 'acme')")
        .bind(workspace_id.to_string())
        .execute(db.pool())
        .await
        .unwrap();
    sqlx::query("INSERT INTO entity_types (id, workspace_id, slug) VALUES (?, ?, 'company')")
        .bind(entity_type_id.to_string())
        .bind(workspace_id.to_string())
        .execute(db.pool())
        .await
        .unwrap();
    for (id, name) in [(source_id, "Source Co"), (target_id, "Target Co")] {
        sqlx::query("INSERT INTO entities (id, workspace_id, entity_type_id, name) VALUES (?, ?, ?, ?)")
            .bind(id.to_string())
            .bind(workspace_id.to_string())
            .bind(entity_type_id.to_string())
            .bind(name)
            .execute(db.pool())
            .await
            .unwrap();
    }
    sqlx::query("INSERT INTO documents (id, entity_id, body) VALUES (?, ?, 'hello world')")
        .bind(document_id.to_string())
        .bind(source_id.to_string())
        .execute(db.pool())
        .await
        .unwrap();
    sqlx::query("INSERT INTO document_chunks (id, document_id, chunk_index, text) VALUES (?, ?, 0, 'hello')")
        .bind(Uuid::new_v4().to_string())
        .bind(document_id.to_string())
        .execute(db.pool())
        .await
        .unwrap();
    sqlx::query("INSERT INTO documents (id, entity_id, body) VALUES (?, ?, 'robots everywhere')")
        .bind(target_document_id.to_string())
        .bind(target_id.to_string())
        .execute(db.pool())
        .await
        .unwrap();
    sqlx::query("INSERT INTO document_chunks (id, document_id, chunk_index, text) VALUES (?, ?, 0, 'robots everywhere')")
        .bind(target_chunk_id.to_string())
        .bind(target_document_id.to_string())
        .execute(db.pool())
        .await
        .unwrap();

    let template_config = serde_json::json!({
        "search_criteria": [{ "label": "Fit", "prompt": "does this fit?" }]
    })
    .to_string();
    sqlx::query(
        "INSERT INTO matching_templates (id, workspace_id, name, source_entity_type_id, target_entity_type_id, config) \
         VALUES (?, ?, 'match-co', ?, ?, ?)",
    )
    .bind(template_id.to_string())
    .bind(workspace_id.to_string())
    .bind(entity_type_id.to_string())
    .bind(entity_type_id.to_string())
    .bind(template_config)
    .execute(db.pool())
    .await
    .unwrap();
    sqlx::query("INSERT INTO matching_jobs (id, workspace_id, template_id, source_entity_id) VALUES (?, ?, ?, ?)")
        .bind(job_id.to_string())
        .bind(workspace_id.to_string())
        .bind(template_id.to_string())
        .bind(source_id.to_string())
        .execute(db.pool())
        .await
        .unwrap();
    sqlx::query("INSERT INTO matching_job_targets (id, matching_job_id, entity_id) VALUES (?, ?, ?)")
        .bind(Uuid::new_v4().to_string())
        .bind(job_id.to_string())
        .bind(target_id.to_string())
        .execute(db.pool())
        .await
        .unwrap();

    Fixture { job_id, target_chunk_id }
}

async fn test_state(vector_url: String, llm_url: String, queue_tx: tokio::sync::mpsc::Sender<Uuid>) -> ServerState {
    let dir: &'static tempfile::TempDir = Box::leak(Box::new(tempfile::tempdir().expect("tempdir")));
    let database_url = format!("sqlite://{}?mode=rwc", dir.path().join("matching.db").display());

    let config = server::config::ServerConfig {
        database_url,
        vector_search_url: vector_url,
        language_model_url: llm_url,
        queue_capacity: 8,
        ..server::config::ServerConfig::default()
    };

    ServerState::new(config, queue_tx).await.expect("state")
}

#[tokio::test]
async fn trigger_run_processes_job_and_persists_a_match() {
    let (queue_tx, queue_rx) = tokio::sync::mpsc::channel(8);
    let llm_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/review"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "response": "GOOD, strong fit" })))
        .mount(&llm_server)
        .await;

    let vector_server = MockServer::start().await;
    let state = test_state(vector_server.uri(), llm_server.uri(), queue_tx).await;
    let fixture = seed(&state.db).await;

    // Returns the same hit for every search call; it resolves against
    // the target entity's seeded chunk by primary key and is dropped as
    // unresolved against the source entity's chunk (a different id),
    // which is what a provider that knows nothing about local ids would
    // actually do.
    Mock::given(method("POST"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "chunk_or_ref": fixture.target_chunk_id.to_string(), "score": 0.75, "metadata": {}, "text": "relevant evidence" }
        ])))
        .mount(&vector_server)
        .await;

    tokio::spawn(server::queue::run_worker(state.clone(), queue_rx));

    let app = build_router(state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/matching-jobs/{}/run", fixture.job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let mut job_status = String::new();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status: (String,) = sqlx::query_as("SELECT status FROM matching_jobs WHERE id = ?")
            .bind(fixture.job_id.to_string())
            .fetch_one(state.db.pool())
            .await
            .unwrap();
        job_status = status.0;
        if job_status != "queued" && job_status != "running" {
            break;
        }
    }

    assert_eq!(job_status, "complete");

    let matches: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM matches WHERE matching_job_id = ?")
        .bind(fixture.job_id.to_string())
        .fetch_one(state.db.pool())
        .await
        .unwrap();
    assert_eq!(matches.0, 1);
}

#[tokio::test]
async fn list_updates_rejects_malformed_job_id() {
    let vector_server = MockServer::start().await;
    let llm_server = MockServer::start().await;
    let (queue_tx, _queue_rx) = tokio::sync::mpsc::channel(8);
    let state = test_state(vector_server.uri(), llm_server.uri(), queue_tx).await;
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/matching-jobs/not-a-uuid/updates")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let parsed: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn health_and_ready_report_ok() {
    let vector_server = MockServer::start().await;
    let llm_server = MockServer::start().await;
    let (queue_tx, _queue_rx) = tokio::sync::mpsc::channel(8);
    let state = test_state(vector_server.uri(), llm_server.uri(), queue_tx).await;
    let app = build_router(state);

    let response = app.clone().oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
