//! Core data model.
//!
//! These types are storage-agnostic: the server crate's sqlx layer maps
//! rows onto them, and [`crate::memory`] builds them directly for tests.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Tenant boundary. All other entities carry a workspace reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workspace {
    pub id: Uuid,
    pub slug: String,
}

/// `(workspace, slug)`-unique role label an entity can play.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityType {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub entity_type_id: Uuid,
    pub name: String,
    pub external_ref: Option<String>,
    #[serde(default)]
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub scrape_status: ScrapeStatus,
    pub body: String,
    #[serde(default)]
    pub metadata: JsonValue,
}

/// A span of document text associated with a vector-store id.
///
/// Unique on `(document_id, chunk_index)`; ordering by `chunk_index` is
/// required when stitching text back together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: u32,
    pub text: String,
    pub vector_store_id: Option<String>,
    #[serde(default)]
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchingTemplate {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub source_entity_type_id: Uuid,
    pub target_entity_type_id: Uuid,
    #[serde(default)]
    pub config: JsonValue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchingJob {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub template_id: Uuid,
    pub source_entity_id: Uuid,
    pub status: JobStatus,
    #[serde(default)]
    pub config_override: JsonValue,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub error_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchingJobTarget {
    pub id: Uuid,
    pub matching_job_id: Uuid,
    pub entity_id: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Complete,
    Failed,
}

/// One execution attempt of a job; a job may have multiple runs (retries).
/// The latest is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchingJobRun {
    pub id: Uuid,
    pub matching_job_id: Uuid,
    pub matching_config_snapshot: JsonValue,
    pub plan_snapshot: JsonValue,
    pub status: RunStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub error_message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Source,
    Target,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchingSearchLog {
    pub id: Uuid,
    pub run_id: Uuid,
    pub criterion_id: String,
    pub criterion_label: String,
    pub query_text: String,
    pub query_type: QueryType,
    pub target_entity_id: Option<Uuid>,
    pub limit: i64,
    pub returned_count: i64,
    #[serde(default)]
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchingSearchHitLog {
    pub id: Uuid,
    pub search_id: Uuid,
    pub rank: i64,
    pub chunk_id: Option<Uuid>,
    pub chunk_text: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchingEvaluationLog {
    pub id: Uuid,
    pub run_id: Uuid,
    pub target_entity_id: Uuid,
    pub average_score: f64,
    pub coverage: f64,
    pub search_hit_ratio: f64,
    pub summary_reason: String,
    #[serde(default)]
    pub metadata: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchingEvaluationDetailLog {
    pub id: Uuid,
    pub evaluation_id: Uuid,
    pub criterion_id: String,
    pub criterion_label: String,
    pub rating_value: i32,
    pub rating_name: String,
    pub rating_prompt: String,
    pub rating_response: String,
    pub reasoning_prompt: String,
    pub reasoning_response: String,
}

/// Final ranked result, unique on `(matching_job_id, target_entity_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Match {
    pub id: Uuid,
    pub matching_job_id: Uuid,
    pub source_entity_id: Uuid,
    pub target_entity_id: Uuid,
    pub score: f64,
    pub explanation: String,
    pub rank: u32,
}

/// `(match_id, label)`-unique evaluated criterion or derived hit ratio.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchFeature {
    pub id: Uuid,
    pub match_id: Uuid,
    pub label: String,
    pub value_numeric: Option<f64>,
    #[serde(default)]
    pub value_text: String,
}

/// Append-only event log row used for client replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchingJobUpdate {
    pub id: Uuid,
    pub matching_job_id: Uuid,
    pub run_id: Option<Uuid>,
    pub event_type: String,
    pub payload: JsonValue,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
