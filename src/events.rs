//! Realtime event broadcasting.
//!
//! Events are typed records emitted at every significant pipeline step.
//! Each emission performs best-effort transport (failures are logged,
//! never raised into the pipeline) and appends an immutable update row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::MatchCandidate;
use crate::config::CriterionDefinition;
use crate::domain::JobStatus;
use crate::search::TargetSearchSummary;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionSnapshot {
    pub id: String,
    pub label: String,
    pub guidance: Option<String>,
    pub weight: f64,
    pub source_snippet_limit: u32,
    pub target_snippet_limit: u32,
}

impl From<&CriterionDefinition> for CriterionSnapshot {
    fn from(def: &CriterionDefinition) -> Self {
        Self {
            id: def.id.clone(),
            label: def.label.clone(),
            guidance: def.guidance.clone(),
            weight: def.weight,
            source_snippet_limit: def.source_snippet_limit,
            target_snippet_limit: def.target_snippet_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionHitCount {
    pub criterion_id: String,
    pub hit_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchingJobEventPayload {
    #[serde(rename = "matching.job.status")]
    Status {
        status: JobStatusWire,
        error_message: Option<String>,
    },
    #[serde(rename = "matching.job.criteria")]
    Criteria { criteria: Vec<CriterionSnapshot> },
    #[serde(rename = "matching.job.source_snippets")]
    SourceSnippets { counts: Vec<CriterionHitCount> },
    #[serde(rename = "matching.job.target.search")]
    TargetSearch {
        target_id: Uuid,
        target_name: String,
        counts: Vec<CriterionHitCount>,
        total: usize,
    },
    #[serde(rename = "matching.job.target.evaluation")]
    TargetEvaluation {
        target_id: Uuid,
        target_name: String,
        average_score: f64,
        coverage: f64,
        criteria: Vec<CriterionEvaluationSnapshot>,
    },
    #[serde(rename = "matching.job.target.candidate")]
    TargetCandidate {
        target_id: Uuid,
        target_name: String,
        score: f64,
        search_hit_ratio: f64,
        summary_reason: String,
    },
    #[serde(rename = "matching.job.match.persisted")]
    MatchPersisted {
        match_id: Uuid,
        target_id: Uuid,
        target_name: String,
        rank: u32,
        score: f64,
        search_hit_ratio: f64,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatusWire {
    Queued,
    Running,
    Complete,
    Failed,
}

impl From<JobStatus> for JobStatusWire {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued => JobStatusWire::Queued,
            JobStatus::Running => JobStatusWire::Running,
            JobStatus::Complete => JobStatusWire::Complete,
            JobStatus::Failed => JobStatusWire::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionEvaluationSnapshot {
    pub criterion_id: String,
    pub criterion_label: String,
    pub rating: i32,
    pub reason: String,
}

/// One emitted event, envelope plus typed payload.
///
/// `run_id` is `None` for the status transitions published before a
/// [`crate::audit::AuditRecorder::start`] call exists for the attempt
/// (the initial `queued`/`running` announcement and the terminal
/// `complete`/`failed` one once the run has already been finalized);
/// every event published while a run is active carries that run's id,
/// matching the `MatchingJobUpdate.run` column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchingJobEvent {
    pub job_id: Uuid,
    pub run_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: MatchingJobEventPayload,
}

impl MatchingJobEvent {
    /// The string discriminant stored in `MatchingJobUpdate.event_type`.
    pub fn event_type(&self) -> &'static str {
        match &self.payload {
            MatchingJobEventPayload::Status { .. } => "matching.job.status",
            MatchingJobEventPayload::Criteria { .. } => "matching.job.criteria",
            MatchingJobEventPayload::SourceSnippets { .. } => "matching.job.source_snippets",
            MatchingJobEventPayload::TargetSearch { .. } => "matching.job.target.search",
            MatchingJobEventPayload::TargetEvaluation { .. } => "matching.job.target.evaluation",
            MatchingJobEventPayload::TargetCandidate { .. } => "matching.job.target.candidate",
            MatchingJobEventPayload::MatchPersisted { .. } => "matching.job.match.persisted",
        }
    }
}

/// Realtime broadcast + durable replay capability.
///
/// `publish` must never propagate transport failures into the pipeline:
/// implementations log and swallow them, matching the null/broadcast
/// split below.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, event: MatchingJobEvent);
}

/// No-op transport; still useful when paired with an audit-backed
/// decorator that persists `MatchingJobUpdate` rows regardless.
pub struct NullPublisher;

#[async_trait]
impl Publisher for NullPublisher {
    async fn publish(&self, _event: MatchingJobEvent) {}
}

/// Derive the per-job broadcast group name: `matching_job_<hex>`, where
/// `<hex>` is the job uuid's hyphen-free hex form, falling back to an
/// alnum-filtered rendering if that ever produces something empty.
pub fn group_name_for_job(job_id: Uuid) -> String {
    let hex = job_id.simple().to_string();
    if hex.is_empty() {
        let fallback: String = job_id
            .to_string()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        format!("matching_job_{fallback}")
    } else {
        format!("matching_job_{hex}")
    }
}

pub fn candidate_to_evaluation_snapshots(candidate: &MatchCandidate) -> Vec<CriterionEvaluationSnapshot> {
    candidate
        .evaluation
        .evaluations
        .iter()
        .map(|e| CriterionEvaluationSnapshot {
            criterion_id: e.criterion_id.clone(),
            criterion_label: e.criterion_label.clone(),
            rating: e.rating.value(),
            reason: e.reason.clone(),
        })
        .collect()
}

pub fn target_search_hit_counts(summary: &TargetSearchSummary) -> Vec<CriterionHitCount> {
    summary
        .hits
        .iter()
        .map(|h| CriterionHitCount {
            criterion_id: h.criterion.id.clone(),
            hit_count: h.hits.len(),
        })
        .collect()
}
