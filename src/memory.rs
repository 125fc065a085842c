//! In-memory test doubles for every provider trait.
//!
//! Used by the demo binary and by this crate's own unit/integration
//! tests: a deterministic stand-in swapped in for each real dependency.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use crate::aggregate::MatchCandidate;
use crate::audit::{AuditRecorder, SearchRecord};
use crate::context::{ContextLoader, EntityBundle, MatchingJobContext};
use crate::domain::{JobStatus, Match, MatchFeature, RunStatus};
use crate::error::MatchingError;
use crate::evaluation::{LanguageModel, TargetEvaluation};
use crate::events::{MatchingJobEvent, Publisher};
use crate::plan::SearchPlan;
use crate::runner::{JobStore, MatchWriter, ProviderFactory, ProviderHandle};
use crate::search::{RawHit, SearchRequest, VectorSearcher};

/// Returns hits keyed by exact query string, ignoring workspace/entity
/// scoping — sufficient for unit tests that only vary the prompt.
pub struct InMemoryVectorSearcher {
    responses: HashMap<String, Vec<RawHit>>,
}

impl InMemoryVectorSearcher {
    pub fn new(responses: Vec<(String, Vec<RawHit>)>) -> Self {
        Self {
            responses: responses.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self { responses: HashMap::new() }
    }
}

#[async_trait]
impl VectorSearcher for InMemoryVectorSearcher {
    async fn search(&self, request: SearchRequest<'_>) -> Result<Vec<RawHit>, MatchingError> {
        let mut hits = self.responses.get(request.query).cloned().unwrap_or_default();
        hits.truncate(request.limit as usize);
        Ok(hits)
    }
}

/// Returns queued responses in order, one per call, regardless of
/// prompt content; panics if exhausted (a test bug, not a runtime one).
pub struct InMemoryLanguageModel {
    queue: Mutex<std::collections::VecDeque<String>>,
}

impl InMemoryLanguageModel {
    pub fn scripted(responses: Vec<String>) -> Self {
        Self {
            queue: Mutex::new(responses.into_iter().collect()),
        }
    }
}

#[async_trait]
impl LanguageModel for InMemoryLanguageModel {
    async fn structured_match_review(&self, _prompt: &str) -> Result<String, MatchingError> {
        let mut queue = self.queue.lock().unwrap();
        Ok(queue.pop_front().unwrap_or_else(|| "NEUTRAL".to_string()))
    }
}

/// Holds a single context in memory and returns it for any job id.
pub struct InMemoryContextLoader {
    context: MatchingJobContext,
}

impl InMemoryContextLoader {
    pub fn new(context: MatchingJobContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ContextLoader for InMemoryContextLoader {
    async fn load(&self, _job_id: Uuid) -> Result<MatchingJobContext, MatchingError> {
        Ok(self.context.clone())
    }
}

/// Records every call for later assertion instead of writing anywhere.
#[derive(Default)]
pub struct InMemoryAuditRecorder {
    pub runs_started: Mutex<Vec<Uuid>>,
    pub searches: Mutex<Vec<(Uuid, crate::domain::QueryType)>>,
    pub evaluations: Mutex<Vec<(Uuid, Uuid)>>,
    pub finalized: Mutex<Vec<(Uuid, RunStatus)>>,
}

#[async_trait]
impl AuditRecorder for InMemoryAuditRecorder {
    async fn start(&self, job_id: Uuid, _plan: &SearchPlan, _config_snapshot: &serde_json::Value) -> Result<Uuid, MatchingError> {
        let run_id = Uuid::new_v4();
        self.runs_started.lock().unwrap().push(job_id);
        Ok(run_id)
    }

    async fn record_search(&self, run_id: Uuid, record: SearchRecord<'_>) -> Result<(), MatchingError> {
        self.searches.lock().unwrap().push((run_id, record.query_type));
        Ok(())
    }

    async fn record_evaluation(
        &self,
        run_id: Uuid,
        evaluation: &TargetEvaluation,
        _plan: &SearchPlan,
        _search_hit_ratio: f64,
    ) -> Result<(), MatchingError> {
        self.evaluations.lock().unwrap().push((run_id, evaluation.target_entity_id));
        Ok(())
    }

    async fn finalize(&self, run_id: Uuid, status: RunStatus, _error_message: Option<&str>) -> Result<(), MatchingError> {
        self.finalized.lock().unwrap().push((run_id, status));
        Ok(())
    }
}

/// Collects every published event in order for later assertion.
#[derive(Default)]
pub struct InMemoryPublisher {
    pub events: Mutex<Vec<MatchingJobEvent>>,
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn publish(&self, event: MatchingJobEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Wraps shared searcher/LLM handles so [`ProviderFactory::build`] can
/// hand out fresh `Box<dyn _>` values without needing `Clone` impls on
/// the underlying doubles.
pub struct InMemoryProviderFactory {
    searcher: Arc<dyn VectorSearcher>,
    llm: Arc<dyn LanguageModel>,
}

impl InMemoryProviderFactory {
    pub fn new(searcher: Arc<dyn VectorSearcher>, llm: Arc<dyn LanguageModel>) -> Self {
        Self { searcher, llm }
    }
}

struct ArcSearcher(Arc<dyn VectorSearcher>);

#[async_trait]
impl VectorSearcher for ArcSearcher {
    async fn search(&self, request: SearchRequest<'_>) -> Result<Vec<RawHit>, MatchingError> {
        self.0.search(request).await
    }
}

struct ArcLlm(Arc<dyn LanguageModel>);

#[async_trait]
impl LanguageModel for ArcLlm {
    async fn structured_match_review(&self, prompt: &str) -> Result<String, MatchingError> {
        self.0.structured_match_review(prompt).await
    }
}

#[async_trait]
impl ProviderFactory for InMemoryProviderFactory {
    async fn build(&self) -> Result<ProviderHandle, MatchingError> {
        Ok(ProviderHandle {
            searcher: Box::new(ArcSearcher(self.searcher.clone())),
            llm: Box::new(ArcLlm(self.llm.clone())),
        })
    }
}

/// Tracks a single job's status in memory; good enough to exercise the
/// runner's duplicate-run guard and terminal transitions.
pub struct InMemoryJobStore {
    statuses: Mutex<HashMap<Uuid, JobStatus>>,
}

impl InMemoryJobStore {
    pub fn new(job_id: Uuid, status: JobStatus) -> Self {
        let mut statuses = HashMap::new();
        statuses.insert(job_id, status);
        Self { statuses: Mutex::new(statuses) }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn status(&self, job_id: Uuid) -> Result<JobStatus, MatchingError> {
        self.statuses
            .lock()
            .unwrap()
            .get(&job_id)
            .copied()
            .ok_or_else(|| MatchingError::Other(format!("unknown job {job_id}")))
    }

    async fn mark_running(&self, job_id: Uuid) -> Result<(), MatchingError> {
        self.statuses.lock().unwrap().insert(job_id, JobStatus::Running);
        Ok(())
    }

    async fn mark_complete(&self, job_id: Uuid) -> Result<(), MatchingError> {
        self.statuses.lock().unwrap().insert(job_id, JobStatus::Complete);
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, _message: &str) -> Result<(), MatchingError> {
        self.statuses.lock().unwrap().insert(job_id, JobStatus::Failed);
        Ok(())
    }
}

/// Builds `Match`/`MatchFeature` rows the way the runner expects: one
/// feature per rated criterion plus a `search_hit_ratio` feature, ranked
/// by descending score in the order given.
#[derive(Default)]
pub struct InMemoryMatchWriter {
    pub stored: Mutex<HashMap<Uuid, Vec<(Match, Vec<MatchFeature>)>>>,
}

#[async_trait]
impl MatchWriter for InMemoryMatchWriter {
    async fn replace_matches(
        &self,
        job_id: Uuid,
        source_entity_id: Uuid,
        ranked: &[MatchCandidate],
    ) -> Result<Vec<(Match, Vec<MatchFeature>)>, MatchingError> {
        let mut rows = Vec::with_capacity(ranked.len());
        for (index, candidate) in ranked.iter().enumerate() {
            let match_id = Uuid::new_v4();
            let match_row = Match {
                id: match_id,
                matching_job_id: job_id,
                source_entity_id,
                target_entity_id: candidate.target_entity_id,
                score: candidate.average_score(),
                explanation: candidate.summary_reason(),
                rank: (index + 1) as u32,
            };
            let mut features: Vec<MatchFeature> = candidate
                .evaluation
                .evaluations
                .iter()
                .map(|eval| MatchFeature {
                    id: Uuid::new_v4(),
                    match_id,
                    label: format!("criterion:{}", eval.criterion_id),
                    value_numeric: Some(eval.rating.value() as f64),
                    value_text: format!("{}: {}", eval.criterion_label, eval.reason),
                })
                .collect();
            features.push(MatchFeature {
                id: Uuid::new_v4(),
                match_id,
                label: "search_hit_ratio".to_string(),
                value_numeric: Some(candidate.search_hit_ratio),
                value_text: String::new(),
            });
            rows.push((match_row, features));
        }
        self.stored.lock().unwrap().insert(job_id, rows.clone());
        Ok(rows)
    }
}

/// Construct deterministic fixture data (entities, chunks, bundles) from
/// plain string labels so tests read declaratively.
pub mod fixtures {
    use super::*;
    use crate::domain::{Document, DocumentChunk, Entity, JobStatus, MatchingJob, MatchingTemplate, ScrapeStatus};
    use serde_json::Value;

    pub fn uuid_from(label: &str) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, label.as_bytes())
    }

    pub fn entity(id: &str, workspace: &str, entity_type: &str, name: &str) -> Entity {
        Entity {
            id: uuid_from(id),
            workspace_id: uuid_from(workspace),
            entity_type_id: uuid_from(entity_type),
            name: name.to_string(),
            external_ref: None,
            metadata: Value::Null,
        }
    }

    pub fn document(id: &str, entity_id: &str, body: &str) -> Document {
        Document {
            id: uuid_from(id),
            entity_id: uuid_from(entity_id),
            scrape_status: ScrapeStatus::Completed,
            body: body.to_string(),
            metadata: Value::Null,
        }
    }

    pub fn chunk(id: &str, document_id: &str, chunk_index: u32, text: &str) -> DocumentChunk {
        DocumentChunk {
            id: uuid_from(id),
            document_id: uuid_from(document_id),
            chunk_index,
            text: text.to_string(),
            vector_store_id: None,
            metadata: Value::Null,
        }
    }

    pub fn bundle_with_chunks(id: &str, workspace: &str, entity_type: &str, name: &str, chunks: &[DocumentChunk]) -> EntityBundle {
        EntityBundle {
            entity: entity(id, workspace, entity_type, name),
            documents: vec![],
            chunks: chunks.to_vec(),
        }
    }

    pub fn template(id: &str, workspace: &str, name: &str, source_type: &str, target_type: &str, config: Value) -> MatchingTemplate {
        MatchingTemplate {
            id: uuid_from(id),
            workspace_id: uuid_from(workspace),
            name: name.to_string(),
            source_entity_type_id: uuid_from(source_type),
            target_entity_type_id: uuid_from(target_type),
            config,
        }
    }

    pub fn job(id: &str, workspace: &str, template_id: &str, source_entity: &str, config_override: Value) -> MatchingJob {
        MatchingJob {
            id: uuid_from(id),
            workspace_id: uuid_from(workspace),
            template_id: uuid_from(template_id),
            source_entity_id: uuid_from(source_entity),
            status: JobStatus::Queued,
            config_override,
            started_at: None,
            finished_at: None,
            error_message: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn vector_searcher_truncates_to_limit() {
        let searcher = InMemoryVectorSearcher::new(vec![(
            "q".into(),
            vec![
                RawHit { provider_ref: None, document_id: None, chunk_index: None, text: "a".into(), score: 0.9 },
                RawHit { provider_ref: None, document_id: None, chunk_index: None, text: "b".into(), score: 0.5 },
            ],
        )]);
        let hits = searcher
            .search(SearchRequest { workspace_id: Uuid::nil(), query: "q", limit: 1, entity_id: Uuid::nil() })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn language_model_falls_back_to_neutral_when_exhausted() {
        let llm = InMemoryLanguageModel::scripted(vec!["GOOD".into()]);
        assert_eq!(llm.structured_match_review("p").await.unwrap(), "GOOD");
        assert_eq!(llm.structured_match_review("p").await.unwrap(), "NEUTRAL");
    }
}
