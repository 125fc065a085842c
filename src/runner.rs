//! Job runner: state transitions and provider lifetimes.
//!
//! Drives one job through `queued → running → {complete, failed}`,
//! delegating each stage to the context loader, search coordinator,
//! evaluator, aggregator, audit recorder, and publisher, then persists
//! ranked matches and retries transient failures with backoff.

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::{build_candidate, MatchCandidate};
use crate::audit::{AuditRecorder, SearchRecord};
use crate::config::{merge_configurations, CriterionDefinition};
use crate::context::{ContextLoader, MatchingJobContext};
use crate::domain::{JobStatus, Match, MatchFeature, QueryType, RunStatus};
use crate::error::MatchingError;
use crate::evaluation::{evaluate_target, LanguageModel};
use crate::events::{
    candidate_to_evaluation_snapshots, group_name_for_job, target_search_hit_counts, CriterionHitCount,
    JobStatusWire, MatchingJobEvent, MatchingJobEventPayload, Publisher,
};
use crate::plan::build_plan;
use crate::retry::RetryPolicy;
use crate::search::{collect_source_snippets, collect_target_matches, VectorSearcher};

/// Per-run provider pair: constructed fresh for each run and released on
/// exit, never shared across concurrent jobs.
pub struct ProviderHandle {
    pub searcher: Box<dyn VectorSearcher>,
    pub llm: Box<dyn LanguageModel>,
}

/// Builds and releases the provider pair a run needs.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn build(&self) -> Result<ProviderHandle, MatchingError>;

    /// Guaranteed-on-exit release hook; default is a no-op drop.
    async fn release(&self, _handle: ProviderHandle) {}
}

/// Reads and transitions job status. Kept separate from
/// [`ContextLoader`] because the runner must update status *before* a
/// full context load ever happens (e.g. the duplicate-run guard).
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn status(&self, job_id: Uuid) -> Result<JobStatus, MatchingError>;
    async fn mark_running(&self, job_id: Uuid) -> Result<(), MatchingError>;
    async fn mark_complete(&self, job_id: Uuid) -> Result<(), MatchingError>;
    async fn mark_failed(&self, job_id: Uuid, message: &str) -> Result<(), MatchingError>;

    /// Write the normalized effective configuration back onto the job's
    /// `config_override` column. Idempotent: re-running against an
    /// already-normalized override reproduces the same effective
    /// configuration. Default is a no-op for stores that don't need
    /// durable canonicalization (e.g. in-memory test doubles).
    async fn write_back_config(&self, _job_id: Uuid, _config: &serde_json::Value) -> Result<(), MatchingError> {
        Ok(())
    }
}

/// Atomically replaces a job's persisted matches and their features.
#[async_trait]
pub trait MatchWriter: Send + Sync {
    async fn replace_matches(
        &self,
        job_id: Uuid,
        source_entity_id: Uuid,
        ranked: &[MatchCandidate],
    ) -> Result<Vec<(Match, Vec<MatchFeature>)>, MatchingError>;
}

pub struct JobRunner<'a> {
    pub jobs: &'a dyn JobStore,
    pub context: &'a dyn ContextLoader,
    pub providers: &'a dyn ProviderFactory,
    pub audit: &'a dyn AuditRecorder,
    pub publisher: &'a dyn Publisher,
    pub matches: &'a dyn MatchWriter,
    pub retry_policy: RetryPolicy,
}

impl<'a> JobRunner<'a> {
    /// Run a job to completion, retrying transient failures up to
    /// `retry_policy.max_attempts` times with backoff+jitter. Each retry
    /// starts from a fresh context load.
    pub async fn run_with_retry(&self, job_id: Uuid) -> Result<(), MatchingError> {
        let mut attempt = 0;
        loop {
            match self.run_once(job_id).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < self.retry_policy.max_attempts => {
                    let delay = self.retry_policy.delay_for(attempt);
                    warn!(job_id = %job_id, attempt, delay_ms = %delay.as_millis(), "retrying matching job after transient error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One execution attempt: the full queued/running/complete/failed
    /// state machine for a single try.
    pub async fn run_once(&self, job_id: Uuid) -> Result<(), MatchingError> {
        let current_status = self.jobs.status(job_id).await?;
        if current_status == JobStatus::Running {
            info!(job_id = %job_id, "job already running, skipping duplicate execution");
            return Ok(());
        }

        self.publish_status(job_id, None, current_status.into(), None).await;
        let handle = self.providers.build().await?;

        let outcome = self.execute(job_id, &handle).await;

        self.providers.release(handle).await;

        match outcome {
            Ok(run_id) => {
                self.jobs.mark_complete(job_id).await?;
                self.publish_status(job_id, Some(run_id), JobStatusWire::Complete, None).await;
                Ok(())
            }
            Err((run_id, err)) => {
                let message = err.truncated_message();
                self.jobs.mark_failed(job_id, &message).await?;
                self.publish_status(job_id, run_id, JobStatusWire::Failed, Some(message)).await;
                Err(err)
            }
        }
    }

    /// Returns the established run id on success, or `(run id if one was
    /// started, error)` on failure — callers use the run id, when present,
    /// to publish the terminal status event with the correct `run_id`.
    async fn execute(&self, job_id: Uuid, handle: &ProviderHandle) -> Result<Uuid, (Option<Uuid>, MatchingError)> {
        self.jobs.mark_running(job_id).await.map_err(|e| (None, e))?;

        let context = self.context.load(job_id).await.map_err(|e| (None, e))?;
        let effective_config =
            merge_configurations(&context.template.config, &context.job.config_override).map_err(|e| (None, e.into()))?;
        let plan = build_plan(&effective_config).map_err(|e| (None, e.into()))?;

        self.jobs.write_back_config(job_id, &effective_config.to_value()).await.map_err(|e| (None, e))?;

        let run_id = self
            .audit
            .start(job_id, &plan, &serde_json::to_value(&config_snapshot(&effective_config)).unwrap_or_default())
            .await
            .map_err(|e| (None, e))?;

        self.publish_criteria(job_id, run_id, &effective_config.search_criteria).await;

        let result = self.execute_run(job_id, run_id, &context, &plan, handle).await;

        match &result {
            Ok(()) => self.audit.finalize(run_id, RunStatus::Complete, None).await.map_err(|e| (Some(run_id), e))?,
            Err(err) => {
                self.audit
                    .finalize(run_id, RunStatus::Failed, Some(&err.truncated_message()))
                    .await
                    .map_err(|e| (Some(run_id), e))?;
            }
        }
        result.map(|()| run_id).map_err(|e| (Some(run_id), e))
    }

    async fn execute_run(
        &self,
        job_id: Uuid,
        run_id: Uuid,
        context: &MatchingJobContext,
        plan: &crate::plan::SearchPlan,
        handle: &ProviderHandle,
    ) -> Result<(), MatchingError> {
        let workspace_id = context.workspace_id();

        let source_hits = collect_source_snippets(handle.searcher.as_ref(), workspace_id, &context.source, plan).await?;
        for criterion_hit in &source_hits {
            self.audit
                .record_search(
                    run_id,
                    SearchRecord {
                        criterion_hit,
                        query_type: QueryType::Source,
                        target_entity_id: None,
                    },
                )
                .await?;
        }
        self.publish_source_snippets(job_id, run_id, &source_hits).await;

        let target_summaries = collect_target_matches(handle.searcher.as_ref(), workspace_id, &context.targets, plan).await?;

        let mut candidates = Vec::with_capacity(target_summaries.len());
        for summary in &target_summaries {
            for criterion_hit in &summary.hits {
                self.audit
                    .record_search(
                        run_id,
                        SearchRecord {
                            criterion_hit,
                            query_type: QueryType::Target,
                            target_entity_id: Some(summary.target_entity_id),
                        },
                    )
                    .await?;
            }
            let target_name = entity_name(context, summary.target_entity_id);
            self.publish_target_search(job_id, run_id, summary, &target_name).await;

            let evaluation = evaluate_target(handle.llm.as_ref(), plan, &source_hits, summary).await?;
            let candidate = build_candidate(plan, summary, evaluation);

            self.audit
                .record_evaluation(run_id, &candidate.evaluation, plan, candidate.search_hit_ratio)
                .await?;
            self.publish_target_evaluation(job_id, run_id, &candidate, &target_name).await;
            self.publish_target_candidate(job_id, run_id, &candidate, &target_name).await;

            candidates.push(candidate);
        }

        candidates.sort_by(|a, b| b.average_score().partial_cmp(&a.average_score()).unwrap_or(std::cmp::Ordering::Equal));

        let persisted = self.matches.replace_matches(job_id, context.job.source_entity_id, &candidates).await?;
        for (match_row, _features) in &persisted {
            let target_name = entity_name(context, match_row.target_entity_id);
            let search_hit_ratio = candidates
                .iter()
                .find(|c| c.target_entity_id == match_row.target_entity_id)
                .map(|c| c.search_hit_ratio)
                .unwrap_or(0.0);
            self.publisher
                .publish(MatchingJobEvent {
                    job_id,
                    run_id: Some(run_id),
                    timestamp: now(),
                    payload: MatchingJobEventPayload::MatchPersisted {
                        match_id: match_row.id,
                        target_id: match_row.target_entity_id,
                        target_name,
                        rank: match_row.rank,
                        score: match_row.score,
                        search_hit_ratio,
                    },
                })
                .await;
        }

        Ok(())
    }

    async fn publish_status(&self, job_id: Uuid, run_id: Option<Uuid>, status: JobStatusWire, error_message: Option<String>) {
        self.publisher
            .publish(MatchingJobEvent {
                job_id,
                run_id,
                timestamp: now(),
                payload: MatchingJobEventPayload::Status { status, error_message },
            })
            .await;
    }

    async fn publish_criteria(&self, job_id: Uuid, run_id: Uuid, criteria: &[CriterionDefinition]) {
        self.publisher
            .publish(MatchingJobEvent {
                job_id,
                run_id: Some(run_id),
                timestamp: now(),
                payload: MatchingJobEventPayload::Criteria {
                    criteria: criteria.iter().map(Into::into).collect(),
                },
            })
            .await;
    }

    async fn publish_source_snippets(&self, job_id: Uuid, run_id: Uuid, hits: &[crate::search::CriterionHit]) {
        let counts = hits
            .iter()
            .map(|h| CriterionHitCount {
                criterion_id: h.criterion.id.clone(),
                hit_count: h.hits.len(),
            })
            .collect();
        self.publisher
            .publish(MatchingJobEvent {
                job_id,
                run_id: Some(run_id),
                timestamp: now(),
                payload: MatchingJobEventPayload::SourceSnippets { counts },
            })
            .await;
    }

    async fn publish_target_search(&self, job_id: Uuid, run_id: Uuid, summary: &crate::search::TargetSearchSummary, target_name: &str) {
        let counts = target_search_hit_counts(summary);
        let total = summary.hit_count();
        self.publisher
            .publish(MatchingJobEvent {
                job_id,
                run_id: Some(run_id),
                timestamp: now(),
                payload: MatchingJobEventPayload::TargetSearch {
                    target_id: summary.target_entity_id,
                    target_name: target_name.to_string(),
                    counts,
                    total,
                },
            })
            .await;
    }

    async fn publish_target_evaluation(&self, job_id: Uuid, run_id: Uuid, candidate: &MatchCandidate, target_name: &str) {
        self.publisher
            .publish(MatchingJobEvent {
                job_id,
                run_id: Some(run_id),
                timestamp: now(),
                payload: MatchingJobEventPayload::TargetEvaluation {
                    target_id: candidate.target_entity_id,
                    target_name: target_name.to_string(),
                    average_score: candidate.average_score(),
                    coverage: candidate.search_hit_ratio,
                    criteria: candidate_to_evaluation_snapshots(candidate),
                },
            })
            .await;
    }

    async fn publish_target_candidate(&self, job_id: Uuid, run_id: Uuid, candidate: &MatchCandidate, target_name: &str) {
        self.publisher
            .publish(MatchingJobEvent {
                job_id,
                run_id: Some(run_id),
                timestamp: now(),
                payload: MatchingJobEventPayload::TargetCandidate {
                    target_id: candidate.target_entity_id,
                    target_name: target_name.to_string(),
                    score: candidate.average_score(),
                    search_hit_ratio: candidate.search_hit_ratio,
                    summary_reason: candidate.summary_reason(),
                },
            })
            .await;
    }
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

fn entity_name(context: &MatchingJobContext, entity_id: Uuid) -> String {
    context
        .targets
        .iter()
        .map(|b| &b.entity)
        .chain(std::iter::once(&context.source.entity))
        .find(|e| e.id == entity_id)
        .map(|e| e.name.clone())
        .unwrap_or_default()
}

#[derive(serde::Serialize)]
struct ConfigSnapshotCriterion<'a> {
    id: &'a str,
    label: &'a str,
    prompt: &'a str,
    weight: f64,
    guidance: &'a Option<String>,
    source_snippet_limit: u32,
    target_snippet_limit: u32,
}

#[derive(serde::Serialize)]
struct ConfigSnapshot<'a> {
    scoring_strategy: &'a str,
    description: &'a Option<String>,
    search_criteria: Vec<ConfigSnapshotCriterion<'a>>,
}

fn config_snapshot(config: &crate::config::MatchingConfiguration) -> ConfigSnapshot<'_> {
    ConfigSnapshot {
        scoring_strategy: &config.scoring_strategy,
        description: &config.description,
        search_criteria: config
            .search_criteria
            .iter()
            .map(|c| ConfigSnapshotCriterion {
                id: &c.id,
                label: &c.label,
                prompt: &c.prompt,
                weight: c.weight,
                guidance: &c.guidance,
                source_snippet_limit: c.source_snippet_limit,
                target_snippet_limit: c.target_snippet_limit,
            })
            .collect(),
    }
}

/// Derive the realtime broadcast group name a given job publishes to.
pub fn broadcast_group_for(job_id: Uuid) -> String {
    group_name_for_job(job_id)
}
