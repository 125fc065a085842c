//! Persistence layer: sqlx repository implementations of the core
//! crate's provider traits.
//!
//! A single [`Db`] handle backs [`match_engine::context::ContextLoader`],
//! [`match_engine::runner::JobStore`], [`match_engine::audit::AuditRecorder`],
//! and [`match_engine::runner::MatchWriter`] — one sqlite pool, batched
//! reads, short transactions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use match_engine::aggregate::MatchCandidate;
use match_engine::audit::{AuditRecorder, SearchRecord};
use match_engine::context::{ContextLoader, EntityBundle, MatchingJobContext};
use match_engine::domain::{
    Document, DocumentChunk, Entity, JobStatus, Match, MatchFeature, MatchingJob, MatchingTemplate, QueryType,
    RunStatus, ScrapeStatus,
};
use match_engine::error::MatchingError;
use match_engine::evaluation::TargetEvaluation;
use match_engine::plan::SearchPlan;
use match_engine::runner::{JobStore, MatchWriter};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

pub struct Db {
    pool: SqlitePool,
}

fn db_err(err: sqlx::Error) -> MatchingError {
    MatchingError::Persistence(err.to_string())
}

fn parse_uuid(raw: &str) -> Result<Uuid, MatchingError> {
    Uuid::parse_str(raw).map_err(|e| MatchingError::Persistence(format!("invalid uuid '{raw}': {e}")))
}

fn parse_json(raw: &str) -> Result<Value, MatchingError> {
    serde_json::from_str(raw).map_err(|e| MatchingError::Persistence(format!("invalid json: {e}")))
}

fn parse_scrape_status(raw: &str) -> ScrapeStatus {
    match raw {
        "in_progress" => ScrapeStatus::InProgress,
        "completed" => ScrapeStatus::Completed,
        "failed" => ScrapeStatus::Failed,
        _ => ScrapeStatus::Pending,
    }
}

fn parse_job_status(raw: &str) -> JobStatus {
    match raw {
        "running" => JobStatus::Running,
        "complete" => JobStatus::Complete,
        "failed" => JobStatus::Failed,
        _ => JobStatus::Queued,
    }
}

fn in_placeholders(count: usize) -> String {
    std::iter::repeat("?").take(count).collect::<Vec<_>>().join(",")
}

impl Db {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new().max_connections(10).connect(database_url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Load entity/document/chunk bundles for every id given, in input
    /// order, using three batched `IN (...)` queries rather than one
    /// round trip per entity.
    async fn load_entity_bundles(&self, ids: &[Uuid]) -> Result<Vec<EntityBundle>, MatchingError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = in_placeholders(ids.len());

        let entity_sql = format!(
            "SELECT id, workspace_id, entity_type_id, name, external_ref, metadata FROM entities WHERE id IN ({placeholders})"
        );
        let mut query = sqlx::query(&entity_sql);
        for id in ids {
            query = query.bind(id.to_string());
        }
        let entity_rows = query.fetch_all(&self.pool).await.map_err(db_err)?;

        let mut entities = HashMap::with_capacity(entity_rows.len());
        for row in entity_rows {
            let id = parse_uuid(&row.get::<String, _>("id"))?;
            entities.insert(
                id,
                Entity {
                    id,
                    workspace_id: parse_uuid(&row.get::<String, _>("workspace_id"))?,
                    entity_type_id: parse_uuid(&row.get::<String, _>("entity_type_id"))?,
                    name: row.get("name"),
                    external_ref: row.get("external_ref"),
                    metadata: parse_json(&row.get::<String, _>("metadata"))?,
                },
            );
        }

        let document_sql = format!(
            "SELECT id, entity_id, scrape_status, body, metadata FROM documents WHERE entity_id IN ({placeholders})"
        );
        let mut query = sqlx::query(&document_sql);
        for id in ids {
            query = query.bind(id.to_string());
        }
        let document_rows = query.fetch_all(&self.pool).await.map_err(db_err)?;

        let mut documents_by_entity: HashMap<Uuid, Vec<Document>> = HashMap::new();
        for row in document_rows {
            let entity_id = parse_uuid(&row.get::<String, _>("entity_id"))?;
            let document = Document {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                entity_id,
                scrape_status: parse_scrape_status(&row.get::<String, _>("scrape_status")),
                body: row.get("body"),
                metadata: parse_json(&row.get::<String, _>("metadata"))?,
            };
            documents_by_entity.entry(entity_id).or_default().push(document);
        }

        let chunk_sql = format!(
            "SELECT dc.id, dc.document_id, dc.chunk_index, dc.text, dc.vector_store_id, dc.metadata, d.entity_id \
             FROM document_chunks dc JOIN documents d ON d.id = dc.document_id \
             WHERE d.entity_id IN ({placeholders}) ORDER BY d.entity_id, dc.document_id, dc.chunk_index"
        );
        let mut query = sqlx::query(&chunk_sql);
        for id in ids {
            query = query.bind(id.to_string());
        }
        let chunk_rows = query.fetch_all(&self.pool).await.map_err(db_err)?;

        let mut chunks_by_entity: HashMap<Uuid, Vec<DocumentChunk>> = HashMap::new();
        for row in chunk_rows {
            let entity_id = parse_uuid(&row.get::<String, _>("entity_id"))?;
            let chunk = DocumentChunk {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                document_id: parse_uuid(&row.get::<String, _>("document_id"))?,
                chunk_index: row.get::<i64, _>("chunk_index") as u32,
                text: row.get("text"),
                vector_store_id: row.get("vector_store_id"),
                metadata: parse_json(&row.get::<String, _>("metadata"))?,
            };
            chunks_by_entity.entry(entity_id).or_default().push(chunk);
        }

        let mut bundles = Vec::with_capacity(ids.len());
        for id in ids {
            let entity = entities
                .remove(id)
                .ok_or_else(|| MatchingError::Persistence(format!("entity {id} not found")))?;
            bundles.push(EntityBundle {
                entity,
                documents: documents_by_entity.remove(id).unwrap_or_default(),
                chunks: chunks_by_entity.remove(id).unwrap_or_default(),
            });
        }
        Ok(bundles)
    }

    /// Persist one emitted event as an append-only update row. `run_id`
    /// is `NULL` for events published outside an active run (the initial
    /// and terminal status announcements).
    pub async fn record_update(&self, event: &match_engine::events::MatchingJobEvent) -> Result<(), MatchingError> {
        let payload = serde_json::to_value(&event.payload).map_err(|e| MatchingError::Persistence(e.to_string()))?;
        sqlx::query(
            "INSERT INTO matching_job_updates (id, matching_job_id, run_id, event_type, payload, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(event.job_id.to_string())
        .bind(event.run_id.map(|id| id.to_string()))
        .bind(event.event_type())
        .bind(payload.to_string())
        .bind(event.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Most recent updates for a job, newest first, capped at `limit`
    /// (clamped to `1..=200`).
    pub async fn recent_updates(
        &self,
        job_id: Uuid,
        limit: u32,
    ) -> Result<Vec<match_engine::domain::MatchingJobUpdate>, MatchingError> {
        let rows = sqlx::query(
            "SELECT id, matching_job_id, run_id, event_type, payload, created_at FROM matching_job_updates \
             WHERE matching_job_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(job_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                Ok(match_engine::domain::MatchingJobUpdate {
                    id: parse_uuid(&row.get::<String, _>("id"))?,
                    matching_job_id: parse_uuid(&row.get::<String, _>("matching_job_id"))?,
                    run_id: row.get::<Option<String>, _>("run_id").map(|s| parse_uuid(&s)).transpose()?,
                    event_type: row.get("event_type"),
                    payload: parse_json(&row.get::<String, _>("payload"))?,
                    created_at: row
                        .get::<String, _>("created_at")
                        .parse()
                        .map_err(|e| MatchingError::Persistence(format!("bad timestamp: {e}")))?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ContextLoader for Db {
    async fn load(&self, job_id: Uuid) -> Result<MatchingJobContext, MatchingError> {
        let job_row = sqlx::query(
            "SELECT id, workspace_id, template_id, source_entity_id, status, config_override, started_at, finished_at, error_message \
             FROM matching_jobs WHERE id = ?",
        )
        .bind(job_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let job = MatchingJob {
            id: job_id,
            workspace_id: parse_uuid(&job_row.get::<String, _>("workspace_id"))?,
            template_id: parse_uuid(&job_row.get::<String, _>("template_id"))?,
            source_entity_id: parse_uuid(&job_row.get::<String, _>("source_entity_id"))?,
            status: parse_job_status(&job_row.get::<String, _>("status")),
            config_override: parse_json(&job_row.get::<String, _>("config_override"))?,
            started_at: job_row
                .get::<Option<String>, _>("started_at")
                .map(|s| s.parse().map_err(|e| MatchingError::Persistence(format!("bad timestamp: {e}"))))
                .transpose()?,
            finished_at: job_row
                .get::<Option<String>, _>("finished_at")
                .map(|s| s.parse().map_err(|e| MatchingError::Persistence(format!("bad timestamp: {e}"))))
                .transpose()?,
            error_message: job_row.get("error_message"),
        };

        let template_row = sqlx::query(
            "SELECT id, workspace_id, name, source_entity_type_id, target_entity_type_id, config \
             FROM matching_templates WHERE id = ?",
        )
        .bind(job.template_id.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let template = MatchingTemplate {
            id: job.template_id,
            workspace_id: parse_uuid(&template_row.get::<String, _>("workspace_id"))?,
            name: template_row.get("name"),
            source_entity_type_id: parse_uuid(&template_row.get::<String, _>("source_entity_type_id"))?,
            target_entity_type_id: parse_uuid(&template_row.get::<String, _>("target_entity_type_id"))?,
            config: parse_json(&template_row.get::<String, _>("config"))?,
        };

        let target_rows = sqlx::query("SELECT entity_id FROM matching_job_targets WHERE matching_job_id = ?")
            .bind(job_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let target_ids = target_rows
            .into_iter()
            .map(|r| parse_uuid(&r.get::<String, _>("entity_id")))
            .collect::<Result<Vec<_>, _>>()?;

        let mut source_bundles = self.load_entity_bundles(&[job.source_entity_id]).await?;
        let source = source_bundles.pop().ok_or_else(|| MatchingError::Persistence("source entity missing".into()))?;
        let targets = self.load_entity_bundles(&target_ids).await?;

        Ok(MatchingJobContext { job, template, source, targets })
    }
}

#[async_trait]
impl JobStore for Db {
    async fn status(&self, job_id: Uuid) -> Result<JobStatus, MatchingError> {
        let row = sqlx::query("SELECT status FROM matching_jobs WHERE id = ?")
            .bind(job_id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(parse_job_status(&row.get::<String, _>("status")))
    }

    async fn mark_running(&self, job_id: Uuid) -> Result<(), MatchingError> {
        sqlx::query("UPDATE matching_jobs SET status = 'running', started_at = ?, error_message = '' WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn mark_complete(&self, job_id: Uuid) -> Result<(), MatchingError> {
        sqlx::query("UPDATE matching_jobs SET status = 'complete', finished_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, message: &str) -> Result<(), MatchingError> {
        sqlx::query("UPDATE matching_jobs SET status = 'failed', finished_at = ?, error_message = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(message)
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn write_back_config(&self, job_id: Uuid, config: &serde_json::Value) -> Result<(), MatchingError> {
        sqlx::query("UPDATE matching_jobs SET config_override = ? WHERE id = ?")
            .bind(config.to_string())
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl AuditRecorder for Db {
    async fn start(&self, job_id: Uuid, plan: &SearchPlan, config_snapshot: &Value) -> Result<Uuid, MatchingError> {
        let run_id = Uuid::new_v4();
        let plan_snapshot = serde_json::to_string(&plan.criteria.iter().map(|c| {
            serde_json::json!({
                "id": c.id, "label": c.label, "prompt": c.prompt, "weight": c.weight,
                "guidance": c.guidance, "source_snippet_limit": c.source_snippet_limit,
                "target_snippet_limit": c.target_snippet_limit,
            })
        }).collect::<Vec<_>>()).map_err(|e| MatchingError::Persistence(e.to_string()))?;

        sqlx::query(
            "INSERT INTO matching_job_runs (id, matching_job_id, matching_config_snapshot, plan_snapshot, status, started_at) \
             VALUES (?, ?, ?, ?, 'running', ?)",
        )
        .bind(run_id.to_string())
        .bind(job_id.to_string())
        .bind(config_snapshot.to_string())
        .bind(plan_snapshot)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(run_id)
    }

    async fn record_search(&self, run_id: Uuid, record: SearchRecord<'_>) -> Result<(), MatchingError> {
        let (query_type, limit) = match record.query_type {
            QueryType::Source => ("source", record.criterion_hit.criterion.source_snippet_limit),
            QueryType::Target => ("target", record.criterion_hit.criterion.target_snippet_limit),
        };
        let search_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO matching_search_logs \
             (id, run_id, criterion_id, criterion_label, query_text, query_type, target_entity_id, \"limit\", returned_count) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(search_id.to_string())
        .bind(run_id.to_string())
        .bind(record.criterion_hit.criterion.id.as_str())
        .bind(record.criterion_hit.criterion.label.as_str())
        .bind(record.criterion_hit.criterion.prompt.as_str())
        .bind(query_type)
        .bind(record.target_entity_id.map(|id| id.to_string()))
        .bind(limit as i64)
        .bind(record.criterion_hit.hits.len() as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        for (index, hit) in record.criterion_hit.hits.iter().enumerate() {
            sqlx::query(
                "INSERT INTO matching_search_hit_logs (id, search_id, rank, chunk_id, chunk_text, score) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(search_id.to_string())
            .bind((index + 1) as i64)
            .bind(hit.chunk_id.map(|id| id.to_string()))
            .bind(hit.text.as_str())
            .bind(hit.score)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn record_evaluation(
        &self,
        run_id: Uuid,
        evaluation: &TargetEvaluation,
        plan: &SearchPlan,
        search_hit_ratio: f64,
    ) -> Result<(), MatchingError> {
        let evaluation_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO matching_evaluation_logs \
             (id, run_id, target_entity_id, average_score, coverage, search_hit_ratio, summary_reason) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(evaluation_id.to_string())
        .bind(run_id.to_string())
        .bind(evaluation.target_entity_id.to_string())
        .bind(evaluation.average_score())
        .bind(evaluation.coverage(plan))
        .bind(search_hit_ratio)
        .bind(evaluation.summary_reason())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        for detail in &evaluation.evaluations {
            sqlx::query(
                "INSERT INTO matching_evaluation_detail_logs \
                 (id, evaluation_id, criterion_id, criterion_label, rating_value, rating_name, \
                  rating_prompt, rating_response, reasoning_prompt, reasoning_response) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(evaluation_id.to_string())
            .bind(detail.criterion_id.as_str())
            .bind(detail.criterion_label.as_str())
            .bind(detail.rating.value() as i64)
            .bind(detail.rating.name())
            .bind(detail.rating_prompt.as_str())
            .bind(detail.rating_response.as_str())
            .bind(detail.reasoning_prompt.as_str())
            .bind(detail.reasoning_response.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn finalize(&self, run_id: Uuid, status: RunStatus, error_message: Option<&str>) -> Result<(), MatchingError> {
        let status_str = match status {
            RunStatus::Running => "running",
            RunStatus::Complete => "complete",
            RunStatus::Failed => "failed",
        };
        sqlx::query("UPDATE matching_job_runs SET status = ?, finished_at = ?, error_message = ? WHERE id = ?")
            .bind(status_str)
            .bind(Utc::now().to_rfc3339())
            .bind(match_engine::audit::truncate_error_message(error_message.unwrap_or("")))
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl MatchWriter for Db {
    /// Atomically deletes the job's prior matches and inserts the new
    /// ranked set plus per-criterion features.
    async fn replace_matches(
        &self,
        job_id: Uuid,
        source_entity_id: Uuid,
        ranked: &[MatchCandidate],
    ) -> Result<Vec<(Match, Vec<MatchFeature>)>, MatchingError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM matches WHERE matching_job_id = ?")
            .bind(job_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let mut rows = Vec::with_capacity(ranked.len());
        for (index, candidate) in ranked.iter().enumerate() {
            let match_id = Uuid::new_v4();
            let rank = (index + 1) as u32;
            let score = candidate.average_score();
            let explanation = candidate.summary_reason();

            sqlx::query(
                "INSERT INTO matches (id, matching_job_id, source_entity_id, target_entity_id, score, explanation, rank) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(match_id.to_string())
            .bind(job_id.to_string())
            .bind(source_entity_id.to_string())
            .bind(candidate.target_entity_id.to_string())
            .bind(score)
            .bind(explanation.as_str())
            .bind(rank as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            let mut features = Vec::with_capacity(candidate.evaluation.evaluations.len() + 1);
            for evaluation in &candidate.evaluation.evaluations {
                let label = format!("criterion:{}", evaluation.criterion_id);
                let value_text = format!("{}: {}", evaluation.criterion_label, evaluation.reason);
                sqlx::query(
                    "INSERT INTO match_features (id, match_id, label, value_numeric, value_text) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(match_id.to_string())
                .bind(label.as_str())
                .bind(evaluation.rating.value() as f64)
                .bind(value_text.as_str())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                features.push(MatchFeature {
                    id: Uuid::new_v4(),
                    match_id,
                    label,
                    value_numeric: Some(evaluation.rating.value() as f64),
                    value_text,
                });
            }

            sqlx::query(
                "INSERT INTO match_features (id, match_id, label, value_numeric, value_text) VALUES (?, ?, 'search_hit_ratio', ?, '')",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(match_id.to_string())
            .bind(candidate.search_hit_ratio)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            features.push(MatchFeature {
                id: Uuid::new_v4(),
                match_id,
                label: "search_hit_ratio".to_string(),
                value_numeric: Some(candidate.search_hit_ratio),
                value_text: String::new(),
            });

            rows.push((
                Match {
                    id: match_id,
                    matching_job_id: job_id,
                    source_entity_id,
                    target_entity_id: candidate.target_entity_id,
                    score,
                    explanation,
                    rank,
                },
                features,
            ));
        }

        tx.commit().await.map_err(db_err)?;
        Ok(rows)
    }
}
