//! Scoped vector retrieval.
//!
//! Every search is scoped to a workspace and an entity: the source
//! entity for source-snippet collection, one target entity per summary
//! for target-match collection. Neither direction ever searches across
//! entity boundaries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::EntityBundle;
use crate::domain::DocumentChunk;
use crate::error::MatchingError;
use crate::plan::{SearchCriterion, SearchPlan};

/// A single ranked hit returned by a vector store, with its `chunk_id`
/// resolved against the local chunk table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hit {
    pub chunk_id: Option<Uuid>,
    pub text: String,
    pub score: f64,
}

/// A hit exactly as the vector store returned it, before local chunk
/// resolution. `provider_ref` is the store's own id for the object (a
/// vector-store id or, for legacy data, a primary key); `document_id`
/// and `chunk_index` are the fallback properties used when neither
/// resolves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawHit {
    pub provider_ref: Option<String>,
    pub document_id: Option<Uuid>,
    pub chunk_index: Option<u32>,
    pub text: String,
    pub score: f64,
}

/// Parameters a [`VectorSearcher`] implementation receives for one query.
pub struct SearchRequest<'a> {
    pub workspace_id: Uuid,
    pub query: &'a str,
    pub limit: u32,
    pub entity_id: Uuid,
}

/// Scoped vector-store retrieval, filtered to a single entity.
#[async_trait]
pub trait VectorSearcher: Send + Sync {
    async fn search(&self, request: SearchRequest<'_>) -> Result<Vec<RawHit>, MatchingError>;
}

/// Resolve a raw provider hit against an entity's local chunks: by
/// vector-store id if present, else by primary key, else by
/// `(document_id, chunk_index)` taken from the hit's own properties.
/// Unresolved hits are dropped with a debug trace, never counted as
/// failures.
fn resolve_hit(raw: RawHit, chunks: &[DocumentChunk]) -> Option<Hit> {
    let by_vector_store_id = raw
        .provider_ref
        .as_deref()
        .and_then(|r| chunks.iter().find(|c| c.vector_store_id.as_deref() == Some(r)));

    let by_primary_key = by_vector_store_id.or_else(|| {
        raw.provider_ref
            .as_deref()
            .and_then(|r| Uuid::parse_str(r).ok())
            .and_then(|id| chunks.iter().find(|c| c.id == id))
    });

    let resolved = by_primary_key.or_else(|| {
        let document_id = raw.document_id?;
        let chunk_index = raw.chunk_index?;
        chunks.iter().find(|c| c.document_id == document_id && c.chunk_index == chunk_index)
    });

    match resolved {
        Some(chunk) => Some(Hit { chunk_id: Some(chunk.id), text: raw.text, score: raw.score }),
        None => {
            tracing::debug!(
                provider_ref = ?raw.provider_ref,
                document_id = ?raw.document_id,
                chunk_index = ?raw.chunk_index,
                "dropping unresolved vector search hit",
            );
            None
        }
    }
}

/// One criterion's hits against a single entity.
#[derive(Debug, Clone, PartialEq)]
pub struct CriterionHit {
    pub criterion: SearchCriterion,
    pub hits: Vec<Hit>,
}

/// All criteria's hits against one target entity.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSearchSummary {
    pub target_entity_id: Uuid,
    pub hits: Vec<CriterionHit>,
}

impl TargetSearchSummary {
    pub fn hit_count(&self) -> usize {
        self.hits.iter().map(|h| h.hits.len()).sum()
    }
}

/// Search the source entity once per criterion, using the criterion's
/// `source_snippet_limit`.
pub async fn collect_source_snippets(
    searcher: &dyn VectorSearcher,
    workspace_id: Uuid,
    source: &EntityBundle,
    plan: &SearchPlan,
) -> Result<Vec<CriterionHit>, MatchingError> {
    let mut out = Vec::with_capacity(plan.criteria.len());
    for criterion in &plan.criteria {
        let raw = searcher
            .search(SearchRequest {
                workspace_id,
                query: &criterion.prompt,
                limit: criterion.source_snippet_limit,
                entity_id: source.entity.id,
            })
            .await?;
        let hits = raw.into_iter().filter_map(|h| resolve_hit(h, &source.chunks)).collect();
        out.push(CriterionHit {
            criterion: criterion.clone(),
            hits,
        });
    }
    Ok(out)
}

/// Search each target entity once per criterion, using the criterion's
/// `target_snippet_limit`.
pub async fn collect_target_matches(
    searcher: &dyn VectorSearcher,
    workspace_id: Uuid,
    targets: &[EntityBundle],
    plan: &SearchPlan,
) -> Result<Vec<TargetSearchSummary>, MatchingError> {
    let mut summaries = Vec::with_capacity(targets.len());
    for target in targets {
        let mut hits = Vec::with_capacity(plan.criteria.len());
        for criterion in &plan.criteria {
            let raw = searcher
                .search(SearchRequest {
                    workspace_id,
                    query: &criterion.prompt,
                    limit: criterion.target_snippet_limit,
                    entity_id: target.entity.id,
                })
                .await?;
            let found = raw.into_iter().filter_map(|h| resolve_hit(h, &target.chunks)).collect();
            hits.push(CriterionHit {
                criterion: criterion.clone(),
                hits: found,
            });
        }
        summaries.push(TargetSearchSummary {
            target_entity_id: target.entity.id,
            hits,
        });
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryVectorSearcher;

    #[tokio::test]
    async fn collect_source_snippets_queries_once_per_criterion() {
        let chunk = crate::memory::fixtures::chunk("c1", "d1", 0, "fits well");
        let searcher = InMemoryVectorSearcher::new(vec![(
            "does it fit".into(),
            vec![RawHit {
                provider_ref: Some(chunk.id.to_string()),
                document_id: None,
                chunk_index: None,
                text: "fits well".into(),
                score: 0.9,
            }],
        )]);
        let source = crate::memory::fixtures::bundle_with_chunks("e1", "w1", "t1", "Acme", &[chunk]);
        let plan = SearchPlan {
            criteria: vec![SearchCriterion {
                id: "fit".into(),
                label: "Fit".into(),
                prompt: "does it fit".into(),
                weight: 1.0,
                guidance: None,
                source_snippet_limit: 3,
                target_snippet_limit: 3,
            }],
        };
        let hits = collect_source_snippets(&searcher, Uuid::nil(), &source, &plan).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].hits.len(), 1);
    }

    #[tokio::test]
    async fn collect_source_snippets_drops_unresolved_hits() {
        let searcher = InMemoryVectorSearcher::new(vec![(
            "does it fit".into(),
            vec![RawHit {
                provider_ref: Some("not-in-local-chunks".into()),
                document_id: None,
                chunk_index: None,
                text: "fits well".into(),
                score: 0.9,
            }],
        )]);
        let source = crate::memory::fixtures::bundle_with_chunks("e1", "w1", "t1", "Acme", &[]);
        let plan = SearchPlan {
            criteria: vec![SearchCriterion {
                id: "fit".into(),
                label: "Fit".into(),
                prompt: "does it fit".into(),
                weight: 1.0,
                guidance: None,
                source_snippet_limit: 3,
                target_snippet_limit: 3,
            }],
        };
        let hits = collect_source_snippets(&searcher, Uuid::nil(), &source, &plan).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].hits.is_empty());
    }

    #[tokio::test]
    async fn hit_count_sums_across_criteria() {
        let summary = TargetSearchSummary {
            target_entity_id: Uuid::nil(),
            hits: vec![
                CriterionHit {
                    criterion: SearchCriterion {
                        id: "a".into(),
                        label: "A".into(),
                        prompt: "p".into(),
                        weight: 1.0,
                        guidance: None,
                        source_snippet_limit: 3,
                        target_snippet_limit: 3,
                    },
                    hits: vec![Hit { chunk_id: None, text: "x".into(), score: 0.1 }],
                },
                CriterionHit {
                    criterion: SearchCriterion {
                        id: "b".into(),
                        label: "B".into(),
                        prompt: "q".into(),
                        weight: 1.0,
                        guidance: None,
                        source_snippet_limit: 3,
                        target_snippet_limit: 3,
                    },
                    hits: vec![],
                },
            ],
        };
        assert_eq!(summary.hit_count(), 1);
    }
}
