//! Context loading.
//!
//! Loads everything a run needs about the job, its source entity, and its
//! candidate targets in one pass, so later stages never issue their own
//! lookups against the job/entity tables.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Document, DocumentChunk, Entity, MatchingJob, MatchingTemplate};
use crate::error::MatchingError;

/// An entity together with its documents' chunks, ordered by
/// `(document_id, chunk_index)`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityBundle {
    pub entity: Entity,
    pub documents: Vec<Document>,
    pub chunks: Vec<DocumentChunk>,
}

impl EntityBundle {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

/// Everything a run needs: the job, its template, the source entity's
/// bundle, and one bundle per target.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingJobContext {
    pub job: MatchingJob,
    pub template: MatchingTemplate,
    pub source: EntityBundle,
    pub targets: Vec<EntityBundle>,
}

impl MatchingJobContext {
    pub fn workspace_id(&self) -> Uuid {
        self.job.workspace_id
    }
}

/// Loads a job's full context in a single dependency pass.
///
/// Implementations must avoid N+1 queries: one round trip (or batched
/// equivalent) per related collection, not one per entity.
#[async_trait]
pub trait ContextLoader: Send + Sync {
    async fn load(&self, job_id: Uuid) -> Result<MatchingJobContext, MatchingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_count_reflects_loaded_chunks() {
        let bundle = EntityBundle {
            entity: crate::memory::fixtures::entity("e1", "w1", "t1", "Acme"),
            documents: vec![],
            chunks: vec![
                crate::memory::fixtures::chunk("c1", "d1", 0, "hello"),
                crate::memory::fixtures::chunk("c2", "d1", 1, "world"),
            ],
        };
        assert_eq!(bundle.chunk_count(), 2);
    }
}
