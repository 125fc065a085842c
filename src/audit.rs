//! Durable audit persistence.
//!
//! Every search and evaluation a run performs is recorded, independent of
//! whether the run ultimately succeeds, so a failed job still leaves a
//! readable trail of what was searched and rated.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{QueryType, RunStatus};
use crate::error::MatchingError;
use crate::evaluation::TargetEvaluation;
use crate::plan::SearchPlan;
use crate::search::CriterionHit;

/// One recorded query and its returned hits, ready for the recorder to
/// persist as a search log plus its ranked hit rows.
pub struct SearchRecord<'a> {
    pub criterion_hit: &'a CriterionHit,
    pub query_type: QueryType,
    pub target_entity_id: Option<Uuid>,
}

/// Starts, records, and finalizes one run's audit trail.
///
/// Implementations persist independently of run outcome: `finalize_failure`
/// must succeed even though the run it describes did not.
#[async_trait]
pub trait AuditRecorder: Send + Sync {
    async fn start(&self, job_id: Uuid, plan: &SearchPlan, config_snapshot: &Value) -> Result<Uuid, MatchingError>;

    async fn record_search(&self, run_id: Uuid, record: SearchRecord<'_>) -> Result<(), MatchingError>;

    async fn record_evaluation(
        &self,
        run_id: Uuid,
        evaluation: &TargetEvaluation,
        plan: &SearchPlan,
        search_hit_ratio: f64,
    ) -> Result<(), MatchingError>;

    async fn finalize(&self, run_id: Uuid, status: RunStatus, error_message: Option<&str>) -> Result<(), MatchingError>;
}

/// Truncate an error message to the 1000-character bound the audit
/// tables enforce.
pub fn truncate_error_message(message: &str) -> String {
    if message.len() <= 1000 {
        message.to_string()
    } else {
        message.chars().take(1000).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_error_messages() {
        let long = "e".repeat(2000);
        assert_eq!(truncate_error_message(&long).len(), 1000);
    }

    #[test]
    fn leaves_short_messages_untouched() {
        assert_eq!(truncate_error_message("boom"), "boom");
    }
}
