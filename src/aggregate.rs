//! Candidate aggregation.
//!
//! Combines a target's evaluation with how much of the plan it actually
//! covered into a single rankable candidate.

use uuid::Uuid;

use crate::evaluation::TargetEvaluation;
use crate::plan::SearchPlan;
use crate::search::TargetSearchSummary;

/// A scored candidate, ready for ranking and persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub target_entity_id: Uuid,
    pub evaluation: TargetEvaluation,
    pub search_hit_ratio: f64,
}

impl MatchCandidate {
    pub fn average_score(&self) -> f64 {
        self.evaluation.average_score()
    }

    pub fn summary_reason(&self) -> String {
        self.evaluation.summary_reason()
    }
}

/// Fraction of the plan's criteria that returned at least one hit for
/// this target, independent of how they were rated.
pub fn calculate_hit_ratio(plan: &SearchPlan, summary: &TargetSearchSummary) -> f64 {
    if plan.criteria.is_empty() {
        return 0.0;
    }
    let hit_criteria = summary.hits.iter().filter(|h| !h.hits.is_empty()).count();
    hit_criteria as f64 / plan.criteria.len() as f64
}

pub fn build_candidate(plan: &SearchPlan, summary: &TargetSearchSummary, evaluation: TargetEvaluation) -> MatchCandidate {
    MatchCandidate {
        target_entity_id: summary.target_entity_id,
        search_hit_ratio: calculate_hit_ratio(plan, summary),
        evaluation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{CriterionEvaluation, MatchRating};
    use crate::plan::SearchCriterion;
    use crate::search::{CriterionHit, Hit};

    fn criterion(id: &str) -> SearchCriterion {
        SearchCriterion {
            id: id.into(),
            label: id.into(),
            prompt: "p".into(),
            weight: 1.0,
            guidance: None,
            source_snippet_limit: 3,
            target_snippet_limit: 3,
        }
    }

    #[test]
    fn hit_ratio_counts_criteria_with_any_hit() {
        let plan = SearchPlan {
            criteria: vec![criterion("a"), criterion("b")],
        };
        let summary = TargetSearchSummary {
            target_entity_id: Uuid::nil(),
            hits: vec![
                CriterionHit { criterion: criterion("a"), hits: vec![Hit { chunk_id: None, text: "x".into(), score: 1.0 }] },
                CriterionHit { criterion: criterion("b"), hits: vec![] },
            ],
        };
        assert_eq!(calculate_hit_ratio(&plan, &summary), 0.5);
    }

    #[test]
    fn average_score_reflects_ratings() {
        let evaluation = TargetEvaluation {
            target_entity_id: Uuid::nil(),
            evaluations: vec![
                CriterionEvaluation {
                    criterion_id: "a".into(),
                    criterion_label: "A".into(),
                    rating: MatchRating::Good,
                    reason: "fits".into(),
                    rating_prompt: String::new(),
                    rating_response: String::new(),
                    reasoning_prompt: String::new(),
                    reasoning_response: String::new(),
                },
                CriterionEvaluation {
                    criterion_id: "b".into(),
                    criterion_label: "B".into(),
                    rating: MatchRating::Bad,
                    reason: "no fit".into(),
                    rating_prompt: String::new(),
                    rating_response: String::new(),
                    reasoning_prompt: String::new(),
                    reasoning_response: String::new(),
                },
            ],
        };
        let candidate = MatchCandidate {
            target_entity_id: Uuid::nil(),
            evaluation,
            search_hit_ratio: 1.0,
        };
        assert_eq!(candidate.average_score(), 2.0);
    }
}
