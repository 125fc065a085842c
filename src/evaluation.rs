//! Two-step LLM evaluation.
//!
//! Each criterion with at least one hit is rated, then the rating is
//! justified in a second call. Criteria with zero hits are skipped
//! entirely rather than rated against empty context.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MatchingError;
use crate::plan::{SearchCriterion, SearchPlan};
use crate::search::TargetSearchSummary;

/// A rated criterion outcome. Ordering matches severity: `Bad < Neutral
/// < Good`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum MatchRating {
    Bad = 1,
    Neutral = 2,
    Good = 3,
}

impl MatchRating {
    pub fn value(self) -> i32 {
        self as i32
    }

    /// Tolerant substring parser over an LLM's free-text rating response:
    /// uppercase and trim, then match "GOOD" before "NEUTRAL", defaulting
    /// to "BAD" when neither appears.
    pub fn from_response(response: &str) -> Self {
        let normalized = response.trim().to_uppercase();
        if normalized.contains("GOOD") {
            MatchRating::Good
        } else if normalized.contains("NEUTRAL") {
            MatchRating::Neutral
        } else {
            MatchRating::Bad
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MatchRating::Bad => "BAD",
            MatchRating::Neutral => "NEUTRAL",
            MatchRating::Good => "GOOD",
        }
    }
}

/// A single criterion's rating and the LLM's justification for it.
#[derive(Debug, Clone, PartialEq)]
pub struct CriterionEvaluation {
    pub criterion_id: String,
    pub criterion_label: String,
    pub rating: MatchRating,
    pub reason: String,
    pub rating_prompt: String,
    pub rating_response: String,
    pub reasoning_prompt: String,
    pub reasoning_response: String,
}

/// All criteria evaluations for a single target entity.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetEvaluation {
    pub target_entity_id: Uuid,
    pub evaluations: Vec<CriterionEvaluation>,
}

impl TargetEvaluation {
    pub fn average_score(&self) -> f64 {
        if self.evaluations.is_empty() {
            return 0.0;
        }
        let total: i32 = self.evaluations.iter().map(|e| e.rating.value()).sum();
        total as f64 / self.evaluations.len() as f64
    }

    /// Fraction of the plan's criteria that were actually evaluated
    /// (i.e. had at least one hit).
    pub fn coverage(&self, plan: &SearchPlan) -> f64 {
        if plan.criteria.is_empty() {
            return 0.0;
        }
        self.evaluations.len() as f64 / plan.criteria.len() as f64
    }

    pub fn summary_reason(&self) -> String {
        self.evaluations
            .iter()
            .map(|e| format!("{}: {}", e.criterion_label, e.reason))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// The two-step chat completion contract: rate, then justify.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn structured_match_review(&self, prompt: &str) -> Result<String, MatchingError>;
}

const NO_SOURCE_CONTEXT: &str = "(no source context found)";

fn build_rating_prompt(criterion: &SearchCriterion, source_evidence: &str, target_evidence: &str) -> String {
    format!(
        "Criterion: {}\nGuidance: {}\nSource evidence:\n{}\n\nTarget evidence:\n{}\n\nRate this criterion as GOOD, NEUTRAL, or BAD.",
        criterion.prompt,
        criterion.guidance.as_deref().unwrap_or("(none)"),
        source_evidence,
        target_evidence,
    )
}

fn build_reasoning_prompt(criterion: &SearchCriterion, rating: MatchRating, source_evidence: &str, target_evidence: &str) -> String {
    format!(
        "Criterion: {}\nSource evidence:\n{}\n\nTarget evidence:\n{}\n\nYou rated this {}. Explain why in one or two sentences.",
        criterion.prompt,
        source_evidence,
        target_evidence,
        rating.name(),
    )
}

fn render_evidence(hits: &[crate::search::Hit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("[{}] {}", i + 1, hit.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders a criterion's source snippets, or the "no context" literal
/// when the criterion has no source hits at all.
fn render_source_evidence(source_hits: &[crate::search::CriterionHit], criterion_id: &str) -> String {
    let hits = source_hits
        .iter()
        .find(|h| h.criterion.id == criterion_id)
        .map(|h| h.hits.as_slice())
        .unwrap_or(&[]);
    if hits.is_empty() {
        NO_SOURCE_CONTEXT.to_string()
    } else {
        render_evidence(hits)
    }
}

/// Evaluate one target against the plan, skipping criteria with zero
/// target hits. Source evidence for the same criterion id is looked up
/// from `source_hits`, falling back to a "no source context found"
/// literal when the source entity has none.
pub async fn evaluate_target(
    llm: &dyn LanguageModel,
    plan: &SearchPlan,
    source_hits: &[crate::search::CriterionHit],
    summary: &TargetSearchSummary,
) -> Result<TargetEvaluation, MatchingError> {
    let mut evaluations = Vec::new();
    for criterion_hit in &summary.hits {
        if criterion_hit.hits.is_empty() {
            continue;
        }
        let criterion = &criterion_hit.criterion;
        let source_evidence = render_source_evidence(source_hits, &criterion.id);
        let target_evidence = render_evidence(&criterion_hit.hits);

        let rating_prompt = build_rating_prompt(criterion, &source_evidence, &target_evidence);
        let rating_response = llm.structured_match_review(&rating_prompt).await?;
        let rating = MatchRating::from_response(&rating_response);

        let reasoning_prompt = build_reasoning_prompt(criterion, rating, &source_evidence, &target_evidence);
        let reasoning_response = llm.structured_match_review(&reasoning_prompt).await?;
        let reason = reasoning_response.trim().to_string();

        evaluations.push(CriterionEvaluation {
            criterion_id: criterion.id.clone(),
            criterion_label: criterion.label.clone(),
            rating,
            reason,
            rating_prompt,
            rating_response,
            reasoning_prompt,
            reasoning_response,
        });
    }
    Ok(TargetEvaluation {
        target_entity_id: summary.target_entity_id,
        evaluations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_parser_prefers_good_over_neutral() {
        assert_eq!(MatchRating::from_response("  good, but also neutral  "), MatchRating::Good);
    }

    #[test]
    fn rating_parser_falls_back_to_bad() {
        assert_eq!(MatchRating::from_response("unclear response"), MatchRating::Bad);
    }

    #[test]
    fn rating_parser_is_case_insensitive() {
        assert_eq!(MatchRating::from_response("NeUtRaL"), MatchRating::Neutral);
    }

    #[tokio::test]
    async fn evaluate_target_skips_zero_hit_criteria() {
        use crate::memory::InMemoryLanguageModel;
        use crate::search::{CriterionHit, Hit};

        let llm = InMemoryLanguageModel::scripted(vec!["GOOD".into(), "fits nicely".into()]);
        let plan = SearchPlan {
            criteria: vec![
                SearchCriterion {
                    id: "a".into(),
                    label: "A".into(),
                    prompt: "p".into(),
                    weight: 1.0,
                    guidance: None,
                    source_snippet_limit: 3,
                    target_snippet_limit: 3,
                },
                SearchCriterion {
                    id: "b".into(),
                    label: "B".into(),
                    prompt: "q".into(),
                    weight: 1.0,
                    guidance: None,
                    source_snippet_limit: 3,
                    target_snippet_limit: 3,
                },
            ],
        };
        let summary = TargetSearchSummary {
            target_entity_id: Uuid::nil(),
            hits: vec![
                CriterionHit {
                    criterion: plan.criteria[0].clone(),
                    hits: vec![Hit { chunk_id: None, text: "evidence".into(), score: 0.5 }],
                },
                CriterionHit {
                    criterion: plan.criteria[1].clone(),
                    hits: vec![],
                },
            ],
        };
        let evaluation = evaluate_target(&llm, &plan, &[], &summary).await.unwrap();
        assert_eq!(evaluation.evaluations.len(), 1);
        assert_eq!(evaluation.coverage(&plan), 0.5);
    }

    #[tokio::test]
    async fn evaluate_target_falls_back_when_source_has_no_hits() {
        use crate::memory::InMemoryLanguageModel;
        use crate::search::{CriterionHit, Hit};

        let llm = InMemoryLanguageModel::scripted(vec!["GOOD".into(), "fits nicely".into()]);
        let criterion = SearchCriterion {
            id: "a".into(),
            label: "A".into(),
            prompt: "p".into(),
            weight: 1.0,
            guidance: None,
            source_snippet_limit: 3,
            target_snippet_limit: 3,
        };
        let plan = SearchPlan { criteria: vec![criterion.clone()] };
        let summary = TargetSearchSummary {
            target_entity_id: Uuid::nil(),
            hits: vec![CriterionHit {
                criterion: criterion.clone(),
                hits: vec![Hit { chunk_id: None, text: "target evidence".into(), score: 0.5 }],
            }],
        };
        let source_hits = [CriterionHit { criterion, hits: vec![] }];

        let evaluation = evaluate_target(&llm, &plan, &source_hits, &summary).await.unwrap();

        assert_eq!(evaluation.evaluations.len(), 1);
        assert!(evaluation.evaluations[0].rating_prompt.contains(NO_SOURCE_CONTEXT));
        assert!(evaluation.evaluations[0].rating_prompt.contains("target evidence"));
    }
}
