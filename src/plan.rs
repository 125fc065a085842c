//! Search-plan construction.
//!
//! A plan is the resolved, ordered list of criteria a run will actually
//! search and evaluate against. It is built once per run from the merged
//! matching configuration and never mutated afterward.

use crate::config::{CriterionDefinition, MatchingConfiguration};
use crate::error::PlanningError;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchCriterion {
    pub id: String,
    pub label: String,
    pub prompt: String,
    pub weight: f64,
    pub guidance: Option<String>,
    pub source_snippet_limit: u32,
    pub target_snippet_limit: u32,
}

impl From<&CriterionDefinition> for SearchCriterion {
    fn from(def: &CriterionDefinition) -> Self {
        Self {
            id: def.id.clone(),
            label: def.label.clone(),
            prompt: def.prompt.clone(),
            weight: def.weight,
            guidance: def.guidance.clone(),
            source_snippet_limit: def.source_snippet_limit,
            target_snippet_limit: def.target_snippet_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchPlan {
    pub criteria: Vec<SearchCriterion>,
}

impl SearchPlan {
    /// Labels in plan order, for logging and event payloads.
    pub fn top_labels(&self) -> Vec<String> {
        self.criteria.iter().map(|c| c.label.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}

/// Build a plan from an already-normalized matching configuration.
///
/// Fails if the configuration's criteria list is empty: a plan with
/// nothing to search or evaluate can never produce a meaningful score.
pub fn build_plan(config: &MatchingConfiguration) -> Result<SearchPlan, PlanningError> {
    if config.search_criteria.is_empty() {
        return Err(PlanningError(
            "matching configuration has no search criteria to plan".to_string(),
        ));
    }
    Ok(SearchPlan {
        criteria: config.search_criteria.iter().map(SearchCriterion::from).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::normalize_matching_config;
    use serde_json::json;

    #[test]
    fn rejects_empty_criteria() {
        let config = normalize_matching_config(&json!({})).unwrap();
        assert!(build_plan(&config).is_err());
    }

    #[test]
    fn preserves_criterion_order_in_top_labels() {
        let config = normalize_matching_config(&json!({"search_criteria": [
            {"label": "First", "prompt": "p1"},
            {"label": "Second", "prompt": "p2"},
        ]}))
        .unwrap();
        let plan = build_plan(&config).unwrap();
        assert_eq!(plan.top_labels(), vec!["First", "Second"]);
    }
}
