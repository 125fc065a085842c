//! Configuration normalization.
//!
//! Templates store a matching configuration as a free-form JSON document;
//! jobs may carry an override of the same shape. Both pass through
//! [`normalize_matching_config`] before anything downstream sees them, so
//! the rest of the pipeline never has to special-case missing fields or
//! out-of-range values.

use serde_json::{Map, Value};

use crate::error::ConfigurationError;

const MAX_CRITERIA: usize = 20;
const MIN_LIMIT: u32 = 1;
const MAX_LIMIT: u32 = 10;
const DEFAULT_LIMIT: u32 = 3;
const DEFAULT_WEIGHT: f64 = 1.0;

/// One normalized search criterion.
#[derive(Debug, Clone, PartialEq)]
pub struct CriterionDefinition {
    pub id: String,
    pub label: String,
    pub prompt: String,
    pub weight: f64,
    pub guidance: Option<String>,
    pub source_snippet_limit: u32,
    pub target_snippet_limit: u32,
}

impl CriterionDefinition {
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("id".into(), Value::String(self.id.clone()));
        map.insert("label".into(), Value::String(self.label.clone()));
        map.insert("prompt".into(), Value::String(self.prompt.clone()));
        map.insert(
            "weight".into(),
            serde_json::Number::from_f64(self.weight)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );
        map.insert(
            "guidance".into(),
            self.guidance.clone().map(Value::String).unwrap_or(Value::Null),
        );
        map.insert("source_snippet_limit".into(), Value::from(self.source_snippet_limit));
        map.insert("target_snippet_limit".into(), Value::from(self.target_snippet_limit));
        Value::Object(map)
    }
}

/// A normalized, ready-to-use matching configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingConfiguration {
    pub scoring_strategy: String,
    pub description: Option<String>,
    pub search_criteria: Vec<CriterionDefinition>,
}

impl MatchingConfiguration {
    /// Canonical JSON form, written back onto storage after every
    /// successful merge so a re-read always sees the normalized shape.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("scoring_strategy".into(), Value::String(self.scoring_strategy.clone()));
        map.insert(
            "description".into(),
            self.description.clone().map(Value::String).unwrap_or(Value::Null),
        );
        map.insert(
            "search_criteria".into(),
            Value::Array(self.search_criteria.iter().map(CriterionDefinition::to_value).collect()),
        );
        Value::Object(map)
    }
}

fn normalize_string(value: Option<&Value>, field: &str) -> Result<Option<String>, ConfigurationError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
        Some(other) => Err(ConfigurationError::new(field, format!("must be a string, got {other}"))),
    }
}

fn normalize_weight(value: Option<&Value>) -> Result<f64, ConfigurationError> {
    match value {
        None | Some(Value::Null) => Ok(DEFAULT_WEIGHT),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| ConfigurationError::new("weight", "must be a finite number")),
        Some(other) => Err(ConfigurationError::new("weight", format!("must be numeric, got {other}"))),
    }
}

fn normalize_limit(value: Option<&Value>, field: &str) -> Result<u32, ConfigurationError> {
    let raw = match value {
        None | Some(Value::Null) => return Ok(DEFAULT_LIMIT),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| ConfigurationError::new(field, "must be an integer"))?,
        Some(other) => return Err(ConfigurationError::new(field, format!("must be an integer, got {other}"))),
    };
    if raw < MIN_LIMIT as i64 || raw > MAX_LIMIT as i64 {
        return Err(ConfigurationError::new(
            field,
            format!("must satisfy {MIN_LIMIT} <= v <= {MAX_LIMIT}, got {raw}"),
        ));
    }
    Ok(raw as u32)
}

/// Lowercase, hyphenate, and strip anything that isn't alphanumeric — a
/// minimal stand-in for a slug library, good enough for generating a
/// stable id from a criterion label.
fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_dash = true;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

fn normalize_criterion(raw: &Value, index: usize) -> Result<CriterionDefinition, ConfigurationError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| ConfigurationError::new("search_criteria", format!("entry {index} must be an object")))?;

    let label = normalize_string(obj.get("label").or_else(|| obj.get("name")), "label")?
        .ok_or_else(|| ConfigurationError::new("search_criteria", format!("entry {index} is missing a label")))?;

    let prompt = normalize_string(
        obj.get("prompt").or_else(|| obj.get("query")).or_else(|| obj.get("description")),
        "prompt",
    )?
    .ok_or_else(|| ConfigurationError::new("search_criteria", format!("entry {index} is missing a prompt")))?;

    let id = match normalize_string(obj.get("id").or_else(|| obj.get("key")), "id")? {
        Some(id) => id,
        None => {
            let slug = slugify(&label);
            if slug.is_empty() {
                format!("criterion-{}", index + 1)
            } else {
                slug
            }
        }
    };

    let guidance = normalize_string(obj.get("guidance"), "guidance")?;
    let weight = normalize_weight(obj.get("weight"))?;
    let source_snippet_limit = normalize_limit(obj.get("source_snippet_limit"), "source_snippet_limit")?;
    let target_snippet_limit = normalize_limit(obj.get("target_snippet_limit"), "target_snippet_limit")?;

    Ok(CriterionDefinition {
        id,
        label,
        prompt,
        weight,
        guidance,
        source_snippet_limit,
        target_snippet_limit,
    })
}

/// Normalize a raw `search_criteria` array, enforcing the max-20 bound and
/// rejecting duplicate ids.
pub fn normalize_search_criteria(raw: &Value) -> Result<Vec<CriterionDefinition>, ConfigurationError> {
    let entries = match raw {
        Value::Null => return Ok(Vec::new()),
        Value::Array(entries) => entries,
        other => return Err(ConfigurationError::new("search_criteria", format!("must be an array, got {other}"))),
    };

    if entries.len() > MAX_CRITERIA {
        return Err(ConfigurationError::new(
            "search_criteria",
            format!("at most {MAX_CRITERIA} criteria are allowed, got {}", entries.len()),
        ));
    }

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let criterion = normalize_criterion(entry, index)?;
        if !seen.insert(criterion.id.clone()) {
            return Err(ConfigurationError::new(
                "search_criteria",
                format!("duplicate criterion id '{}'", criterion.id),
            ));
        }
        out.push(criterion);
    }
    Ok(out)
}

/// Normalize a full matching-configuration document.
pub fn normalize_matching_config(raw: &Value) -> Result<MatchingConfiguration, ConfigurationError> {
    let obj = raw.as_object().cloned().unwrap_or_default();

    let scoring_strategy = normalize_string(obj.get("scoring_strategy"), "scoring_strategy")?
        .unwrap_or_else(|| "average".to_string());
    let description = normalize_string(obj.get("description"), "description")?;
    let search_criteria = normalize_search_criteria(obj.get("search_criteria").unwrap_or(&Value::Null))?;

    Ok(MatchingConfiguration {
        scoring_strategy,
        description,
        search_criteria,
    })
}

/// Merge a template's base configuration with a job's override.
///
/// Scalar fields in the override take precedence when present;
/// `search_criteria` replaces the template's list wholesale when the
/// override supplies a non-empty list, otherwise the template's criteria
/// are kept as-is.
pub fn merge_configurations(template: &Value, overlay: &Value) -> Result<MatchingConfiguration, ConfigurationError> {
    let template_obj = template.as_object().cloned().unwrap_or_default();
    let overlay_obj = overlay.as_object().cloned().unwrap_or_default();

    let mut merged = template_obj.clone();
    for (key, value) in overlay_obj.iter() {
        if key == "search_criteria" {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }

    let overlay_criteria = overlay_obj.get("search_criteria");
    let use_overlay_criteria = matches!(overlay_criteria, Some(Value::Array(v)) if !v.is_empty());
    if use_overlay_criteria {
        merged.insert("search_criteria".into(), overlay_criteria.cloned().unwrap());
    } else if let Some(base) = template_obj.get("search_criteria") {
        merged.insert("search_criteria".into(), base.clone());
    }

    normalize_matching_config(&Value::Object(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derives_id_from_label_when_absent() {
        let raw = json!({"search_criteria": [{"label": "Core Product Fit", "prompt": "does it fit?"}]});
        let cfg = normalize_matching_config(&raw).unwrap();
        assert_eq!(cfg.search_criteria[0].id, "core-product-fit");
    }

    #[test]
    fn falls_back_to_positional_id_for_empty_label_slug() {
        let raw = json!({"search_criteria": [{"label": "***", "prompt": "p"}]});
        let cfg = normalize_matching_config(&raw).unwrap();
        assert_eq!(cfg.search_criteria[0].id, "criterion-1");
    }

    #[test]
    fn rejects_duplicate_ids() {
        let raw = json!({"search_criteria": [
            {"id": "x", "label": "A", "prompt": "p"},
            {"id": "x", "label": "B", "prompt": "q"},
        ]});
        assert!(normalize_matching_config(&raw).is_err());
    }

    #[test]
    fn rejects_more_than_twenty_criteria() {
        let entries: Vec<Value> = (0..21)
            .map(|i| json!({"label": format!("c{i}"), "prompt": "p"}))
            .collect();
        let raw = json!({"search_criteria": entries});
        assert!(normalize_matching_config(&raw).is_err());
    }

    #[test]
    fn rejects_limits_outside_bounds() {
        let too_high = json!({"search_criteria": [
            {"label": "A", "prompt": "p", "source_snippet_limit": 99},
        ]});
        assert!(normalize_matching_config(&too_high).is_err());

        let too_low = json!({"search_criteria": [
            {"label": "A", "prompt": "p", "target_snippet_limit": 0},
        ]});
        assert!(normalize_matching_config(&too_low).is_err());
    }

    #[test]
    fn merge_keeps_template_criteria_when_override_empty() {
        let template = json!({"search_criteria": [{"label": "A", "prompt": "p"}], "scoring_strategy": "average"});
        let overlay = json!({"scoring_strategy": "weighted", "search_criteria": []});
        let merged = merge_configurations(&template, &overlay).unwrap();
        assert_eq!(merged.scoring_strategy, "weighted");
        assert_eq!(merged.search_criteria.len(), 1);
    }

    #[test]
    fn merge_replaces_criteria_when_override_nonempty() {
        let template = json!({"search_criteria": [{"label": "A", "prompt": "p"}]});
        let overlay = json!({"search_criteria": [{"label": "B", "prompt": "q"}]});
        let merged = merge_configurations(&template, &overlay).unwrap();
        assert_eq!(merged.search_criteria.len(), 1);
        assert_eq!(merged.search_criteria[0].label, "B");
    }
}
