//! Rubric structure validation.
//!
//! Top-level structural problems stop validation immediately. Problems in
//! individual criteria are collected across all criteria and reported
//! together, each prefixed with the criterion's 1-based position.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Criterion, GradingError, GradingResult, Rubric};

/// A rubric that passed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOk {
    pub rubric: Rubric,
    pub criteria_count: usize,
    pub total_points: f64,
    pub message: String,
}

/// Parse rubric JSON text without checking its structure.
pub fn parse_rubric_json(raw: &str) -> GradingResult<Value> {
    serde_json::from_str(raw).map_err(|e| GradingError::Validation {
        errors: vec![format!("Invalid JSON format: {e}")],
    })
}

/// Validate rubric JSON text.
pub fn validate_str(raw: &str) -> GradingResult<ValidationOk> {
    validate(&parse_rubric_json(raw)?)
}

/// Validate a rubric document.
///
/// Returns every problem found as [`GradingError::Validation`].
pub fn validate(rubric: &Value) -> GradingResult<ValidationOk> {
    let fail = |errors: Vec<String>| Err(GradingError::Validation { errors });

    let Some(obj) = rubric.as_object() else {
        return fail(vec!["Rubric must be a JSON object".to_string()]);
    };

    let mut errors = Vec::new();
    let name = match obj.get("name") {
        None => {
            errors.push("Missing 'name' field in rubric".to_string());
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push("'name' must be a string".to_string());
            None
        }
    };

    let criteria = match obj.get("criteria") {
        None => {
            errors.push("Missing 'criteria' field in rubric".to_string());
            return fail(errors);
        }
        Some(Value::Array(items)) => items,
        Some(_) => {
            errors.push("'criteria' must be a list".to_string());
            return fail(errors);
        }
    };
    if criteria.is_empty() {
        errors.push("Rubric must have at least one criterion".to_string());
        return fail(errors);
    }

    let mut parsed = Vec::with_capacity(criteria.len());
    let mut seen: HashMap<String, usize> = HashMap::new();
    for (i, item) in criteria.iter().enumerate() {
        let position = i + 1;
        if let Some(criterion) = check_criterion(position, item, &mut errors) {
            if let Some(first) = seen.get(&criterion.name) {
                errors.push(format!(
                    "Criterion {position}: duplicate name '{}' (already used by criterion {first})",
                    criterion.name
                ));
            } else {
                seen.insert(criterion.name.clone(), position);
            }
            parsed.push(criterion);
        }
    }

    match name {
        Some(name) if errors.is_empty() => {
            let rubric = Rubric {
                name,
                criteria: parsed,
            };
            let total_points = rubric.total_points();
            let criteria_count = rubric.criteria.len();
            Ok(ValidationOk {
                message: format!(
                    "Rubric '{}' is valid with {criteria_count} criteria totaling {total_points} points",
                    rubric.name
                ),
                rubric,
                criteria_count,
                total_points,
            })
        }
        _ => fail(errors),
    }
}

/// Check one criterion, pushing its problems onto `errors`.
fn check_criterion(position: usize, item: &Value, errors: &mut Vec<String>) -> Option<Criterion> {
    let prefix = format!("Criterion {position}");
    let Some(obj) = item.as_object() else {
        errors.push(format!("{prefix}: must be an object"));
        return None;
    };
    let before = errors.len();

    let name = match obj.get("name") {
        None => {
            errors.push(format!("{prefix}: missing 'name' field"));
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push(format!("{prefix}: 'name' must be a string"));
            None
        }
    };

    let max_score = match obj.get("max_score") {
        None => {
            errors.push(format!("{prefix}: missing 'max_score' field"));
            None
        }
        Some(v) => match v.as_f64() {
            None => {
                errors.push(format!("{prefix}: 'max_score' must be a number"));
                None
            }
            Some(score) if score <= 0.0 => {
                errors.push(format!("{prefix}: 'max_score' must be positive"));
                None
            }
            Some(score) => Some(score),
        },
    };

    let description = match obj.get("description") {
        None => {
            errors.push(format!("{prefix}: missing 'description' field"));
            None
        }
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push(format!("{prefix}: 'description' must be a string"));
            None
        }
    };

    if errors.len() != before {
        return None;
    }
    Some(Criterion {
        name: name?,
        description: description?,
        max_score: max_score?,
    })
}
