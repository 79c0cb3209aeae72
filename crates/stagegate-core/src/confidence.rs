//! Confidence scoring for stage output
//!
//! Pure and deterministic: identical output always yields an identical
//! evaluation, so stage handlers can be tested without fixtures.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::StateMap;

/// Weight of the populated-field fraction in the score
const FIELD_WEIGHT: f64 = 0.6;

/// Score added per extracted sub-result
const SUB_RESULT_WEIGHT: f64 = 0.1;

/// Below this score a stage asks for more information
pub const NEEDS_MORE_INFO_BELOW: f64 = 0.7;

/// Result of scoring a stage's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: f64,
    pub needs_more_info: bool,
    pub information_requests: Vec<String>,
}

/// Scores output by required-field coverage and sub-result count
#[derive(Debug, Clone)]
pub struct ConfidenceEvaluator {
    required_fields: Vec<String>,
    sub_result_field: Option<String>,
}

impl ConfidenceEvaluator {
    pub fn new<I, S>(required_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required_fields: required_fields.into_iter().map(Into::into).collect(),
            sub_result_field: None,
        }
    }

    /// Count the entries of this field as extracted sub-results
    pub fn with_sub_results(mut self, field: impl Into<String>) -> Self {
        self.sub_result_field = Some(field.into());
        self
    }

    pub fn evaluate(&self, output: &StateMap) -> Evaluation {
        let mut information_requests = Vec::new();

        let populated = self
            .required_fields
            .iter()
            .filter(|field| {
                let present = output.get(field.as_str()).is_some_and(is_populated);
                if !present {
                    information_requests.push(format!("Missing information for '{}'", field));
                }
                present
            })
            .count();

        let fraction = if self.required_fields.is_empty() {
            1.0
        } else {
            populated as f64 / self.required_fields.len() as f64
        };

        let sub_results = self
            .sub_result_field
            .as_deref()
            .map(|field| count_sub_results(output.get(field)))
            .unwrap_or(0);

        if let Some(field) = &self.sub_result_field {
            if sub_results == 0 {
                information_requests.push(format!("No entries could be extracted for '{}'", field));
            }
        }

        let score =
            (FIELD_WEIGHT * fraction + SUB_RESULT_WEIGHT * sub_results as f64).min(1.0);
        let needs_more_info = score < NEEDS_MORE_INFO_BELOW;

        if !needs_more_info {
            information_requests.clear();
        }

        Evaluation {
            score,
            needs_more_info,
            information_requests,
        }
    }
}

/// A value is populated when it differs from its type's default
pub fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn count_sub_results(value: Option<&Value>) -> usize {
    match value {
        Some(Value::Array(items)) => items.iter().filter(|item| is_populated(item)).count(),
        Some(Value::Object(map)) => map.len(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output(value: Value) -> StateMap {
        value.as_object().cloned().unwrap()
    }

    fn evaluator() -> ConfidenceEvaluator {
        ConfidenceEvaluator::new(["project_type", "summary"]).with_sub_results("entities")
    }

    #[test]
    fn test_empty_output_needs_info() {
        let eval = evaluator().evaluate(&StateMap::new());
        assert_eq!(eval.score, 0.0);
        assert!(eval.needs_more_info);
        assert_eq!(eval.information_requests.len(), 3);
    }

    #[test]
    fn test_full_output_scores_high() {
        let eval = evaluator().evaluate(&output(json!({
            "project_type": "rag",
            "summary": "document search",
            "entities": ["rag", "search", "documents", "api"],
        })));
        assert_eq!(eval.score, 1.0);
        assert!(!eval.needs_more_info);
        assert!(eval.information_requests.is_empty());
    }

    #[test]
    fn test_partial_output() {
        let eval = evaluator().evaluate(&output(json!({
            "project_type": "cli",
            "summary": "",
            "entities": ["cli"],
        })));
        assert!((eval.score - 0.4).abs() < 1e-9);
        assert!(eval.needs_more_info);
        assert_eq!(
            eval.information_requests,
            vec!["Missing information for 'summary'".to_string()]
        );
    }

    #[test]
    fn test_default_values_not_populated() {
        assert!(!is_populated(&json!(null)));
        assert!(!is_populated(&json!(false)));
        assert!(!is_populated(&json!(0)));
        assert!(!is_populated(&json!("  ")));
        assert!(!is_populated(&json!([])));
        assert!(!is_populated(&json!({})));
        assert!(is_populated(&json!(0.5)));
        assert!(is_populated(&json!(["x"])));
    }

    #[test]
    fn test_deterministic() {
        let out = output(json!({"project_type": "api", "entities": ["api", "auth"]}));
        assert_eq!(evaluator().evaluate(&out), evaluator().evaluate(&out));
    }
}
