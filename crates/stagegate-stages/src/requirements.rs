//! Requirement analysis: which requirement categories the project touches

use async_trait::async_trait;
use serde_json::{json, Value};
use stagegate_core::{
    ConfidenceEvaluator, FeedbackTarget, StageError, StageHandler, StageOutput, StateMap,
};
use tracing::debug;

use crate::keywords::{matching, string_list, Rule, Words};

pub const REQUIREMENT_ANALYSIS: &str = "requirement_analysis";

pub const CATEGORIES: [&str; 8] = [
    "functional",
    "performance",
    "security",
    "scalability",
    "usability",
    "reliability",
    "compliance",
    "observability",
];

const CATEGORY_RULES: &[Rule] = &[
    Rule {
        label: "performance",
        phrases: &["fast", "latency", "performance", "quick", "throughput"],
    },
    Rule {
        label: "security",
        phrases: &["secure", "security", "auth", "authentication", "encrypted", "encryption"],
    },
    Rule {
        label: "scalability",
        phrases: &["scale", "scalable", "scaling", "million", "millions", "concurrent"],
    },
    Rule {
        label: "usability",
        phrases: &["user friendly", "ui", "ux", "intuitive", "accessible"],
    },
    Rule {
        label: "reliability",
        phrases: &["reliable", "reliability", "uptime", "available", "availability", "resilient"],
    },
    Rule {
        label: "compliance",
        phrases: &["gdpr", "hipaa", "compliance", "compliant", "audit", "soc2"],
    },
    Rule {
        label: "observability",
        phrases: &["logging", "logs", "metrics", "monitoring", "tracing", "observability"],
    },
];

/// Derives requirement categories and statements from the description
#[derive(Debug, Clone)]
pub struct RequirementAnalysis {
    evaluator: ConfidenceEvaluator,
}

impl Default for RequirementAnalysis {
    fn default() -> Self {
        Self {
            evaluator: ConfidenceEvaluator::new(["requirement_categories", "requirements"])
                .with_sub_results("requirement_categories"),
        }
    }
}

impl RequirementAnalysis {
    pub fn new() -> Self {
        Self::default()
    }
}

/// One statement per sentence of the description
fn statements(description: &str) -> Vec<String> {
    description
        .split(['.', '\n', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl StageHandler for RequirementAnalysis {
    async fn handle(&self, state: &StateMap) -> Result<StageOutput, StageError> {
        let description = state
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let words = Words::new(description);

        let categories = match string_list(state, "requirement_categories") {
            Some(existing) => existing,
            None => {
                let mut categories = Vec::new();
                if !words.is_empty() {
                    categories.push("functional".to_string());
                }
                categories.extend(matching(&words, CATEGORY_RULES).into_iter().map(str::to_string));
                categories
            }
        };
        let requirements = statements(description);
        debug!(
            categories = categories.len(),
            requirements = requirements.len(),
            "Analyzed requirements"
        );

        let mut update = StateMap::new();
        update.insert("requirement_categories".into(), json!(categories));
        update.insert("requirements".into(), json!(requirements));
        let evaluation = self.evaluator.evaluate(&update);
        Ok(StageOutput::evaluated(update, evaluation))
    }

    fn required_outputs(&self) -> Vec<String> {
        vec!["requirement_categories".into(), "requirements".into()]
    }

    fn input_keys(&self) -> Vec<String> {
        vec!["description".into()]
    }

    fn feedback_target(&self) -> Option<FeedbackTarget> {
        Some(FeedbackTarget::new("requirement_categories", CATEGORIES))
    }
}
