//! Context detection: what kind of project the description asks for

use async_trait::async_trait;
use serde_json::{json, Value};
use stagegate_core::{ConfidenceEvaluator, StageError, StageHandler, StageOutput, StateMap};
use tracing::debug;

use crate::keywords::{first_match, matching, Rule, Words};

pub const CONTEXT_DETECTION: &str = "context_detection";

/// Longest summary kept from the description
const SUMMARY_MAX_CHARS: usize = 200;

const PROJECT_TYPES: &[Rule] = &[
    Rule {
        label: "rag_system",
        phrases: &["rag", "retrieval", "document search", "semantic search", "knowledge base"],
    },
    Rule {
        label: "cli_tool",
        phrases: &["cli", "command line", "terminal tool"],
    },
    Rule {
        label: "web_service",
        phrases: &["api", "service", "server", "backend", "microservice"],
    },
    Rule {
        label: "data_pipeline",
        phrases: &["etl", "data pipeline", "ingestion", "batch job"],
    },
    Rule {
        label: "library",
        phrases: &["library", "crate", "sdk", "package"],
    },
];

const ENTITIES: &[Rule] = &[
    Rule {
        label: "documents",
        phrases: &["document", "documents", "docs", "pdf", "pdfs"],
    },
    Rule {
        label: "search",
        phrases: &["search", "query", "queries", "lookup"],
    },
    Rule {
        label: "embeddings",
        phrases: &["embedding", "embeddings", "vector", "vectors"],
    },
    Rule {
        label: "database",
        phrases: &["database", "db", "sql", "postgres", "sqlite"],
    },
    Rule {
        label: "users",
        phrases: &["user", "users", "account", "accounts"],
    },
    Rule {
        label: "authentication",
        phrases: &["auth", "login", "authentication", "oauth"],
    },
    Rule {
        label: "files",
        phrases: &["file", "files", "directory", "filesystem"],
    },
    Rule {
        label: "http",
        phrases: &["http", "rest", "endpoint", "endpoints", "api"],
    },
];

/// Classifies the `description` into a project type and domain entities
#[derive(Debug, Clone)]
pub struct ContextClassifier {
    evaluator: ConfidenceEvaluator,
}

impl Default for ContextClassifier {
    fn default() -> Self {
        Self {
            evaluator: ConfidenceEvaluator::new([
                "project_type",
                "detected_entities",
                "context_summary",
            ])
            .with_sub_results("detected_entities"),
        }
    }
}

impl ContextClassifier {
    pub fn new() -> Self {
        Self::default()
    }
}

fn summarize(description: &str) -> String {
    let first = description
        .split(['.', '\n'])
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or("");
    first.chars().take(SUMMARY_MAX_CHARS).collect()
}

#[async_trait]
impl StageHandler for ContextClassifier {
    async fn handle(&self, state: &StateMap) -> Result<StageOutput, StageError> {
        let description = state
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let words = Words::new(description);

        let project_type = first_match(&words, PROJECT_TYPES).unwrap_or_default();
        let entities = matching(&words, ENTITIES);

        let mut update = StateMap::new();
        update.insert("project_type".into(), json!(project_type));
        update.insert("detected_entities".into(), json!(entities));
        update.insert("context_summary".into(), json!(summarize(description)));

        let evaluation = self.evaluator.evaluate(&update);
        debug!(
            project_type,
            entities = entities.len(),
            score = evaluation.score,
            "Classified context"
        );

        let mut output = StageOutput::evaluated(update, evaluation);
        if words.is_empty() {
            output = output.with_request("Describe the project you want to build");
        }
        Ok(output)
    }

    fn required_outputs(&self) -> Vec<String> {
        vec![
            "project_type".into(),
            "detected_entities".into(),
            "context_summary".into(),
        ]
    }

    fn input_keys(&self) -> Vec<String> {
        vec!["description".into()]
    }
}
