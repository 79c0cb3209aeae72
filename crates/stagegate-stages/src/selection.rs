//! Agent selection: which generators should work on the project
//!
//! The selection is the list human feedback edits. Once the state holds a
//! `selected_agents` list (from an earlier pass or from merged feedback) it
//! is kept as is rather than recomputed.

use async_trait::async_trait;
use serde_json::{json, Value};
use stagegate_core::{
    ConfidenceEvaluator, FeedbackTarget, StageError, StageHandler, StageOutput, StateMap,
};
use tracing::debug;

use crate::keywords::{string_list, Words};

pub const AGENT_SELECTION: &str = "agent_selection";

/// Every agent the selection may contain
pub const AGENTS: [&str; 7] = [
    "requirements_analyzer",
    "architecture_designer",
    "code_generator",
    "test_generator",
    "documentation_generator",
    "cli_generator",
    "deployment_planner",
];

/// Agents every project starts with
const BASELINE: [&str; 3] = ["requirements_analyzer", "architecture_designer", "code_generator"];

/// Picks generator agents from the detected context
#[derive(Debug, Clone)]
pub struct AgentSelection {
    evaluator: ConfidenceEvaluator,
}

impl Default for AgentSelection {
    fn default() -> Self {
        Self {
            evaluator: ConfidenceEvaluator::new(["selected_agents"])
                .with_sub_results("selected_agents"),
        }
    }
}

impl AgentSelection {
    pub fn new() -> Self {
        Self::default()
    }

    fn propose(state: &StateMap) -> Vec<&'static str> {
        let project_type = state
            .get("project_type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let description = state
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let words = Words::new(description);

        let mut agents = BASELINE.to_vec();
        match project_type {
            "cli_tool" => agents.push("cli_generator"),
            "web_service" | "data_pipeline" => agents.push("deployment_planner"),
            "library" | "rag_system" => agents.push("documentation_generator"),
            _ => {}
        }
        if words.has_any(&["test", "tests", "tested", "testing", "coverage"]) {
            agents.push("test_generator");
        }
        if words.has_any(&["docs", "documented", "documentation", "readme"])
            && !agents.contains(&"documentation_generator")
        {
            agents.push("documentation_generator");
        }
        agents
    }
}

#[async_trait]
impl StageHandler for AgentSelection {
    async fn handle(&self, state: &StateMap) -> Result<StageOutput, StageError> {
        let agents = match string_list(state, "selected_agents") {
            Some(existing) => existing,
            None => Self::propose(state).into_iter().map(str::to_string).collect(),
        };
        debug!(agents = ?agents, "Selected agents");

        let mut update = StateMap::new();
        update.insert("selected_agents".into(), json!(agents));
        let evaluation = self.evaluator.evaluate(&update);
        Ok(StageOutput::evaluated(update, evaluation))
    }

    fn required_outputs(&self) -> Vec<String> {
        vec!["selected_agents".into()]
    }

    fn feedback_target(&self) -> Option<FeedbackTarget> {
        Some(FeedbackTarget::new("selected_agents", AGENTS))
    }
}
