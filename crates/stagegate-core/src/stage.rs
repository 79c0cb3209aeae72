//! Stage handler contract
//!
//! Handlers are supplied from outside the orchestrator. They read the
//! accumulated state and return a partial update; they never mutate the
//! execution state directly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::confidence::Evaluation;
use crate::feedback::FeedbackTarget;
use crate::types::StateMap;

/// What a stage hands back to the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub update: StateMap,
    pub confidence: f64,
    pub needs_more_info: bool,
    pub information_requests: Vec<String>,
}

impl StageOutput {
    pub fn new(update: StateMap, confidence: f64) -> Self {
        Self {
            update,
            confidence,
            ..Default::default()
        }
    }

    /// Output scored by a confidence evaluation
    pub fn evaluated(update: StateMap, evaluation: Evaluation) -> Self {
        Self {
            update,
            confidence: evaluation.score,
            needs_more_info: evaluation.needs_more_info,
            information_requests: evaluation.information_requests,
        }
    }

    pub fn with_request(mut self, request: impl Into<String>) -> Self {
        self.needs_more_info = true;
        self.information_requests.push(request.into());
        self
    }
}

/// Failure raised by a stage handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// May succeed on retry (network hiccup, rate limit)
    #[error("transient: {0}")]
    Transient(String),

    /// Will not succeed on retry
    #[error("fatal: {0}")]
    Fatal(String),
}

impl StageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// A pluggable unit of pipeline work
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Compute this stage's update from the current state
    async fn handle(&self, state: &StateMap) -> Result<StageOutput, StageError>;

    /// Keys every update must contain; a missing key makes the update invalid
    fn required_outputs(&self) -> Vec<String> {
        Vec::new()
    }

    /// Keys that must already exist in the state before this stage runs
    fn input_keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// List field that human feedback may edit during refinement
    fn feedback_target(&self) -> Option<FeedbackTarget> {
        None
    }
}

/// Keys from `required` absent in `update`
pub fn missing_outputs(update: &StateMap, required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|key| !update.contains_key(key.as_str()))
        .cloned()
        .collect()
}
