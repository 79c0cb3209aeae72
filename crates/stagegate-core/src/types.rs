//! Core type definitions for stagegate pipelines

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{ErrorKind, PipelineError, Result};

/// Accumulated pipeline data, open-ended key/value mapping
pub type StateMap = Map<String, Value>;

/// Default refinement iterations allowed per stage
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Default confidence at which a paused stage auto-approves
pub const DEFAULT_AUTO_APPROVE_THRESHOLD: f64 = 0.9;

/// Pipeline (and per-stage) execution status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Pending,
    Running,
    PausedForReview,
    Completed,
    Rejected,
    Errored,
    MaxIterationsReached,
}

impl PipelineStatus {
    /// Terminal statuses accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Rejected | Self::Errored | Self::MaxIterationsReached
        )
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::PausedForReview => write!(f, "paused_for_review"),
            Self::Completed => write!(f, "completed"),
            Self::Rejected => write!(f, "rejected"),
            Self::Errored => write!(f, "errored"),
            Self::MaxIterationsReached => write!(f, "max_iterations_reached"),
        }
    }
}

/// Reviewer verdict on a paused stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approval {
    Approved,
    Rejected,
    NeedsRefinement,
}

impl std::fmt::Display for Approval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::NeedsRefinement => write!(f, "needs_refinement"),
        }
    }
}

impl std::str::FromStr for Approval {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "approve" | "approved" | "yes" | "y" => Ok(Self::Approved),
            "reject" | "rejected" | "no" | "n" => Ok(Self::Rejected),
            "refine" | "needs_refinement" | "needsrefinement" | "needs-refinement" => {
                Ok(Self::NeedsRefinement)
            }
            _ => Err(format!("Invalid approval: {}", s)),
        }
    }
}

/// Structured human decision supplied on resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanDecision {
    #[serde(default)]
    pub feedback: String,
    pub approval: Approval,
}

impl HumanDecision {
    pub fn new(approval: Approval, feedback: impl Into<String>) -> Self {
        Self {
            feedback: feedback.into(),
            approval,
        }
    }

    pub fn approve() -> Self {
        Self::new(Approval::Approved, "")
    }

    pub fn reject(feedback: impl Into<String>) -> Self {
        Self::new(Approval::Rejected, feedback)
    }

    pub fn refine(feedback: impl Into<String>) -> Self {
        Self::new(Approval::NeedsRefinement, feedback)
    }
}

/// Confidence of a stage output against the stage's auto-approve threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub score: f64,
    pub auto_approve_threshold: f64,
}

impl ConfidenceScore {
    /// Score is clamped into [0.0, 1.0]
    pub fn new(score: f64, auto_approve_threshold: f64) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self {
            score,
            auto_approve_threshold,
        }
    }

    pub fn should_auto_approve(&self) -> bool {
        self.score >= self.auto_approve_threshold
    }
}

/// One entry of the audit error log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub stage: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorEntry {
    pub fn new(stage: Option<&str>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage: stage.map(str::to_string),
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn from_error(stage: Option<&str>, error: &PipelineError) -> Self {
        Self::new(stage, error.kind(), error.to_string())
    }
}

/// A human decision as recorded in the thread's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub stage: String,
    pub approval: Approval,
    pub feedback: String,
    pub iteration: u32,
    pub at: DateTime<Utc>,
}

/// Review request handed back to the caller when a stage pauses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReview {
    pub stage: String,
    pub snapshot: StateMap,
    pub information_requests: Vec<String>,
    pub confidence: f64,
    /// Sequence number of the checkpoint that holds this review
    pub sequence_number: u64,
}

/// Pipeline data plus the orchestrator's bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub data: StateMap,
    pub current_stage: Option<String>,
    #[serde(default)]
    pub iteration_count: BTreeMap<String, u32>,
    pub status: PipelineStatus,
    #[serde(default)]
    pub error_log: Vec<ErrorEntry>,
    #[serde(default)]
    pub pending_review: Option<PendingReview>,
    #[serde(default)]
    pub feedback_history: Vec<FeedbackRecord>,
    /// Feedback warnings waiting to be shown with the next review
    #[serde(default)]
    pub pending_warnings: Vec<String>,
}

impl ExecutionState {
    pub fn new(data: StateMap, first_stage: impl Into<String>) -> Self {
        Self {
            data,
            current_stage: Some(first_stage.into()),
            ..Default::default()
        }
    }

    /// Refinement iterations recorded for a stage
    pub fn iterations(&self, stage: &str) -> u32 {
        self.iteration_count.get(stage).copied().unwrap_or(0)
    }

    /// Top-level key overwrite of `update` into the data
    pub fn merge_update(&mut self, update: StateMap) {
        for (key, value) in update {
            self.data.insert(key, value);
        }
    }

    pub fn log_error(&mut self, entry: ErrorEntry) {
        self.error_log.push(entry);
    }
}

/// Immutable, sequence-numbered snapshot of a thread's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub sequence_number: u64,
    pub state: ExecutionState,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// First checkpoint of a thread
    pub fn initial(thread_id: impl Into<String>, state: ExecutionState) -> Self {
        Self::at(thread_id, 0, state)
    }

    pub fn at(thread_id: impl Into<String>, sequence_number: u64, state: ExecutionState) -> Self {
        Self {
            thread_id: thread_id.into(),
            sequence_number,
            state,
            created_at: Utc::now(),
        }
    }

    /// Successor checkpoint carrying `state`
    pub fn next(&self, state: ExecutionState) -> Result<Self> {
        let sequence_number = self.sequence_number.checked_add(1).ok_or_else(|| {
            PipelineError::Persistence(format!(
                "sequence number overflow for thread {}",
                self.thread_id
            ))
        })?;
        Ok(Self::at(self.thread_id.clone(), sequence_number, state))
    }

    pub fn status(&self) -> PipelineStatus {
        self.state.status
    }
}

/// Outcome of a `run` or `resume` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub thread_id: String,
    pub sequence_number: u64,
    pub status: PipelineStatus,
    pub current_stage: Option<String>,
    pub state: StateMap,
    pub pending_review: Option<PendingReview>,
    pub message: String,
}

impl ExecutionResult {
    pub fn from_checkpoint(checkpoint: &Checkpoint, message: impl Into<String>) -> Self {
        Self {
            thread_id: checkpoint.thread_id.clone(),
            sequence_number: checkpoint.sequence_number,
            status: checkpoint.state.status,
            current_stage: checkpoint.state.current_stage.clone(),
            state: checkpoint.state.data.clone(),
            pending_review: checkpoint.state.pending_review.clone(),
            message: message.into(),
        }
    }
}

/// Thread ids double as storage keys, so they must be path-safe
pub fn validate_thread_id(thread_id: &str) -> Result<()> {
    if thread_id.is_empty() {
        return Err(PipelineError::Validation("thread id is empty".to_string()));
    }
    if thread_id.len() > 128 {
        return Err(PipelineError::Validation(format!(
            "thread id longer than 128 characters: {}",
            thread_id
        )));
    }
    let valid = thread_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !thread_id.starts_with('.');
    if !valid {
        return Err(PipelineError::Validation(format!(
            "thread id may only contain ASCII letters, digits, '-', '_' and '.': {}",
            thread_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_statuses() {
        assert!(PipelineStatus::Completed.is_terminal());
        assert!(PipelineStatus::Rejected.is_terminal());
        assert!(PipelineStatus::Errored.is_terminal());
        assert!(PipelineStatus::MaxIterationsReached.is_terminal());
        assert!(!PipelineStatus::Pending.is_terminal());
        assert!(!PipelineStatus::Running.is_terminal());
        assert!(!PipelineStatus::PausedForReview.is_terminal());
    }

    #[test]
    fn test_approval_from_str() {
        assert_eq!("approve".parse::<Approval>().unwrap(), Approval::Approved);
        assert_eq!("REJECTED".parse::<Approval>().unwrap(), Approval::Rejected);
        assert_eq!(
            "needs-refinement".parse::<Approval>().unwrap(),
            Approval::NeedsRefinement
        );
        assert!("maybe".parse::<Approval>().is_err());
    }

    #[test]
    fn test_decision_serde_defaults_feedback() {
        let decision: HumanDecision =
            serde_json::from_value(json!({"approval": "approved"})).unwrap();
        assert_eq!(decision, HumanDecision::approve());
    }

    #[test]
    fn test_confidence_clamped() {
        let score = ConfidenceScore::new(1.7, 0.9);
        assert_eq!(score.score, 1.0);
        assert!(score.should_auto_approve());

        let score = ConfidenceScore::new(f64::NAN, 0.9);
        assert_eq!(score.score, 0.0);
        assert!(!score.should_auto_approve());
    }

    #[test]
    fn test_checkpoint_next_increments() {
        let cp = Checkpoint::initial("t1", ExecutionState::default());
        let next = cp.next(ExecutionState::default()).unwrap();
        assert_eq!(next.sequence_number, 1);
        assert_eq!(next.thread_id, "t1");

        let last = Checkpoint::at("t1", u64::MAX, ExecutionState::default());
        assert!(matches!(
            last.next(ExecutionState::default()),
            Err(PipelineError::Persistence(_))
        ));
    }

    #[test]
    fn test_merge_update_overwrites_top_level() {
        let mut data = StateMap::new();
        data.insert("description".into(), json!("old"));
        data.insert("keep".into(), json!(1));
        let mut state = ExecutionState::new(data, "context");

        let mut update = StateMap::new();
        update.insert("description".into(), json!("new"));
        state.merge_update(update);

        assert_eq!(state.data["description"], json!("new"));
        assert_eq!(state.data["keep"], json!(1));
    }

    #[test]
    fn test_validate_thread_id() {
        assert!(validate_thread_id("thread-1_a.b").is_ok());
        assert!(validate_thread_id("").is_err());
        assert!(validate_thread_id("../escape").is_err());
        assert!(validate_thread_id("has space").is_err());
        assert!(validate_thread_id(".hidden").is_err());
    }
}
