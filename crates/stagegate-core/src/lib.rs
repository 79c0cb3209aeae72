//! # stagegate-core
//!
//! Core types for the stagegate human-in-the-loop pipeline orchestrator.
//!
//! ## Core Paradigm
//!
//! - A thread is one pipeline execution, identified explicitly by id
//! - Every transition produces a new, sequence-numbered checkpoint
//! - A pause for review is a status inside the checkpoint, not process state
//! - Stages are pluggable handlers returning partial updates plus a confidence

mod confidence;
pub mod config;
mod error;
pub mod fail_open;
mod feedback;
mod stage;
mod types;

pub use confidence::{is_populated, ConfidenceEvaluator, Evaluation, NEEDS_MORE_INFO_BELOW};
pub use config::{StageOverride, StagePolicy, StagegateConfig};
pub use error::{ErrorKind, PipelineError, Result};
pub use feedback::{merge as merge_feedback, FeedbackTarget, MergeOutcome};
pub use stage::{missing_outputs, StageError, StageHandler, StageOutput};
pub use types::*;
