//! # stagegate-stages
//!
//! Built-in stage handlers for stagegate pipelines.
//!
//! The handlers are deterministic keyword classifiers scored with the
//! shared `ConfidenceEvaluator`:
//! - `ContextClassifier` - project type and entities from the description
//! - `AgentSelection` - generator agents, editable through feedback
//! - `RequirementAnalysis` - requirement categories, editable through feedback
//!
//! `standard_pipeline` chains them in that order.

mod context;
mod keywords;
mod pipeline;
mod requirements;
mod selection;

pub use context::{ContextClassifier, CONTEXT_DETECTION};
pub use pipeline::standard_pipeline;
pub use requirements::{RequirementAnalysis, CATEGORIES, REQUIREMENT_ANALYSIS};
pub use selection::{AgentSelection, AGENTS, AGENT_SELECTION};
