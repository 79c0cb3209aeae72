//! # stagegate-orchestrator
//!
//! Runs multi-stage pipelines with human review gates between stages.
//!
//! This crate provides:
//! - `PipelineDefinition`, the ordered stages and their review policy
//! - A pure state machine for the thread lifecycle
//! - The review gate and refinement bound applied to human decisions
//! - `PipelineOrchestrator`, the `run` / `resume` entry points
//! - `ActivityLogger`, a fail-open markdown journal per thread

mod activity_logger;
mod definition;
pub mod gate;
mod orchestrator;
pub mod refinement;
pub mod state_machine;

pub use activity_logger::ActivityLogger;
pub use definition::{PipelineBuilder, PipelineDefinition, PipelineStage};
pub use gate::{ArrivalVerdict, GateOutcome};
pub use orchestrator::PipelineOrchestrator;
pub use refinement::{next_iteration, IterationCheck, Refinement};
pub use state_machine::{transition, Action, Event};
