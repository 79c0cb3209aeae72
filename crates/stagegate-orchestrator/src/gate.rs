//! Human-in-the-loop review gate
//!
//! Two decisions live here. `on_arrival` runs when a stage has produced
//! its output and picks between advancing and pausing. `decide` runs when a
//! human answers a pause and turns their decision into an outcome the
//! orchestrator applies to the state.

use stagegate_core::{
    Approval, ConfidenceScore, ExecutionState, HumanDecision, MergeOutcome, StageOutput,
};

use crate::definition::PipelineStage;
use crate::refinement::{self, Refinement};

/// What happens right after a stage produced its output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalVerdict {
    /// Move on without a human; `auto_approved` is false when the stage
    /// does not pause at all
    Advance { auto_approved: bool },
    /// Stop and wait for a human decision
    Pause,
}

/// How a human decision changes the thread
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Advance,
    Reject,
    Refine { iteration: u32, merge: MergeOutcome },
    Exhausted { max_iterations: u32 },
}

/// Pick between advancing and pausing for a freshly produced output
///
/// Auto-approval only applies to a stage's first pass. Once a human has
/// asked for a refinement, the refined output is always shown to them.
pub fn on_arrival(stage: &PipelineStage, output: &StageOutput, iterations: u32) -> ArrivalVerdict {
    if !stage.pause_after() {
        return ArrivalVerdict::Advance {
            auto_approved: false,
        };
    }

    let confidence = ConfidenceScore::new(output.confidence, stage.auto_approve_threshold());
    if iterations == 0 && confidence.should_auto_approve() {
        ArrivalVerdict::Advance {
            auto_approved: true,
        }
    } else {
        ArrivalVerdict::Pause
    }
}

/// Interpret a human decision on the paused `stage`
pub fn decide(state: &ExecutionState, stage: &PipelineStage, decision: &HumanDecision) -> GateOutcome {
    match decision.approval {
        Approval::Approved => GateOutcome::Advance,
        Approval::Rejected => GateOutcome::Reject,
        Approval::NeedsRefinement => match refinement::plan(state, stage, &decision.feedback) {
            Refinement::Continue { iteration, merge } => GateOutcome::Refine { iteration, merge },
            Refinement::Exhausted { max_iterations } => GateOutcome::Exhausted { max_iterations },
        },
    }
}
