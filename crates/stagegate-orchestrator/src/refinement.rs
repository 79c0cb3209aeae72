//! Refinement iteration bookkeeping
//!
//! The bound is checked before a stage is re-invoked: with a limit of N, the
//! N-th refinement still runs and the (N+1)-th ends the thread.

use stagegate_core::{merge_feedback, ExecutionState, MergeOutcome};

use crate::definition::PipelineStage;

/// Whether another refinement pass is allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationCheck {
    Continue { iteration: u32 },
    Exhausted { max_iterations: u32 },
}

/// Check the next iteration against the limit
pub fn next_iteration(current: u32, max_iterations: u32) -> IterationCheck {
    match current.checked_add(1) {
        Some(iteration) if iteration <= max_iterations => IterationCheck::Continue { iteration },
        _ => IterationCheck::Exhausted { max_iterations },
    }
}

/// A planned refinement pass over one stage
#[derive(Debug, Clone, PartialEq)]
pub enum Refinement {
    /// Re-run the stage after applying `merge.delta`
    Continue { iteration: u32, merge: MergeOutcome },
    /// No iterations left for the stage
    Exhausted { max_iterations: u32 },
}

/// Plan a refinement of `stage` driven by free-text `feedback`
///
/// Feedback is only interpreted when the iteration bound allows another
/// pass, and only when the stage declares a feedback target.
pub fn plan(state: &ExecutionState, stage: &PipelineStage, feedback: &str) -> Refinement {
    match next_iteration(state.iterations(stage.name()), stage.max_iterations()) {
        IterationCheck::Exhausted { max_iterations } => Refinement::Exhausted { max_iterations },
        IterationCheck::Continue { iteration } => {
            let merge = match stage.feedback_target() {
                Some(target) => merge_feedback(&state.data, feedback, target),
                None if feedback.trim().is_empty() => MergeOutcome::default(),
                None => MergeOutcome {
                    warnings: vec![format!(
                        "Stage '{}' does not accept structured feedback; re-running as is",
                        stage.name()
                    )],
                    ..Default::default()
                },
            };
            Refinement::Continue { iteration, merge }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use stagegate_core::{
        FeedbackTarget, StageError, StageHandler, StageOutput, StateMap,
    };
    use std::sync::Arc;

    struct Lister;

    #[async_trait]
    impl StageHandler for Lister {
        async fn handle(&self, _state: &StateMap) -> Result<StageOutput, StageError> {
            Ok(StageOutput::default())
        }

        fn feedback_target(&self) -> Option<FeedbackTarget> {
            Some(FeedbackTarget::new("agents", ["code_generator", "test_generator"]))
        }
    }

    struct Plain;

    #[async_trait]
    impl StageHandler for Plain {
        async fn handle(&self, _state: &StateMap) -> Result<StageOutput, StageError> {
            Ok(StageOutput::default())
        }
    }

    #[test]
    fn test_bound_checked_before_increment() {
        assert_eq!(next_iteration(0, 3), IterationCheck::Continue { iteration: 1 });
        assert_eq!(next_iteration(2, 3), IterationCheck::Continue { iteration: 3 });
        assert_eq!(
            next_iteration(3, 3),
            IterationCheck::Exhausted { max_iterations: 3 }
        );
        assert_eq!(
            next_iteration(0, 0),
            IterationCheck::Exhausted { max_iterations: 0 }
        );
        assert_eq!(
            next_iteration(u32::MAX, u32::MAX),
            IterationCheck::Exhausted {
                max_iterations: u32::MAX
            }
        );
    }

    #[test]
    fn test_plan_merges_feedback() {
        let stage = PipelineStage::new("selection", Arc::new(Lister));
        let mut data = StateMap::new();
        data.insert("agents".into(), json!(["code_generator"]));
        let state = ExecutionState::new(data, "selection");

        match plan(&state, &stage, "add test_generator") {
            Refinement::Continue { iteration, merge } => {
                assert_eq!(iteration, 1);
                assert_eq!(
                    merge.delta.get("agents"),
                    Some(&json!(["code_generator", "test_generator"]))
                );
            }
            other => panic!("unexpected plan: {:?}", other),
        }
    }

    #[test]
    fn test_plan_exhausted() {
        let stage = PipelineStage::new("selection", Arc::new(Lister)).with_max_iterations(1);
        let mut state = ExecutionState::new(StateMap::new(), "selection");
        state.iteration_count.insert("selection".into(), 1);

        assert_eq!(
            plan(&state, &stage, "add test_generator"),
            Refinement::Exhausted { max_iterations: 1 }
        );
    }

    #[test]
    fn test_plan_without_target_warns() {
        let stage = PipelineStage::new("context", Arc::new(Plain));
        let state = ExecutionState::new(StateMap::new(), "context");

        match plan(&state, &stage, "make it better") {
            Refinement::Continue { merge, .. } => {
                assert!(merge.delta.is_empty());
                assert_eq!(merge.warnings.len(), 1);
            }
            other => panic!("unexpected plan: {:?}", other),
        }

        match plan(&state, &stage, "  ") {
            Refinement::Continue { merge, .. } => assert!(merge.is_empty()),
            other => panic!("unexpected plan: {:?}", other),
        }
    }
}
