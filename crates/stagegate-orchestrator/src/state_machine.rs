//! Pure state machine for thread lifecycle control flow
//!
//! This module has NO I/O. The orchestrator feeds it events and carries out
//! the returned actions; every status change of a thread passes through
//! `transition`.
//!
//! Key properties:
//! - Pure function: transition(status, event) -> (status, actions)
//! - Invalid transitions go to Errored (never panic)
//! - Terminal statuses accept no further events

use stagegate_core::PipelineStatus;

/// Things that happen to a thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Initial checkpoint written, start executing the first stage
    Start { stage: String },
    /// A stage finished and needs no review; `next` is None after the last stage
    StageAdvanced {
        stage: String,
        next: Option<String>,
        auto_approved: bool,
    },
    /// A stage finished and waits for a human decision
    ReviewRequested { stage: String },
    /// The reviewer approved the paused stage
    Approved { stage: String, next: Option<String> },
    /// The reviewer asked for another pass over the paused stage
    RefinementRequested { stage: String, iteration: u32 },
    /// The reviewer rejected the paused stage
    Rejected { stage: String },
    /// A refinement was requested with no iterations left
    IterationLimitReached { stage: String, max_iterations: u32 },
    /// A stage failed after its retry budget
    StageFailed { stage: String, message: String },
}

/// Side effects the orchestrator performs after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Invoke the named stage handler next
    InvokeStage { stage: String },
    /// Persist and return; the thread waits for `resume`
    AwaitReview { stage: String },
    /// Persist and return; the thread reached a terminal status
    Halt,
    /// Record a line in the activity journal
    LogActivity { message: String },
}

/// Pure state transition function
///
/// Any event that is not valid for `status` yields `Errored` with a
/// `Halt` action describing the rejected transition.
pub fn transition(status: PipelineStatus, event: Event) -> (PipelineStatus, Vec<Action>) {
    use PipelineStatus::*;

    match (status, event) {
        (Pending, Event::Start { stage }) => (
            Running,
            vec![
                Action::LogActivity {
                    message: format!("Run started at stage `{}`", stage),
                },
                Action::InvokeStage { stage },
            ],
        ),

        (
            Running,
            Event::StageAdvanced {
                stage,
                next,
                auto_approved,
            },
        ) => {
            let how = if auto_approved {
                "auto-approved"
            } else {
                "completed without review"
            };
            advance(format!("Stage `{}` {}", stage, how), next)
        }

        (Running, Event::ReviewRequested { stage }) => (
            PausedForReview,
            vec![
                Action::LogActivity {
                    message: format!("Stage `{}` paused for review", stage),
                },
                Action::AwaitReview { stage },
            ],
        ),

        (Running, Event::StageFailed { stage, message }) => (
            Errored,
            vec![
                Action::LogActivity {
                    message: format!("Stage `{}` failed: {}", stage, message),
                },
                Action::Halt,
            ],
        ),

        (PausedForReview, Event::Approved { stage, next }) => {
            advance(format!("Stage `{}` approved", stage), next)
        }

        (PausedForReview, Event::RefinementRequested { stage, iteration }) => (
            Running,
            vec![
                Action::LogActivity {
                    message: format!("Stage `{}` refinement {} requested", stage, iteration),
                },
                Action::InvokeStage { stage },
            ],
        ),

        (PausedForReview, Event::Rejected { stage }) => (
            Rejected,
            vec![
                Action::LogActivity {
                    message: format!("Stage `{}` rejected", stage),
                },
                Action::Halt,
            ],
        ),

        (
            PausedForReview,
            Event::IterationLimitReached {
                stage,
                max_iterations,
            },
        ) => (
            MaxIterationsReached,
            vec![
                Action::LogActivity {
                    message: format!(
                        "Stage `{}` reached its limit of {} refinements",
                        stage, max_iterations
                    ),
                },
                Action::Halt,
            ],
        ),

        (status, event) => {
            let message = format!("Invalid transition from {} on {:?}", status, event);
            (
                Errored,
                vec![Action::LogActivity { message }, Action::Halt],
            )
        }
    }
}

fn advance(message: String, next: Option<String>) -> (PipelineStatus, Vec<Action>) {
    match next {
        Some(stage) => (
            PipelineStatus::Running,
            vec![
                Action::LogActivity { message },
                Action::InvokeStage { stage },
            ],
        ),
        None => (
            PipelineStatus::Completed,
            vec![
                Action::LogActivity { message },
                Action::LogActivity {
                    message: "Pipeline completed".to_string(),
                },
                Action::Halt,
            ],
        ),
    }
}
