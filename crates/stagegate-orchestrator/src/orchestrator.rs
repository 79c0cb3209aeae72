//! Pipeline orchestrator: `run`, `resume`, `recover` and the read-only views
//!
//! Every status change goes through the pure state machine and is persisted
//! as a new checkpoint before the next step runs. A thread suspends only at
//! `PausedForReview`; `resume` picks it up from the latest checkpoint.
//! A call that stopped between checkpoints leaves `Pending` or `Running`
//! behind, which `recover` drives forward.

use chrono::Utc;
use stagegate_core::fail_open::retry_once;
use stagegate_core::{
    missing_outputs, validate_thread_id, Checkpoint, ConfidenceScore, ErrorEntry,
    ExecutionResult, ExecutionState, FeedbackRecord, HumanDecision, PendingReview,
    PipelineError, PipelineStatus, Result, StageError, StageOutput, StateMap,
};
use stagegate_store::StateStore;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::activity_logger::ActivityLogger;
use crate::definition::{PipelineDefinition, PipelineStage};
use crate::gate::{self, ArrivalVerdict, GateOutcome};
use crate::state_machine::{transition, Action, Event};

/// What the driver does after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Invoke,
    Stop,
}

/// Why a single stage attempt failed
#[derive(Debug)]
enum StageFailure {
    Handler(StageError),
    InvalidUpdate(Vec<String>),
}

impl StageFailure {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Handler(e) => e.is_transient(),
            Self::InvalidUpdate(_) => true,
        }
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handler(e) => write!(f, "{}", e),
            Self::InvalidUpdate(missing) => {
                write!(f, "update is missing required keys: {}", missing.join(", "))
            }
        }
    }
}

/// Runs threads of a pipeline against a checkpoint store
///
/// Cheap to clone; clones share the store and definition, so calls for
/// different threads can run as independent tasks.
pub struct PipelineOrchestrator<S: StateStore> {
    store: Arc<S>,
    definition: Arc<PipelineDefinition>,
    journal: Option<ActivityLogger>,
}

impl<S: StateStore> Clone for PipelineOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            definition: Arc::clone(&self.definition),
            journal: self.journal.clone(),
        }
    }
}

impl<S: StateStore> PipelineOrchestrator<S> {
    pub fn new(definition: PipelineDefinition, store: Arc<S>) -> Self {
        Self {
            store,
            definition: Arc::new(definition),
            journal: None,
        }
    }

    /// Also write a markdown journal per thread
    pub fn with_journal(mut self, journal: ActivityLogger) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Start a new run of the pipeline for `thread_id`
    ///
    /// A thread whose latest checkpoint is terminal may be run again; the
    /// new run continues its checkpoint sequence.
    pub async fn run(&self, thread_id: &str, initial_state: StateMap) -> Result<ExecutionResult> {
        self.start(thread_id, initial_state).await.inspect_err(|e| {
            warn!(thread_id, error = %e, "Run failed");
        })
    }

    /// Apply a human decision to a thread paused for review
    pub async fn resume(&self, thread_id: &str, decision: HumanDecision) -> Result<ExecutionResult> {
        self.decide(thread_id, None, decision).await.inspect_err(|e| {
            warn!(thread_id, error = %e, "Resume failed");
        })
    }

    /// Like `resume`, but only if the latest checkpoint is still the one
    /// the caller observed
    pub async fn resume_at(
        &self,
        thread_id: &str,
        observed_sequence: u64,
        decision: HumanDecision,
    ) -> Result<ExecutionResult> {
        self.decide(thread_id, Some(observed_sequence), decision)
            .await
            .inspect_err(|e| {
                warn!(thread_id, observed_sequence, error = %e, "Resume failed");
            })
    }

    /// Finish a call that was cut short after committing a `Pending` or
    /// `Running` checkpoint (failed write, crash)
    ///
    /// Re-runs the current stage from the latest checkpoint. The next write
    /// is compare-and-swap on that checkpoint, so a live call on the same
    /// thread makes this fail with `ConcurrentModification` or vice versa.
    pub async fn recover(&self, thread_id: &str) -> Result<ExecutionResult> {
        self.redrive(thread_id).await.inspect_err(|e| {
            warn!(thread_id, error = %e, "Recover failed");
        })
    }

    /// Latest checkpoint of a thread as an `ExecutionResult`
    pub async fn status(&self, thread_id: &str) -> Result<ExecutionResult> {
        validate_thread_id(thread_id)?;
        let checkpoint = self
            .store
            .load(thread_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(thread_id.to_string()))?;
        Ok(outcome(&checkpoint))
    }

    /// Every checkpoint of a thread, oldest first
    pub async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        validate_thread_id(thread_id)?;
        let history = self.store.history(thread_id).await?;
        if history.is_empty() {
            return Err(PipelineError::NotFound(thread_id.to_string()));
        }
        Ok(history)
    }

    async fn start(&self, thread_id: &str, initial_state: StateMap) -> Result<ExecutionResult> {
        validate_thread_id(thread_id)?;

        let first = self.definition.first();
        let missing: Vec<String> = first
            .handler()
            .input_keys()
            .into_iter()
            .filter(|key| !initial_state.contains_key(key.as_str()))
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::Validation(format!(
                "initial state is missing keys required by stage '{}': {}",
                first.name(),
                missing.join(", ")
            )));
        }

        let previous = self.store.load(thread_id).await?;
        if let Some(previous) = &previous {
            if !previous.status().is_terminal() {
                return Err(PipelineError::AlreadyExists(format!(
                    "{} (status: {})",
                    thread_id,
                    previous.status()
                )));
            }
        }

        let mut state = ExecutionState::new(initial_state, first.name());
        let checkpoint = match &previous {
            Some(previous) => previous.next(state.clone())?,
            None => Checkpoint::initial(thread_id, state.clone()),
        };
        self.store.save(thread_id, &checkpoint).await?;
        info!(
            thread_id,
            sequence = checkpoint.sequence_number,
            stages = self.definition.stages().len(),
            "Run started"
        );
        if let Some(journal) = &self.journal {
            journal
                .log_run_start(thread_id, checkpoint.sequence_number, &self.definition.stage_names())
                .await;
        }

        let step = self
            .apply(
                thread_id,
                &mut state,
                Event::Start {
                    stage: first.name().to_string(),
                },
            )
            .await;
        let checkpoint = self.persist(&checkpoint, state).await?;
        self.proceed(checkpoint, step).await
    }

    async fn decide(
        &self,
        thread_id: &str,
        observed_sequence: Option<u64>,
        decision: HumanDecision,
    ) -> Result<ExecutionResult> {
        validate_thread_id(thread_id)?;

        let checkpoint = self
            .store
            .load(thread_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(thread_id.to_string()))?;

        if let Some(observed) = observed_sequence {
            if checkpoint.sequence_number != observed {
                return Err(PipelineError::ConcurrentModification {
                    thread_id: thread_id.to_string(),
                    expected: checkpoint.sequence_number.saturating_add(1),
                    actual: observed.saturating_add(1),
                });
            }
        }

        if checkpoint.status() != PipelineStatus::PausedForReview {
            return Err(PipelineError::NotPaused {
                thread_id: thread_id.to_string(),
                status: checkpoint.status().to_string(),
            });
        }

        let stage_name = checkpoint.state.current_stage.clone().ok_or_else(|| {
            PipelineError::Validation(format!("paused thread {} has no current stage", thread_id))
        })?;
        let stage = self.definition.stage(&stage_name).ok_or_else(|| {
            PipelineError::Validation(format!(
                "thread {} is paused at stage '{}', which this pipeline does not define",
                thread_id, stage_name
            ))
        })?;

        let mut state = checkpoint.state.clone();
        state.pending_review = None;
        state.feedback_history.push(FeedbackRecord {
            stage: stage_name.clone(),
            approval: decision.approval,
            feedback: decision.feedback.clone(),
            iteration: state.iterations(&stage_name),
            at: Utc::now(),
        });

        info!(
            thread_id,
            stage = %stage_name,
            sequence = checkpoint.sequence_number,
            approval = %decision.approval,
            "Decision received"
        );
        if let Some(journal) = &self.journal {
            journal.log_decision(thread_id, &stage_name, &decision).await;
        }

        let event = match gate::decide(&state, stage, &decision) {
            GateOutcome::Advance => {
                state.iteration_count.remove(&stage_name);
                Event::Approved {
                    stage: stage_name.clone(),
                    next: self.next_stage_name(&stage_name),
                }
            }
            GateOutcome::Reject => Event::Rejected {
                stage: stage_name.clone(),
            },
            GateOutcome::Refine { iteration, merge } => {
                for warning in &merge.warnings {
                    warn!(thread_id, stage = %stage_name, "{}", warning);
                }
                state.merge_update(merge.delta);
                state.iteration_count.insert(stage_name.clone(), iteration);
                state.pending_warnings = merge.warnings;
                Event::RefinementRequested {
                    stage: stage_name.clone(),
                    iteration,
                }
            }
            GateOutcome::Exhausted { max_iterations } => {
                let err = PipelineError::MaxIterationsExceeded {
                    stage: stage_name.clone(),
                    max_iterations,
                };
                warn!(thread_id, stage = %stage_name, "{}", err);
                state.log_error(ErrorEntry::from_error(Some(&stage_name), &err));
                Event::IterationLimitReached {
                    stage: stage_name.clone(),
                    max_iterations,
                }
            }
        };

        let step = self.apply(thread_id, &mut state, event).await;
        // claims the observed checkpoint; a racing resume fails here
        let checkpoint = self.persist(&checkpoint, state).await?;
        self.proceed(checkpoint, step).await
    }

    async fn redrive(&self, thread_id: &str) -> Result<ExecutionResult> {
        validate_thread_id(thread_id)?;

        let checkpoint = self
            .store
            .load(thread_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(thread_id.to_string()))?;

        info!(
            thread_id,
            sequence = checkpoint.sequence_number,
            status = %checkpoint.status(),
            stage = checkpoint.state.current_stage.as_deref().unwrap_or("-"),
            "Recovering interrupted thread"
        );
        match checkpoint.status() {
            PipelineStatus::Running => self.drive(checkpoint).await,
            PipelineStatus::Pending => {
                let mut state = checkpoint.state.clone();
                let stage = match state.current_stage.clone() {
                    Some(stage) => stage,
                    None => self.definition.first().name().to_string(),
                };
                let step = self.apply(thread_id, &mut state, Event::Start { stage }).await;
                let checkpoint = self.persist(&checkpoint, state).await?;
                self.proceed(checkpoint, step).await
            }
            status => Err(PipelineError::Validation(format!(
                "thread {} has no interrupted call to recover (status: {})",
                thread_id, status
            ))),
        }
    }

    async fn proceed(&self, checkpoint: Checkpoint, step: Step) -> Result<ExecutionResult> {
        match step {
            Step::Invoke => self.drive(checkpoint).await,
            Step::Stop => Ok(outcome(&checkpoint)),
        }
    }

    /// Execute stages from `checkpoint.state.current_stage` until the thread
    /// pauses or reaches a terminal status
    async fn drive(&self, mut checkpoint: Checkpoint) -> Result<ExecutionResult> {
        let thread_id = checkpoint.thread_id.clone();

        loop {
            let mut state = checkpoint.state.clone();
            let stage_name = state.current_stage.clone().ok_or_else(|| {
                PipelineError::Validation(format!("thread {} has no stage to run", thread_id))
            })?;
            let stage = self.definition.stage(&stage_name).ok_or_else(|| {
                PipelineError::Validation(format!("unknown stage '{}'", stage_name))
            })?;

            let output = match self.invoke_stage(&thread_id, stage, &state.data).await {
                Ok(output) => output,
                Err(failure) => {
                    let err = PipelineError::StageExecution {
                        stage: stage_name.clone(),
                        message: failure.to_string(),
                    };
                    error!(thread_id = %thread_id, stage = %stage_name, "{}", err);
                    state.log_error(ErrorEntry::from_error(Some(&stage_name), &err));
                    // StageFailed always halts
                    self.apply(
                        &thread_id,
                        &mut state,
                        Event::StageFailed {
                            stage: stage_name.clone(),
                            message: failure.to_string(),
                        },
                    )
                    .await;
                    checkpoint = self.persist(&checkpoint, state).await?;
                    return Ok(outcome(&checkpoint));
                }
            };

            let StageOutput {
                update,
                confidence,
                information_requests,
                ..
            } = output.clone();
            let confidence = ConfidenceScore::new(confidence, stage.auto_approve_threshold()).score;
            debug!(
                thread_id = %thread_id,
                stage = %stage_name,
                keys = update.len(),
                confidence,
                "Stage produced update"
            );
            state.merge_update(update);

            let verdict = gate::on_arrival(stage, &output, state.iterations(&stage_name));
            let (event, review) = match verdict {
                ArrivalVerdict::Pause => {
                    let mut requests = std::mem::take(&mut state.pending_warnings);
                    requests.extend(information_requests);
                    let review = PendingReview {
                        stage: stage_name.clone(),
                        snapshot: state.data.clone(),
                        information_requests: requests,
                        confidence,
                        sequence_number: checkpoint.sequence_number.saturating_add(1),
                    };
                    state.pending_review = Some(review.clone());
                    (
                        Event::ReviewRequested {
                            stage: stage_name.clone(),
                        },
                        Some(review),
                    )
                }
                ArrivalVerdict::Advance { auto_approved } => {
                    state.pending_warnings.clear();
                    (
                        Event::StageAdvanced {
                            stage: stage_name.clone(),
                            next: self.next_stage_name(&stage_name),
                            auto_approved,
                        },
                        None,
                    )
                }
            };

            let step = self.apply(&thread_id, &mut state, event).await;
            checkpoint = self.persist(&checkpoint, state).await?;

            if let Some(review) = &review {
                info!(
                    thread_id = %thread_id,
                    stage = %stage_name,
                    sequence = checkpoint.sequence_number,
                    confidence,
                    "Paused for review"
                );
                if let Some(journal) = &self.journal {
                    journal.log_review(&thread_id, review).await;
                }
            }

            if step == Step::Stop {
                return Ok(outcome(&checkpoint));
            }
        }
    }

    /// One stage invocation, retried once on transient failures and
    /// invalid updates
    async fn invoke_stage(
        &self,
        thread_id: &str,
        stage: &PipelineStage,
        data: &StateMap,
    ) -> std::result::Result<StageOutput, StageFailure> {
        let required = stage.handler().required_outputs();
        let required = required.as_slice();
        let operation = format!("stage {} on thread {}", stage.name(), thread_id);

        retry_once(
            &operation,
            move |attempt| async move {
                debug!(thread_id, stage = stage.name(), attempt, "Invoking stage");
                let output = stage
                    .handler()
                    .handle(data)
                    .await
                    .map_err(StageFailure::Handler)?;
                let missing = missing_outputs(&output.update, required);
                if !missing.is_empty() {
                    return Err(StageFailure::InvalidUpdate(missing));
                }
                Ok(output)
            },
            StageFailure::is_retryable,
        )
        .await
    }

    /// Run one event through the state machine and carry out its side effects
    async fn apply(&self, thread_id: &str, state: &mut ExecutionState, event: Event) -> Step {
        let (status, actions) = transition(state.status, event);
        state.status = status;
        if status == PipelineStatus::Completed {
            state.current_stage = None;
        }

        let mut step = Step::Stop;
        for action in actions {
            match action {
                Action::InvokeStage { stage } => {
                    state.current_stage = Some(stage);
                    step = Step::Invoke;
                }
                Action::AwaitReview { .. } | Action::Halt => step = Step::Stop,
                Action::LogActivity { message } => {
                    debug!(thread_id, status = %status, "{}", message);
                    if let Some(journal) = &self.journal {
                        journal.log_event(thread_id, &message).await;
                    }
                }
            }
        }
        step
    }

    /// Append the successor of `previous` carrying `state`
    async fn persist(&self, previous: &Checkpoint, state: ExecutionState) -> Result<Checkpoint> {
        let next = previous.next(state)?;
        if let Err(e) = self.store.save(&next.thread_id, &next).await {
            warn!(
                thread_id = %next.thread_id,
                sequence = next.sequence_number,
                error = %e,
                "Checkpoint rejected"
            );
            return Err(e);
        }
        info!(
            thread_id = %next.thread_id,
            sequence = next.sequence_number,
            status = %next.status(),
            stage = next.state.current_stage.as_deref().unwrap_or("-"),
            "Checkpoint saved"
        );
        Ok(next)
    }

    fn next_stage_name(&self, stage: &str) -> Option<String> {
        self.definition
            .next_after(stage)
            .map(|next| next.name().to_string())
    }
}

/// Caller-facing view of a checkpoint with a status message
fn outcome(checkpoint: &Checkpoint) -> ExecutionResult {
    let state = &checkpoint.state;
    let stage = state.current_stage.as_deref().unwrap_or("-");
    let message = match state.status {
        PipelineStatus::PausedForReview => format!("Stage '{}' is waiting for review", stage),
        PipelineStatus::Completed => "Pipeline completed".to_string(),
        PipelineStatus::Rejected => format!("Rejected at stage '{}'", stage),
        PipelineStatus::Errored | PipelineStatus::MaxIterationsReached => state
            .error_log
            .last()
            .map(|entry| entry.message.clone())
            .unwrap_or_else(|| format!("Pipeline stopped: {}", state.status)),
        PipelineStatus::Pending | PipelineStatus::Running => {
            format!("Thread is {} at stage '{}'", state.status, stage)
        }
    };
    ExecutionResult::from_checkpoint(checkpoint, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use stagegate_store::MemoryStore;

    struct Fixed(f64);

    #[async_trait]
    impl stagegate_core::StageHandler for Fixed {
        async fn handle(&self, _state: &StateMap) -> std::result::Result<StageOutput, StageError> {
            let mut update = StateMap::new();
            update.insert("score".into(), json!(self.0));
            Ok(StageOutput::new(update, self.0))
        }
    }

    fn orchestrator(confidence: f64) -> PipelineOrchestrator<MemoryStore> {
        let definition = PipelineDefinition::builder()
            .stage(PipelineStage::new("only", Arc::new(Fixed(confidence))))
            .build()
            .unwrap();
        PipelineOrchestrator::new(definition, Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_every_transition_is_a_checkpoint() {
        let orch = orchestrator(0.95);
        let result = orch.run("t1", StateMap::new()).await.unwrap();
        assert_eq!(result.status, PipelineStatus::Completed);
        assert_eq!(result.current_stage, None);
        assert_eq!(result.message, "Pipeline completed");

        // pending, running, completed
        let history = orch.history("t1").await.unwrap();
        let statuses: Vec<_> = history.iter().map(|c| c.status()).collect();
        assert_eq!(
            statuses,
            vec![
                PipelineStatus::Pending,
                PipelineStatus::Running,
                PipelineStatus::Completed
            ]
        );
        assert_eq!(result.sequence_number, 2);
    }

    #[tokio::test]
    async fn test_pending_review_sequence_matches_checkpoint() {
        let orch = orchestrator(0.2);
        let result = orch.run("t1", StateMap::new()).await.unwrap();
        let review = result.pending_review.unwrap();
        assert_eq!(review.sequence_number, result.sequence_number);
        assert_eq!(review.confidence, 0.2);
        assert_eq!(review.snapshot.get("score"), Some(&json!(0.2)));
    }

    #[tokio::test]
    async fn test_status_and_history_not_found() {
        let orch = orchestrator(0.2);
        assert!(matches!(
            orch.status("missing").await,
            Err(PipelineError::NotFound(_))
        ));
        assert!(matches!(
            orch.history("missing").await,
            Err(PipelineError::NotFound(_))
        ));
        assert!(matches!(
            orch.status("bad id").await,
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn test_outcome_messages() {
        let mut state = ExecutionState::new(StateMap::new(), "only");
        state.status = PipelineStatus::Rejected;
        let cp = Checkpoint::initial("t1", state);
        assert_eq!(outcome(&cp).message, "Rejected at stage 'only'");
    }
}
