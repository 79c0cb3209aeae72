//! # stagegate-store
//!
//! Checkpoint persistence for stagegate threads.
//!
//! This crate provides:
//! - The `StateStore` trait consumed by the orchestrator
//! - `MemoryStore` for tests and embedded use
//! - `FileStore`, a durable store that survives process restarts
//!
//! Every store enforces the same append rule: a checkpoint is accepted only
//! when its sequence number is exactly one past the latest for its thread.
//! Re-saving the identical latest checkpoint is a no-op.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use stagegate_core::{Checkpoint, PipelineError, Result};

/// Durable key-value checkpoint persistence keyed by thread id
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Append a checkpoint (compare-and-swap on sequence number)
    async fn save(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<()>;

    /// Latest checkpoint of a thread
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// All checkpoints of a thread, oldest first
    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>>;

    /// Ids of every thread with at least one checkpoint
    async fn threads(&self) -> Result<Vec<String>>;
}

/// What a store should do with an incoming checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Append {
    Write,
    NoOp,
}

/// Apply the append rule against the thread's latest checkpoint
pub(crate) fn check_append(
    thread_id: &str,
    latest: Option<&Checkpoint>,
    checkpoint: &Checkpoint,
) -> Result<Append> {
    if checkpoint.thread_id != thread_id {
        return Err(PipelineError::Validation(format!(
            "checkpoint for thread {} saved under {}",
            checkpoint.thread_id, thread_id
        )));
    }

    match latest {
        None if checkpoint.sequence_number == 0 => Ok(Append::Write),
        None => Err(PipelineError::ConcurrentModification {
            thread_id: thread_id.to_string(),
            expected: 0,
            actual: checkpoint.sequence_number,
        }),
        Some(latest) if latest.sequence_number == checkpoint.sequence_number && latest == checkpoint => {
            Ok(Append::NoOp)
        }
        Some(latest) => {
            let expected = latest.sequence_number.saturating_add(1);
            if checkpoint.sequence_number == expected && latest.sequence_number != u64::MAX {
                Ok(Append::Write)
            } else {
                Err(PipelineError::ConcurrentModification {
                    thread_id: thread_id.to_string(),
                    expected,
                    actual: checkpoint.sequence_number,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagegate_core::ExecutionState;

    #[test]
    fn test_first_checkpoint_must_be_zero() {
        let cp = Checkpoint::initial("t1", ExecutionState::default());
        assert_eq!(check_append("t1", None, &cp).unwrap(), Append::Write);

        let late = Checkpoint::at("t1", 4, ExecutionState::default());
        assert!(matches!(
            check_append("t1", None, &late),
            Err(PipelineError::ConcurrentModification { expected: 0, actual: 4, .. })
        ));
    }

    #[test]
    fn test_successor_and_noop() {
        let first = Checkpoint::initial("t1", ExecutionState::default());
        let second = first.next(ExecutionState::default()).unwrap();
        assert_eq!(check_append("t1", Some(&first), &second).unwrap(), Append::Write);
        assert_eq!(check_append("t1", Some(&first), &first).unwrap(), Append::NoOp);
    }

    #[test]
    fn test_stale_and_divergent_rejected() {
        let first = Checkpoint::initial("t1", ExecutionState::default());
        let second = first.next(ExecutionState::default()).unwrap();

        // same sequence as latest but different content
        let mut divergent = second.clone();
        divergent.state.current_stage = Some("other".into());
        assert!(matches!(
            check_append("t1", Some(&second), &divergent),
            Err(PipelineError::ConcurrentModification { expected: 2, actual: 1, .. })
        ));

        let third = second.next(ExecutionState::default()).unwrap();
        assert_eq!(check_append("t1", Some(&second), &third).unwrap(), Append::Write);
        assert!(check_append("t1", Some(&second), &first).is_err());
        assert!(check_append("t1", Some(&first), &third).is_err());
    }

    #[test]
    fn test_thread_mismatch() {
        let cp = Checkpoint::initial("t1", ExecutionState::default());
        assert!(matches!(
            check_append("t2", None, &cp),
            Err(PipelineError::Validation(_))
        ));
    }
}
