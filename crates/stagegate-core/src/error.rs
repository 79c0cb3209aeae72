//! Unified error types for stagegate

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Thread already has an active run: {0}")]
    AlreadyExists(String),

    #[error("Thread not found: {0}")]
    NotFound(String),

    #[error("Thread {thread_id} is not paused for review (status: {status})")]
    NotPaused { thread_id: String, status: String },

    // Stage errors
    #[error("Stage '{stage}' failed: {message}")]
    StageExecution { stage: String, message: String },

    #[error("Stage '{stage}' exceeded {max_iterations} refinement iterations")]
    MaxIterationsExceeded { stage: String, max_iterations: u32 },

    // Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// `expected` is the sequence number the store accepts next, `actual`
    /// the one the write (or the caller's observed checkpoint) would produce
    #[error(
        "Concurrent modification of thread {thread_id}: next sequence is {expected}, attempted {actual}"
    )]
    ConcurrentModification {
        thread_id: String,
        expected: u64,
        actual: u64,
    },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse error category used for the audit log and caller-side dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    StageExecution,
    Persistence,
    MaxIterationsExceeded,
    ConcurrentModification,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::StageExecution => write!(f, "stage_execution"),
            Self::Persistence => write!(f, "persistence"),
            Self::MaxIterationsExceeded => write!(f, "max_iterations_exceeded"),
            Self::ConcurrentModification => write!(f, "concurrent_modification"),
        }
    }
}

impl PipelineError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::AlreadyExists(_)
            | Self::NotFound(_)
            | Self::NotPaused { .. }
            | Self::Config(_) => ErrorKind::Validation,
            Self::StageExecution { .. } => ErrorKind::StageExecution,
            Self::MaxIterationsExceeded { .. } => ErrorKind::MaxIterationsExceeded,
            Self::Persistence(_) | Self::Io(_) | Self::Serialization(_) => ErrorKind::Persistence,
            Self::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
        }
    }

    /// Whether the caller may retry against a fresh checkpoint
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

/// Result type alias using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            PipelineError::NotFound("t1".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            PipelineError::Persistence("disk full".into()).kind(),
            ErrorKind::Persistence
        );
        let err = PipelineError::ConcurrentModification {
            thread_id: "t1".into(),
            expected: 2,
            actual: 3,
        };
        assert_eq!(err.kind(), ErrorKind::ConcurrentModification);
        assert!(err.is_retryable());
        assert!(!PipelineError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = PipelineError::NotPaused {
            thread_id: "t9".into(),
            status: "completed".into(),
        };
        assert_eq!(
            err.to_string(),
            "Thread t9 is not paused for review (status: completed)"
        );

        let err = PipelineError::ConcurrentModification {
            thread_id: "t9".into(),
            expected: 4,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Concurrent modification of thread t9: next sequence is 4, attempted 3"
        );
    }
}
