//! In-memory checkpoint store

use async_trait::async_trait;
use stagegate_core::{Checkpoint, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{check_append, Append, StateStore};

/// Process-local store; contents are lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryStore {
    threads: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        let mut threads = self.threads.write().await;
        let history = threads.entry(thread_id.to_string()).or_default();

        match check_append(thread_id, history.last(), checkpoint)? {
            Append::Write => {
                history.push(checkpoint.clone());
                debug!(
                    thread_id,
                    sequence = checkpoint.sequence_number,
                    "Stored checkpoint in memory"
                );
            }
            Append::NoOp => {}
        }
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).and_then(|h| h.last()).cloned())
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let threads = self.threads.read().await;
        Ok(threads.get(thread_id).cloned().unwrap_or_default())
    }

    async fn threads(&self) -> Result<Vec<String>> {
        let threads = self.threads.read().await;
        let mut ids: Vec<String> = threads
            .iter()
            .filter(|(_, h)| !h.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagegate_core::{ExecutionState, PipelineError, PipelineStatus};

    #[tokio::test]
    async fn test_save_and_load_latest() {
        let store = MemoryStore::new();
        assert!(store.load("t1").await.unwrap().is_none());

        let first = Checkpoint::initial("t1", ExecutionState::default());
        store.save("t1", &first).await.unwrap();

        let mut state = ExecutionState::default();
        state.status = PipelineStatus::Running;
        let second = first.next(state).unwrap();
        store.save("t1", &second).await.unwrap();

        let latest = store.load("t1").await.unwrap().unwrap();
        assert_eq!(latest.sequence_number, 1);
        assert_eq!(latest.status(), PipelineStatus::Running);
        assert_eq!(store.history("t1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resave_loaded_is_noop() {
        let store = MemoryStore::new();
        let first = Checkpoint::initial("t1", ExecutionState::default());
        store.save("t1", &first).await.unwrap();

        let loaded = store.load("t1").await.unwrap().unwrap();
        store.save("t1", &loaded).await.unwrap();

        let history = store.history("t1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0], first);
    }

    #[tokio::test]
    async fn test_competing_successors() {
        let store = MemoryStore::new();
        let first = Checkpoint::initial("t1", ExecutionState::default());
        store.save("t1", &first).await.unwrap();

        let a = first.next(ExecutionState::default()).unwrap();
        let mut b_state = ExecutionState::default();
        b_state.status = PipelineStatus::Rejected;
        let b = first.next(b_state).unwrap();

        store.save("t1", &a).await.unwrap();
        let err = store.save("t1", &b).await.unwrap_err();
        assert!(matches!(err, PipelineError::ConcurrentModification { .. }));
        assert_eq!(store.load("t1").await.unwrap().unwrap(), a);
    }

    #[tokio::test]
    async fn test_threads_sorted() {
        let store = MemoryStore::new();
        for id in ["b", "a"] {
            store
                .save(id, &Checkpoint::initial(id, ExecutionState::default()))
                .await
                .unwrap();
        }
        assert_eq!(store.threads().await.unwrap(), vec!["a", "b"]);
    }
}
