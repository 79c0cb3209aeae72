//! Durable file-backed checkpoint store
//!
//! Layout: `<root>/<thread_id>/<sequence>.json`, sequence zero-padded to 20
//! digits so lexical order is numeric order. Each file is a SHA-256 hex
//! digest line followed by the checkpoint JSON the digest covers.
//!
//! Writes go through a temp file in the thread directory that is fsynced and
//! then published with a no-clobber link, so a checkpoint file is either
//! absent or complete, and two writers can never publish the same sequence.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use stagegate_core::{validate_thread_id, Checkpoint, PipelineError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, warn};

use crate::{check_append, Append, StateStore};

const CHECKPOINT_EXT: &str = "json";

/// Store that persists every checkpoint as its own file
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn thread_dir(&self, thread_id: &str) -> Result<PathBuf> {
        validate_thread_id(thread_id)?;
        Ok(self.root.join(thread_id))
    }

    /// Sequence numbers present for a thread, ascending
    async fn sequences(&self, dir: &Path) -> Result<Vec<u64>> {
        if !fs::try_exists(dir).await? {
            return Ok(Vec::new());
        }

        let mut sequences = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CHECKPOINT_EXT) {
                continue;
            }
            if let Some(seq) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                sequences.push(seq);
            }
        }
        sequences.sort_unstable();
        Ok(sequences)
    }

    async fn read_checkpoint(&self, dir: &Path, sequence: u64) -> Result<Checkpoint> {
        let path = checkpoint_path(dir, sequence);
        let content = fs::read_to_string(&path).await?;
        decode(&content).map_err(|reason| {
            PipelineError::Persistence(format!("{}: {}", path.display(), reason))
        })
    }
}

fn checkpoint_path(dir: &Path, sequence: u64) -> PathBuf {
    dir.join(format!("{:020}.{}", sequence, CHECKPOINT_EXT))
}

fn digest(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

fn encode(checkpoint: &Checkpoint) -> Result<String> {
    let payload = serde_json::to_string_pretty(checkpoint)?;
    Ok(format!("{}\n{}", digest(&payload), payload))
}

fn decode(content: &str) -> std::result::Result<Checkpoint, String> {
    let (recorded, payload) = content
        .split_once('\n')
        .ok_or_else(|| "missing digest line".to_string())?;
    if recorded.trim() != digest(payload) {
        return Err("digest mismatch, checkpoint file is corrupt".to_string());
    }
    serde_json::from_str(payload).map_err(|e| format!("invalid checkpoint JSON: {}", e))
}

/// Write `content` to `target` atomically, failing if `target` exists
fn publish(dir: &Path, target: &Path, content: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(content.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist_noclobber(target).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl StateStore for FileStore {
    async fn save(&self, thread_id: &str, checkpoint: &Checkpoint) -> Result<()> {
        let dir = self.thread_dir(thread_id)?;
        let latest = self.load(thread_id).await?;

        if check_append(thread_id, latest.as_ref(), checkpoint)? == Append::NoOp {
            return Ok(());
        }

        let content = encode(checkpoint)?;
        let target = checkpoint_path(&dir, checkpoint.sequence_number);
        let publish_target = target.clone();

        let outcome = tokio::task::spawn_blocking(move || publish(&dir, &publish_target, &content))
            .await
            .map_err(|e| PipelineError::Persistence(format!("checkpoint writer panicked: {}", e)))?;

        match outcome {
            Ok(()) => {
                debug!(
                    thread_id,
                    sequence = checkpoint.sequence_number,
                    path = %target.display(),
                    "Checkpoint written"
                );
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                warn!(
                    thread_id,
                    sequence = checkpoint.sequence_number,
                    "Checkpoint sequence already published by another writer"
                );
                Err(PipelineError::ConcurrentModification {
                    thread_id: thread_id.to_string(),
                    expected: checkpoint.sequence_number.saturating_add(1),
                    actual: checkpoint.sequence_number,
                })
            }
            Err(e) => Err(PipelineError::Persistence(format!(
                "failed to write {}: {}",
                target.display(),
                e
            ))),
        }
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let dir = self.thread_dir(thread_id)?;
        match self.sequences(&dir).await?.last() {
            Some(&sequence) => Ok(Some(self.read_checkpoint(&dir, sequence).await?)),
            None => Ok(None),
        }
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let dir = self.thread_dir(thread_id)?;
        let mut checkpoints = Vec::new();
        for sequence in self.sequences(&dir).await? {
            checkpoints.push(self.read_checkpoint(&dir, sequence).await?);
        }
        Ok(checkpoints)
    }

    async fn threads(&self) -> Result<Vec<String>> {
        if !fs::try_exists(&self.root).await? {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_thread_id(&name).is_ok() && !self.sequences(&entry.path()).await?.is_empty() {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagegate_core::ExecutionState;

    #[test]
    fn test_encode_decode() {
        let cp = Checkpoint::initial("t1", ExecutionState::default());
        let encoded = encode(&cp).unwrap();
        assert_eq!(decode(&encoded).unwrap(), cp);
    }

    #[test]
    fn test_decode_detects_tampering() {
        let cp = Checkpoint::initial("t1", ExecutionState::default());
        let tampered = encode(&cp).unwrap().replace("\"t1\"", "\"t2\"");
        assert!(decode(&tampered).unwrap_err().contains("digest mismatch"));
        assert!(decode("no newline here").is_err());
    }

    #[test]
    fn test_checkpoint_path_sorts_numerically() {
        let dir = Path::new("/tmp/x");
        let a = checkpoint_path(dir, 9);
        let b = checkpoint_path(dir, 10);
        assert!(a < b);
        assert!(a.ends_with("00000000000000000009.json"));
    }
}
