//! Activity journal - human-readable per-thread log in `<dir>/<thread_id>.md`
//!
//! Records run starts, stage transitions, reviews and human decisions so a
//! reviewer can follow a thread without reading checkpoint JSON. Every write
//! is fail-open: a journal failure never changes the outcome of a pipeline
//! call.

use chrono::Utc;
use stagegate_core::fail_open::fail_open;
use stagegate_core::{HumanDecision, PendingReview, Result};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Maximum characters of feedback quoted in the journal
const FEEDBACK_PREVIEW_CHARS: usize = 300;

/// Markdown journal writer, one file per thread
#[derive(Debug, Clone)]
pub struct ActivityLogger {
    dir: PathBuf,
}

impl ActivityLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Journal path for a thread
    pub fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir.join(format!("{}.md", thread_id))
    }

    /// Log the start of a run
    ///
    /// This operation is fail-open
    pub async fn log_run_start(&self, thread_id: &str, sequence: u64, stages: &[&str]) {
        fail_open("activity_logger::log_run_start", || async {
            let path = self.path_for(thread_id);
            let mut content = String::new();
            if !tokio::fs::try_exists(&path).await? {
                content.push_str(&format!("# Stagegate Activity: {}\n\n", thread_id));
            }
            content.push_str(&format!(
                "## Run started\n**Time**: {}\n**Checkpoint**: #{}\n**Stages**: {}\n\n",
                timestamp(),
                sequence,
                stages.join(" -> ")
            ));
            self.append(&path, &content).await
        })
        .await;
    }

    /// Log one line describing a transition
    ///
    /// This operation is fail-open
    pub async fn log_event(&self, thread_id: &str, message: &str) {
        fail_open("activity_logger::log_event", || async {
            let content = format!("- {} {}\n", timestamp(), message);
            self.append(&self.path_for(thread_id), &content).await
        })
        .await;
    }

    /// Log a pause together with what the reviewer is asked for
    ///
    /// This operation is fail-open
    pub async fn log_review(&self, thread_id: &str, review: &PendingReview) {
        fail_open("activity_logger::log_review", || async {
            let mut content = format!(
                "\n### Review requested: `{}`\n**Checkpoint**: #{}\n**Confidence**: {:.2}\n",
                review.stage, review.sequence_number, review.confidence
            );
            if !review.information_requests.is_empty() {
                content.push_str("**Requests**:\n");
                for request in &review.information_requests {
                    content.push_str(&format!("- {}\n", request));
                }
            }
            content.push('\n');
            self.append(&self.path_for(thread_id), &content).await
        })
        .await;
    }

    /// Log a human decision
    ///
    /// This operation is fail-open
    pub async fn log_decision(&self, thread_id: &str, stage: &str, decision: &HumanDecision) {
        fail_open("activity_logger::log_decision", || async {
            let mut content = format!(
                "\n### Decision on `{}`: {}\n**Time**: {}\n",
                stage,
                decision.approval,
                timestamp()
            );
            let feedback = decision.feedback.trim();
            if !feedback.is_empty() {
                let preview: String = feedback.chars().take(FEEDBACK_PREVIEW_CHARS).collect();
                content.push_str(&format!("> {}\n", preview));
            }
            content.push('\n');
            self.append(&self.path_for(thread_id), &content).await
        })
        .await;
    }

    async fn append(&self, path: &Path, content: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
