//! Configuration management for stagegate
//!
//! Repository-level settings live in `.stagegate/config.toml`: where
//! checkpoints are stored, the optional activity journal, and the review
//! policy of each stage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::types::{DEFAULT_AUTO_APPROVE_THRESHOLD, DEFAULT_MAX_ITERATIONS};
use crate::{PipelineError, Result};

/// Repository-level stagegate configuration
///
/// Loaded from `.stagegate/config.toml` in the repo root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagegateConfig {
    /// Directory holding one sub-directory of checkpoints per thread
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Directory for markdown activity journals (disabled when unset)
    #[serde(default)]
    pub journal_dir: Option<PathBuf>,

    /// Review policy applied to every stage
    #[serde(default)]
    pub defaults: StagePolicy,

    /// Per-stage overrides keyed by stage name
    #[serde(default)]
    pub stages: BTreeMap<String, StageOverride>,
}

/// Review policy of a stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StagePolicy {
    /// Pause for human review after the stage runs
    #[serde(default = "default_pause_after")]
    pub pause_after: bool,

    /// Refinement iterations allowed before the stage gives up
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Confidence at or above which a pause is skipped
    #[serde(default = "default_auto_approve_threshold")]
    pub auto_approve_threshold: f64,
}

/// Partial policy; unset fields fall back to the defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOverride {
    #[serde(default)]
    pub pause_after: Option<bool>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub auto_approve_threshold: Option<f64>,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".stagegate/threads")
}

fn default_pause_after() -> bool {
    true
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

fn default_auto_approve_threshold() -> f64 {
    DEFAULT_AUTO_APPROVE_THRESHOLD
}

impl StagegateConfig {
    /// Load configuration from `.stagegate/config.toml` or use defaults
    pub fn load_or_default(repo_root: &Path) -> Result<Self> {
        let config_path = repo_root.join(".stagegate/config.toml");

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content).map_err(|e| {
                PipelineError::Config(format!("Failed to parse config file: {}", e))
            })?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Write default configuration to `.stagegate/config.toml`
    pub fn write_default(repo_root: &Path) -> Result<PathBuf> {
        let config_dir = repo_root.join(".stagegate");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| PipelineError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Effective policy for a stage
    pub fn policy_for(&self, stage: &str) -> StagePolicy {
        let mut policy = self.defaults;
        if let Some(o) = self.stages.get(stage) {
            if let Some(pause_after) = o.pause_after {
                policy.pause_after = pause_after;
            }
            if let Some(max_iterations) = o.max_iterations {
                policy.max_iterations = max_iterations;
            }
            if let Some(threshold) = o.auto_approve_threshold {
                policy.auto_approve_threshold = threshold;
            }
        }
        policy
    }

    /// Resolve relative directories against the repository root
    pub fn resolve_paths(mut self, repo_root: &Path) -> Self {
        if self.store_dir.is_relative() {
            self.store_dir = repo_root.join(&self.store_dir);
        }
        if let Some(dir) = self.journal_dir.take() {
            self.journal_dir = Some(if dir.is_relative() {
                repo_root.join(dir)
            } else {
                dir
            });
        }
        self
    }

    fn validate(&self) -> Result<()> {
        check_threshold("defaults", self.defaults.auto_approve_threshold)?;
        for (stage, o) in &self.stages {
            if let Some(threshold) = o.auto_approve_threshold {
                check_threshold(stage, threshold)?;
            }
        }
        Ok(())
    }
}

fn check_threshold(scope: &str, threshold: f64) -> Result<()> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(PipelineError::Config(format!(
            "auto_approve_threshold for {} must be within [0, 1], got {}",
            scope, threshold
        )))
    }
}

impl Default for StagegateConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            journal_dir: None,
            defaults: StagePolicy::default(),
            stages: BTreeMap::new(),
        }
    }
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self {
            pause_after: default_pause_after(),
            max_iterations: default_max_iterations(),
            auto_approve_threshold: default_auto_approve_threshold(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_missing() {
        let dir = TempDir::new().unwrap();
        let config = StagegateConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, StagegateConfig::default());
        assert_eq!(config.defaults.max_iterations, 3);
        assert_eq!(config.defaults.auto_approve_threshold, 0.9);
    }

    #[test]
    fn test_write_then_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = StagegateConfig::write_default(dir.path()).unwrap();
        assert!(path.exists());
        let config = StagegateConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, StagegateConfig::default());
    }

    #[test]
    fn test_stage_overrides() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".stagegate")).unwrap();
        std::fs::write(
            dir.path().join(".stagegate/config.toml"),
            r#"
journal_dir = "journal"

[defaults]
max_iterations = 5

[stages.context_detection]
pause_after = false

[stages.agent_selection]
auto_approve_threshold = 0.95
"#,
        )
        .unwrap();

        let config = StagegateConfig::load_or_default(dir.path())
            .unwrap()
            .resolve_paths(dir.path());

        let context = config.policy_for("context_detection");
        assert!(!context.pause_after);
        assert_eq!(context.max_iterations, 5);

        let selection = config.policy_for("agent_selection");
        assert!(selection.pause_after);
        assert_eq!(selection.auto_approve_threshold, 0.95);

        assert_eq!(config.journal_dir, Some(dir.path().join("journal")));
        assert_eq!(config.store_dir, dir.path().join(".stagegate/threads"));
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".stagegate")).unwrap();
        std::fs::write(
            dir.path().join(".stagegate/config.toml"),
            "[defaults]\nauto_approve_threshold = 1.5\n",
        )
        .unwrap();

        let err = StagegateConfig::load_or_default(dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
