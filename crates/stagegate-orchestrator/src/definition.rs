//! Pipeline definitions: the ordered stages a thread walks through

use stagegate_core::{
    FeedbackTarget, PipelineError, Result, StageHandler, StagePolicy,
    DEFAULT_AUTO_APPROVE_THRESHOLD, DEFAULT_MAX_ITERATIONS,
};
use std::collections::HashSet;
use std::sync::Arc;

/// One named stage and its review policy
#[derive(Clone)]
pub struct PipelineStage {
    name: String,
    handler: Arc<dyn StageHandler>,
    pause_after: bool,
    max_iterations: u32,
    auto_approve_threshold: f64,
    feedback_target: Option<FeedbackTarget>,
}

impl PipelineStage {
    /// Stage that pauses for review with the default policy
    pub fn new(name: impl Into<String>, handler: Arc<dyn StageHandler>) -> Self {
        let feedback_target = handler.feedback_target();
        Self {
            name: name.into(),
            handler,
            pause_after: true,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            auto_approve_threshold: DEFAULT_AUTO_APPROVE_THRESHOLD,
            feedback_target,
        }
    }

    pub fn with_pause_after(mut self, pause_after: bool) -> Self {
        self.pause_after = pause_after;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_auto_approve_threshold(mut self, threshold: f64) -> Self {
        self.auto_approve_threshold = threshold;
        self
    }

    pub fn with_policy(self, policy: StagePolicy) -> Self {
        self.with_pause_after(policy.pause_after)
            .with_max_iterations(policy.max_iterations)
            .with_auto_approve_threshold(policy.auto_approve_threshold)
    }

    /// Override the list field and vocabulary feedback may edit
    pub fn with_feedback_target(mut self, target: FeedbackTarget) -> Self {
        self.feedback_target = Some(target);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &Arc<dyn StageHandler> {
        &self.handler
    }

    pub fn pause_after(&self) -> bool {
        self.pause_after
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn auto_approve_threshold(&self) -> f64 {
        self.auto_approve_threshold
    }

    pub fn feedback_target(&self) -> Option<&FeedbackTarget> {
        self.feedback_target.as_ref()
    }
}

impl std::fmt::Debug for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineStage")
            .field("name", &self.name)
            .field("pause_after", &self.pause_after)
            .field("max_iterations", &self.max_iterations)
            .field("auto_approve_threshold", &self.auto_approve_threshold)
            .field("feedback_target", &self.feedback_target)
            .finish()
    }
}

/// Ordered, immutable list of stages
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    stages: Vec<PipelineStage>,
}

impl PipelineDefinition {
    /// Validate and freeze a stage list
    ///
    /// Fails when the list is empty, a name is empty or repeated, or a
    /// threshold lies outside [0, 1].
    pub fn new(stages: Vec<PipelineStage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(PipelineError::Validation(
                "pipeline needs at least one stage".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for stage in &stages {
            if stage.name.trim().is_empty() {
                return Err(PipelineError::Validation("stage name is empty".to_string()));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(PipelineError::Validation(format!(
                    "duplicate stage name: {}",
                    stage.name
                )));
            }
            if !(0.0..=1.0).contains(&stage.auto_approve_threshold) {
                return Err(PipelineError::Validation(format!(
                    "stage {} has auto_approve_threshold {} outside [0, 1]",
                    stage.name, stage.auto_approve_threshold
                )));
            }
        }

        Ok(Self { stages })
    }

    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    pub fn first(&self) -> &PipelineStage {
        // non-empty by construction
        &self.stages[0]
    }

    pub fn stage(&self, name: &str) -> Option<&PipelineStage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Stage following `name`, None when `name` is the last stage
    pub fn next_after(&self, name: &str) -> Option<&PipelineStage> {
        let idx = self.stages.iter().position(|s| s.name == name)?;
        self.stages.get(idx + 1)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Incremental construction of a `PipelineDefinition`
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<PipelineStage>,
}

impl PipelineBuilder {
    pub fn stage(mut self, stage: PipelineStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Result<PipelineDefinition> {
        PipelineDefinition::new(self.stages)
    }
}
