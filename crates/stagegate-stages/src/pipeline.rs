//! The standard three-stage pipeline

use stagegate_core::{Result, StagegateConfig};
use stagegate_orchestrator::{PipelineDefinition, PipelineStage};
use std::sync::Arc;

use crate::context::{ContextClassifier, CONTEXT_DETECTION};
use crate::requirements::{RequirementAnalysis, REQUIREMENT_ANALYSIS};
use crate::selection::{AgentSelection, AGENT_SELECTION};

/// Context detection, then agent selection, then requirement analysis,
/// each with the review policy `config` gives it
pub fn standard_pipeline(config: &StagegateConfig) -> Result<PipelineDefinition> {
    PipelineDefinition::builder()
        .stage(
            PipelineStage::new(CONTEXT_DETECTION, Arc::new(ContextClassifier::new()))
                .with_policy(config.policy_for(CONTEXT_DETECTION)),
        )
        .stage(
            PipelineStage::new(AGENT_SELECTION, Arc::new(AgentSelection::new()))
                .with_policy(config.policy_for(AGENT_SELECTION)),
        )
        .stage(
            PipelineStage::new(REQUIREMENT_ANALYSIS, Arc::new(RequirementAnalysis::new()))
                .with_policy(config.policy_for(REQUIREMENT_ANALYSIS)),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagegate_core::StageOverride;

    #[test]
    fn test_stage_order_and_policies() {
        let mut config = StagegateConfig::default();
        config.stages.insert(
            AGENT_SELECTION.to_string(),
            StageOverride {
                max_iterations: Some(5),
                ..Default::default()
            },
        );

        let definition = standard_pipeline(&config).unwrap();
        assert_eq!(
            definition.stage_names(),
            vec![CONTEXT_DETECTION, AGENT_SELECTION, REQUIREMENT_ANALYSIS]
        );
        assert_eq!(definition.stage(AGENT_SELECTION).unwrap().max_iterations(), 5);
        assert_eq!(definition.stage(CONTEXT_DETECTION).unwrap().max_iterations(), 3);
        assert!(definition
            .stage(AGENT_SELECTION)
            .unwrap()
            .feedback_target()
            .is_some());
    }
}
