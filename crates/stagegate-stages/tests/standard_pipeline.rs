//! The standard pipeline driven end to end with the built-in handlers

use serde_json::json;
use stagegate_core::{
    HumanDecision, PipelineError, PipelineStatus, StageOverride, StagegateConfig, StateMap,
};
use stagegate_orchestrator::PipelineOrchestrator;
use stagegate_stages::{standard_pipeline, AGENT_SELECTION, CONTEXT_DETECTION, REQUIREMENT_ANALYSIS};
use stagegate_store::MemoryStore;
use std::sync::Arc;

fn orchestrator(config: &StagegateConfig) -> PipelineOrchestrator<MemoryStore> {
    PipelineOrchestrator::new(
        standard_pipeline(config).unwrap(),
        Arc::new(MemoryStore::new()),
    )
}

fn description(text: &str) -> StateMap {
    let mut map = StateMap::new();
    map.insert("description".into(), json!(text));
    map
}

#[tokio::test]
async fn test_rag_request_walks_all_stages() {
    let orch = orchestrator(&StagegateConfig::default());

    let first = orch
        .run("t1", description("Build a RAG system for document search"))
        .await
        .unwrap();
    assert_eq!(first.status, PipelineStatus::PausedForReview);
    assert_eq!(first.current_stage.as_deref(), Some(CONTEXT_DETECTION));
    assert_eq!(first.state["project_type"], json!("rag_system"));

    // agent selection scores 1.0 and is auto-approved
    let second = orch.resume("t1", HumanDecision::approve()).await.unwrap();
    assert_eq!(second.status, PipelineStatus::PausedForReview);
    assert_eq!(second.current_stage.as_deref(), Some(REQUIREMENT_ANALYSIS));
    assert_eq!(
        second.state["selected_agents"],
        json!([
            "requirements_analyzer",
            "architecture_designer",
            "code_generator",
            "documentation_generator"
        ])
    );

    let done = orch.resume("t1", HumanDecision::approve()).await.unwrap();
    assert_eq!(done.status, PipelineStatus::Completed);
    assert_eq!(done.state["requirement_categories"], json!(["functional"]));
}

#[tokio::test]
async fn test_empty_description_asks_for_more() {
    let orch = orchestrator(&StagegateConfig::default());

    let result = orch.run("t2", description("")).await.unwrap();
    assert_eq!(result.status, PipelineStatus::PausedForReview);

    let review = result.pending_review.unwrap();
    assert_eq!(review.stage, CONTEXT_DETECTION);
    assert!(review.confidence < 0.5);
    assert!(!review.information_requests.is_empty());
}

#[tokio::test]
async fn test_missing_description_rejected() {
    let orch = orchestrator(&StagegateConfig::default());
    let err = orch.run("t3", StateMap::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn test_agent_refinement_hits_limit() {
    let mut config = StagegateConfig::default();
    config.stages.insert(
        AGENT_SELECTION.to_string(),
        StageOverride {
            auto_approve_threshold: Some(0.95),
            ..Default::default()
        },
    );
    let orch = orchestrator(&config);

    orch.run("t4", description("something for users")).await.unwrap();
    let selection = orch.resume("t4", HumanDecision::approve()).await.unwrap();
    assert_eq!(selection.status, PipelineStatus::PausedForReview);
    assert_eq!(selection.current_stage.as_deref(), Some(AGENT_SELECTION));

    for _ in 0..3 {
        let refined = orch
            .resume("t4", HumanDecision::refine("add test_generator"))
            .await
            .unwrap();
        assert_eq!(refined.status, PipelineStatus::PausedForReview);
        let agents = refined.state["selected_agents"].as_array().unwrap().clone();
        assert!(agents.contains(&json!("test_generator")));
    }

    let fourth = orch
        .resume("t4", HumanDecision::refine("add test_generator"))
        .await
        .unwrap();
    assert_eq!(fourth.status, PipelineStatus::MaxIterationsReached);
}

#[tokio::test]
async fn test_feedback_edits_selection() {
    let mut config = StagegateConfig::default();
    config.stages.insert(
        AGENT_SELECTION.to_string(),
        StageOverride {
            auto_approve_threshold: Some(1.0),
            ..Default::default()
        },
    );
    let orch = orchestrator(&config);

    orch.run("t5", description("something for users")).await.unwrap();
    orch.resume("t5", HumanDecision::approve()).await.unwrap();

    let refined = orch
        .resume(
            "t5",
            HumanDecision::refine("only code_generator and cli generator"),
        )
        .await
        .unwrap();
    assert_eq!(
        refined.state["selected_agents"],
        json!(["code_generator", "cli_generator"])
    );

    let refined = orch
        .resume("t5", HumanDecision::refine("remove cli_generator"))
        .await
        .unwrap();
    assert_eq!(refined.state["selected_agents"], json!(["code_generator"]));
}
