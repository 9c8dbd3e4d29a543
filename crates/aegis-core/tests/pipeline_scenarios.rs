//! End-to-end scenarios for the staged reasoning pipeline.
//!
//! Every scenario drives a real [`PipelineOrchestrator`] (or the
//! [`AnalysisService`] on top of it) against scripted inference backends
//! from `aegis-test-utils`. Together they pin down the externally visible
//! contract:
//! - a run always reaches a terminal state with a contiguous trace
//! - stage-local failures degrade a stage without aborting the run
//! - memory is optional context and never changes the outcome
//! - explanations follow the verdict

use aegis_core::memory::{MemoryService, ANALYSIS_RESULT_CATEGORY, CATEGORY_KEY};
use aegis_core::parser::FALLBACK_CONFIDENCE;
use aegis_core::prelude::*;
use aegis_core::prompts::MEMORY_SECTION_HEADER;
use aegis_core::{
    synthesize_explanation, Feedback, InMemoryMemory, InMemoryRepository, Sentiment, StructuredResult,
};
use aegis_test_utils::{
    context, recording_stages, setup_orchestrator, FailingInference, FailingMemory, FlakyRepository, GarbageInference,
    ScriptedInference, StallOnStage, PROBLEM, TOKENS_PER_REPLY,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Waits until the terminal state has been persisted, not just reached
async fn poll_until_terminal(service: &AnalysisService, id: aegis_core::AnalysisId) -> PipelineState {
    for _ in 0..200 {
        let records = service.list(usize::MAX).await.expect("list analyses");
        let persisted = records.iter().find(|r| r.id == id).map(|r| r.status);
        if let Some(state) = persisted.filter(|s| s.is_terminal()) {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("analysis {id} never reached a terminal state");
}

/// Tenet: a minimal valid problem runs all four stages and completes.
///
/// If this fails, the happy path of the orchestrator is broken: either a
/// stage is skipped, the state machine refuses a legal transition, or the
/// verdict is not compiled from the Decide stage.
#[tokio::test]
async fn minimal_problem_completes_with_four_entries() {
    let inference = Arc::new(ScriptedInference::new());
    let orchestrator = setup_orchestrator(inference.clone());

    let problem = "Build an app for dog runs";
    assert_eq!(problem.chars().count(), 25);
    let aggregate = orchestrator.execute(problem, ContextMap::new()).await.unwrap();

    assert_eq!(aggregate.status, PipelineState::Completed);
    assert_eq!(orchestrator.state(), PipelineState::Completed);
    assert_eq!(aggregate.trace.len(), 4);
    assert_eq!(aggregate.verdict.verdict, VerdictKind::Proceed);
    assert!((0.0..=1.0).contains(&aggregate.verdict.confidence));
    assert_eq!(aggregate.tokens_used, 4 * TOKENS_PER_REPLY);

    let stages: Vec<StageKind> = aggregate.trace.iter().map(|e| e.stage).collect();
    assert_eq!(stages, StageKind::ALL.to_vec());
    assert_eq!(inference.requests().len(), 4);
}

/// Tenet: the trace is numbered 1..=n with no gaps.
#[tokio::test]
async fn trace_is_contiguous() {
    let orchestrator = setup_orchestrator(Arc::new(ScriptedInference::new()));
    let aggregate = orchestrator.execute(PROBLEM, ContextMap::new()).await.unwrap();

    for (i, entry) in aggregate.trace.iter().enumerate() {
        assert_eq!(entry.step_number, i + 1);
        assert!((0.0..=1.0).contains(&entry.confidence));
        assert!(entry.action.starts_with("Executing "));
    }
    assert_eq!(orchestrator.get_trace(), aggregate.trace);
}

/// Tenet: unparseable replies degrade every stage to its fallback object.
///
/// The run must still complete; every entry carries the fallback confidence
/// and the parse error, and the verdict defaults to CONDITIONAL.
#[tokio::test]
async fn garbage_replies_fall_back_everywhere() {
    let orchestrator = setup_orchestrator(Arc::new(GarbageInference));
    let aggregate = orchestrator.execute(PROBLEM, ContextMap::new()).await.unwrap();

    assert_eq!(aggregate.status, PipelineState::Completed);
    assert_eq!(aggregate.trace.len(), 4);
    for entry in &aggregate.trace {
        assert_eq!(entry.confidence, FALLBACK_CONFIDENCE, "{}", entry.stage_name);
        assert_eq!(entry.error.as_deref(), Some("Failed to parse response"));
    }
    assert_eq!(aggregate.verdict.verdict, VerdictKind::Conditional);
    assert_eq!(aggregate.verdict.confidence, FALLBACK_CONFIDENCE);
    assert!(aggregate.stage_outputs["Research Agent"].contains_key("raw_response"));
}

/// Tenet: an inference timeout in one stage fails only that stage.
#[tokio::test(start_paused = true)]
async fn timeout_on_risk_stage_only_degrades_that_stage() {
    let inference = Arc::new(StallOnStage::new(StageKind::AssessRisk, Duration::from_secs(30)));
    let config = PipelineConfig::default().with_inference_timeout(Duration::from_secs(1));
    let orchestrator = PipelineOrchestrator::new(config, inference);

    let aggregate = orchestrator.execute(PROBLEM, ContextMap::new()).await.unwrap();

    assert_eq!(aggregate.status, PipelineState::Completed);
    assert_eq!(aggregate.trace.len(), 4);

    let risk = &aggregate.trace[2];
    assert_eq!(risk.stage, StageKind::AssessRisk);
    assert_eq!(risk.confidence, 0.0);
    assert!(risk.error.is_some());

    for i in [0, 1, 3] {
        assert!(aggregate.trace[i].error.is_none(), "stage {i} should be unaffected");
    }
    assert_eq!(aggregate.verdict.verdict, VerdictKind::Proceed);
    assert!(aggregate.verdict.risks.is_empty());
}

/// Tenet: a backend that fails every call still yields a completed run
/// with a zero-confidence conditional verdict.
#[tokio::test]
async fn failing_backend_completes_with_conditional_verdict() {
    let inference = Arc::new(FailingInference(aegis_core::InferenceError::Transport("connection refused".into())));
    let aggregate = setup_orchestrator(inference)
        .execute(PROBLEM, ContextMap::new())
        .await
        .unwrap();

    assert_eq!(aggregate.status, PipelineState::Completed);
    assert!(aggregate.trace.iter().all(|e| e.confidence == 0.0 && e.error.is_some()));
    assert_eq!(aggregate.verdict.verdict, VerdictKind::Conditional);
    assert_eq!(aggregate.verdict.confidence, 0.0);
    assert!(aggregate.verdict.summary.starts_with("Decision unavailable: "));
    assert_eq!(aggregate.tokens_used, 0);
}

/// Tenet: each stage sees every earlier stage's structured result.
#[tokio::test]
async fn analyze_prompt_contains_gather_result() {
    let inference = Arc::new(ScriptedInference::new());
    let orchestrator = setup_orchestrator(inference.clone());
    orchestrator.execute(PROBLEM, ContextMap::new()).await.unwrap();

    let analyze = inference.prompt_for(StageKind::Analyze).unwrap();
    assert!(analyze.contains("$4.2B"));

    let decide = inference.prompt_for(StageKind::Decide).unwrap();
    assert!(decide.contains("$4.2B"));
    assert!(decide.contains("overall_risk_score"));

    let gather = inference.prompt_for(StageKind::Gather).unwrap();
    assert!(!gather.contains("overall_analysis_score"));
}

/// Tenet: each stage receives exactly the results of the stages before it,
/// keyed by stage name.
#[tokio::test]
async fn stage_inputs_carry_prior_results_by_name() {
    let config = PipelineConfig::default();
    let stages = recording_stages(&config, Arc::new(ScriptedInference::new()));
    let orchestrator = PipelineOrchestrator::with_stages(
        config,
        stages.iter().map(|s| Arc::clone(s) as Arc<dyn Stage>).collect(),
    )
    .unwrap();
    orchestrator.execute(PROBLEM, ContextMap::new()).await.unwrap();

    let keys: Vec<Vec<String>> = stages
        .iter()
        .map(|stage| {
            let inputs = stage.inputs();
            assert_eq!(inputs.len(), 1);
            inputs[0].prior_results.keys().cloned().collect()
        })
        .collect();

    assert_eq!(
        keys,
        vec![
            vec![],
            vec!["Research Agent".to_string()],
            vec!["Research Agent".to_string(), "Analysis Agent".to_string()],
            vec!["Research Agent".to_string(), "Analysis Agent".to_string(), "Risk Agent".to_string()],
        ]
    );

    let analyze = &stages[1].inputs()[0];
    assert_eq!(analyze.task, PROBLEM);
    assert_eq!(analyze.prior_results["Research Agent"]["market_overview"]["market_size"], "$4.2B");
    assert!(analyze.memory_context.is_none());
}

/// Tenet: caller context reaches the Gather prompt.
#[tokio::test]
async fn context_is_rendered_for_gather() {
    let inference = Arc::new(ScriptedInference::new());
    let orchestrator = setup_orchestrator(inference.clone());
    orchestrator
        .execute(PROBLEM, context(&[("region", "Nordics")]))
        .await
        .unwrap();

    assert!(inference.prompt_for(StageKind::Gather).unwrap().contains("Nordics"));
}

/// Tenet: memory is optional; a failing backend never changes the verdict.
#[tokio::test]
async fn memory_failure_does_not_change_verdict() {
    let baseline = setup_orchestrator(Arc::new(ScriptedInference::new()))
        .execute(PROBLEM, ContextMap::new())
        .await
        .unwrap();

    let memory = Arc::new(FailingMemory::default());
    let with_failing_memory = setup_orchestrator(Arc::new(ScriptedInference::new()))
        .with_memory(memory.clone())
        .execute(PROBLEM, ContextMap::new())
        .await
        .unwrap();

    assert_eq!(with_failing_memory.status, PipelineState::Completed);
    assert_eq!(with_failing_memory.verdict, baseline.verdict);
    assert_eq!(memory.calls(), 2, "one search and one insight write");
}

/// Tenet: retrieved memory is shown only to the first stage, and a
/// completed run stores one insight.
#[tokio::test]
async fn memory_context_reaches_gather_only() {
    let memory = Arc::new(InMemoryMemory::new());
    let mut metadata = StructuredResult::new();
    metadata.insert(CATEGORY_KEY.into(), json!(ANALYSIS_RESULT_CATEGORY));
    memory
        .add(
            "Problem: office plants subscription\nDecision: CONDITIONAL".into(),
            metadata,
        )
        .await
        .unwrap();

    let inference = Arc::new(ScriptedInference::new());
    setup_orchestrator(inference.clone())
        .with_memory(memory.clone())
        .execute(PROBLEM, ContextMap::new())
        .await
        .unwrap();

    let gather = inference.prompt_for(StageKind::Gather).unwrap();
    assert!(gather.contains(MEMORY_SECTION_HEADER));
    assert!(gather.contains("- Problem: office plants subscription"));
    for stage in [StageKind::Analyze, StageKind::AssessRisk, StageKind::Decide] {
        assert!(!inference.prompt_for(stage).unwrap().contains(MEMORY_SECTION_HEADER));
    }

    assert_eq!(memory.len(), 2);
    let stored = memory
        .search("Decision PROCEED", 5, Some(ANALYSIS_RESULT_CATEGORY))
        .await
        .unwrap();
    assert!(stored.iter().any(|h| h.text.contains("Decision: PROCEED")));
}

/// Tenet: a REJECT verdict is explained with negative sentiment.
#[tokio::test]
async fn reject_verdict_explains_negatively() {
    let orchestrator = setup_orchestrator(Arc::new(ScriptedInference::new().with_verdict("REJECT")));
    let aggregate = orchestrator.execute(PROBLEM, ContextMap::new()).await.unwrap();

    assert_eq!(aggregate.verdict.verdict, VerdictKind::Reject);
    let explanation = synthesize_explanation(&aggregate.verdict, &aggregate.trace);
    assert_eq!(explanation.sentiment, Sentiment::Negative);
    assert_eq!(explanation.header, "Recommendation: Do Not Proceed");
    assert_eq!(explanation.timeline.len(), 4);
    assert_eq!(explanation.timeline[0].stage, "Research");
    assert_eq!(explanation.concerns, vec!["Operational complexity"]);
}

/// Tenet: cancellation during a stage stops the run in the Cancelled state.
#[tokio::test]
async fn cancellation_mid_run() {
    let inference = Arc::new(StallOnStage::new(StageKind::Analyze, Duration::from_secs(60)));
    let orchestrator = Arc::new(setup_orchestrator(inference));

    let runner = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.execute(PROBLEM, ContextMap::new()).await })
    };

    for _ in 0..200 {
        if orchestrator.state() == PipelineState::Analyzing {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(orchestrator.state(), PipelineState::Analyzing);
    orchestrator.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("cancellation must be prompt")
        .unwrap();
    assert!(matches!(outcome, Err(PipelineError::Cancelled)));
    assert_eq!(orchestrator.state(), PipelineState::Cancelled);
    assert_eq!(orchestrator.get_trace().len(), 1);
}

/// Tenet: the service runs analyses in the background and answers queries
/// about them once they finish.
#[tokio::test]
async fn service_lifecycle() {
    let memory = Arc::new(InMemoryMemory::new());
    let service = AnalysisService::new(
        PipelineConfig::default(),
        Arc::new(ScriptedInference::new().with_verdict("CONDITIONAL")),
        Arc::new(InMemoryRepository::new()),
    )
    .with_memory(memory.clone());

    assert!(matches!(
        service.start("too short", ContextMap::new()).await,
        Err(PipelineError::InvalidProblem(_))
    ));

    let id = service.start(PROBLEM, ContextMap::new()).await.unwrap();
    assert_eq!(poll_until_terminal(&service, id).await, PipelineState::Completed);

    let status = service.status(id).await.unwrap();
    assert_eq!(status.progress_percent, 100);
    assert_eq!(status.completed_steps, 4);

    let explanation = service.explain(id).await.unwrap();
    assert_eq!(explanation.sentiment, Sentiment::Neutral);

    let summary = service.trace_summary(id).await.unwrap();
    assert_eq!(summary.total_steps, 4);
    assert_eq!(summary.stages_involved.len(), 4);

    let listed = service.list(10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);

    assert!(matches!(
        service.feedback(id, &Feedback::new(9)).await,
        Err(PipelineError::InvalidFeedback(_))
    ));
    let stored = service
        .feedback(id, &Feedback::new(4).with_comment("Useful"))
        .await
        .unwrap();
    assert!(stored.is_some());

    assert!(!service.cancel(id).await.unwrap());
    assert!(service.delete(id).await.unwrap());
    assert!(matches!(service.status(id).await, Err(PipelineError::NotFound(_))));
}

/// Tenet: a run started through the service can be cancelled by id.
#[tokio::test]
async fn service_cancel_persists_cancelled_state() {
    let service = AnalysisService::new(
        PipelineConfig::default(),
        Arc::new(StallOnStage::new(StageKind::Gather, Duration::from_secs(60))),
        Arc::new(InMemoryRepository::new()),
    );

    let id = service.start(PROBLEM, ContextMap::new()).await.unwrap();
    assert!(service.cancel(id).await.unwrap());
    assert_eq!(poll_until_terminal(&service, id).await, PipelineState::Cancelled);

    let record = service.list(1).await.unwrap().remove(0);
    assert_eq!(record.status, PipelineState::Cancelled);
    assert!(record.result.is_none());
    assert!(record.error.is_some());
    assert!(matches!(service.explain(id).await, Err(PipelineError::NotFound(_))));
}

/// Tenet: a repository that cannot be read never strands a started run.
///
/// The service must not need to re-read the record it just created; the
/// run completes, its outcome is stored and it leaves the live set.
#[tokio::test]
async fn unreadable_repository_still_completes_run() {
    let service = AnalysisService::new(
        PipelineConfig::default(),
        Arc::new(ScriptedInference::new()),
        Arc::new(FlakyRepository::failing_reads()),
    );

    let id = service.start(PROBLEM, ContextMap::new()).await.unwrap();
    assert_eq!(poll_until_terminal(&service, id).await, PipelineState::Completed);

    let record = service.list(1).await.unwrap().remove(0);
    assert!(record.result.is_some());
    assert!(service.delete(id).await.unwrap());
    assert_eq!(service.live_count(), 0);
}

/// Tenet: when the final write fails, queries keep answering from the
/// finished run instead of reporting a stale PENDING record.
#[tokio::test]
async fn unpersisted_outcome_stays_queryable() {
    let service = AnalysisService::new(
        PipelineConfig::default(),
        Arc::new(ScriptedInference::new()),
        Arc::new(FlakyRepository::failing_writes_after(1)),
    );

    let outcome = service.run(PROBLEM, ContextMap::new()).await;
    assert!(matches!(outcome, Err(PipelineError::Repository(_))));
    assert_eq!(service.live_count(), 1);

    let id = service.list(1).await.unwrap().remove(0).id;
    let status = service.status(id).await.unwrap();
    assert_eq!(status.state, PipelineState::Completed);
    assert_eq!(status.completed_steps, 4);

    assert!(service.delete(id).await.unwrap());
    assert_eq!(service.live_count(), 0);
}

/// Tenet: a run cannot be deleted while it is still executing.
#[tokio::test]
async fn delete_refuses_running_analysis() {
    let service = AnalysisService::new(
        PipelineConfig::default(),
        Arc::new(StallOnStage::new(StageKind::Gather, Duration::from_secs(60))),
        Arc::new(InMemoryRepository::new()),
    );

    let id = service.start(PROBLEM, ContextMap::new()).await.unwrap();
    assert!(matches!(service.delete(id).await, Err(PipelineError::StillRunning(_))));

    assert!(service.cancel(id).await.unwrap());
    assert_eq!(poll_until_terminal(&service, id).await, PipelineState::Cancelled);
    assert!(service.delete(id).await.unwrap());
}
