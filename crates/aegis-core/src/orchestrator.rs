//! Pipeline orchestrator
//!
//! Sequences the four fixed stages of one analysis:
//! - fetches optional memory context for the first stage
//! - runs each stage strictly in order, threading all prior results forward
//! - records one trace entry per completed stage
//! - stores a compact insight record, best effort
//! - compiles the aggregate result and verdict
//!
//! Stage-local failures arrive as degraded [`StageResult`]s and never abort
//! the run. Only orchestration-level errors move the run to `Failed`, or
//! `Cancelled` when the cancellation token fires.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::inference::InferenceService;
use crate::memory::{MemoryService, ANALYSIS_RESULT_CATEGORY, CATEGORY_KEY};
use crate::parser::excerpt;
use crate::stage::{standard_stages, Stage};
use crate::state_machine::{validate_transition, PipelineState};
use crate::trace::ReasoningTrace;
use crate::types::{
    AggregateResult, AnalysisId, ContextMap, PriorResults, StageInput, StageKind, StageResult,
    StructuredResult, TraceEntry,
};
use crate::verdict::Verdict;
use crate::views::StageView;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Characters of the problem kept in a stored insight
const INSIGHT_PROBLEM_CHARS: usize = 300;

/// Snapshot for external polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Analysis identifier
    pub analysis_id: AnalysisId,
    /// Current state
    pub state: PipelineState,
    /// Name of the running stage, if any
    pub current_stage: Option<String>,
    /// Advisory progress
    pub progress_percent: u8,
    /// Trace entries recorded so far
    pub completed_steps: usize,
    /// Most recent trace entry
    pub latest_step: Option<TraceEntry>,
}

#[derive(Debug)]
struct Progress {
    state: PipelineState,
    current_stage: Option<String>,
    trace: ReasoningTrace,
}

/// Orchestrator for one analysis run
///
/// Owns its stages and progress exclusively; one instance per analysis id.
pub struct PipelineOrchestrator {
    analysis_id: AnalysisId,
    config: PipelineConfig,
    stages: Vec<Arc<dyn Stage>>,
    memory: Option<Arc<dyn MemoryService>>,
    progress: RwLock<Progress>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl PipelineOrchestrator {
    /// Create an orchestrator running the standard stages on one backend
    #[must_use]
    pub fn new(config: PipelineConfig, inference: Arc<dyn InferenceService>) -> Self {
        let stages = standard_stages(&config, inference);
        Self::assemble(config, stages)
    }

    /// Create an orchestrator from explicit stages
    ///
    /// Stages must be exactly the fixed pipeline order.
    pub fn with_stages(config: PipelineConfig, stages: Vec<Arc<dyn Stage>>) -> Result<Self, PipelineError> {
        validate_stage_order(&stages)?;
        Ok(Self::assemble(config, stages))
    }

    fn assemble(config: PipelineConfig, stages: Vec<Arc<dyn Stage>>) -> Self {
        let analysis_id = AnalysisId::new();
        Self {
            analysis_id,
            config,
            stages,
            memory: None,
            progress: RwLock::new(Progress {
                state: PipelineState::Pending,
                current_stage: None,
                trace: ReasoningTrace::new(analysis_id),
            }),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// With memory service
    #[inline]
    #[must_use]
    pub fn with_memory(mut self, memory: Arc<dyn MemoryService>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// With a caller-chosen analysis identifier
    #[must_use]
    pub fn with_analysis_id(mut self, analysis_id: AnalysisId) -> Self {
        self.analysis_id = analysis_id;
        self.progress.get_mut().trace = ReasoningTrace::new(analysis_id);
        self
    }

    /// With an externally owned cancellation token
    #[inline]
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Analysis identifier
    #[inline]
    #[must_use]
    pub fn analysis_id(&self) -> AnalysisId {
        self.analysis_id
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.progress.read().state
    }

    /// Status snapshot; safe to call at any time
    #[must_use]
    pub fn get_status(&self) -> PipelineStatus {
        let progress = self.progress.read();
        PipelineStatus {
            analysis_id: self.analysis_id,
            state: progress.state,
            current_stage: progress.current_stage.clone(),
            progress_percent: progress.state.progress_percent(),
            completed_steps: progress.trace.len(),
            latest_step: progress.trace.latest().cloned(),
        }
    }

    /// Ordered trace recorded so far
    #[must_use]
    pub fn get_trace(&self) -> Vec<TraceEntry> {
        self.progress.read().trace.entries().to_vec()
    }

    /// Request cancellation; checked before each stage and during inference
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token observed by this run
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the full pipeline once
    ///
    /// Returns the compiled aggregate, or the orchestration-level error that
    /// stopped the run. No partial aggregate is ever returned.
    pub async fn execute(&self, problem: &str, context: ContextMap) -> Result<AggregateResult, PipelineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyStarted(self.state()));
        }

        tracing::info!(analysis_id = %self.analysis_id, "analysis started");
        match self.run_pipeline(problem, context).await {
            Ok(aggregate) => {
                tracing::info!(
                    analysis_id = %self.analysis_id,
                    verdict = %aggregate.verdict.verdict,
                    confidence = aggregate.verdict.confidence,
                    duration_ms = aggregate.total_duration_ms,
                    "analysis completed"
                );
                Ok(aggregate)
            }
            Err(err) => {
                let terminal = if err.is_cancelled() {
                    PipelineState::Cancelled
                } else {
                    PipelineState::Failed
                };
                self.force_terminal(terminal);
                if err.is_cancelled() {
                    tracing::warn!(analysis_id = %self.analysis_id, "analysis cancelled");
                } else {
                    tracing::error!(analysis_id = %self.analysis_id, error = %err, "analysis failed");
                }
                Err(err)
            }
        }
    }

    async fn run_pipeline(&self, problem: &str, context: ContextMap) -> Result<AggregateResult, PipelineError> {
        let started = Instant::now();
        let memory_context = self.fetch_memory(problem).await;

        let mut prior = PriorResults::new();
        let mut results: Vec<StageResult> = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let kind = stage.kind();
            self.transition(kind.running_state(), Some(stage.name()))?;

            let input = StageInput::new(problem)
                .with_context(context.clone())
                .with_prior_results(prior.clone())
                .with_memory(if kind == StageKind::Gather {
                    memory_context.clone()
                } else {
                    None
                });

            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                result = stage.run(&input) => result,
            };

            self.record_step(problem, stage.as_ref(), &result)?;
            prior.insert(result.stage_name.clone(), result.result.clone());
            results.push(result);
        }

        let verdict = self.compile_verdict(&results);
        self.store_insights(problem, &verdict).await;
        self.transition(PipelineState::Completed, None)?;

        let views: Vec<StageView> = results
            .iter()
            .map(|r| StageView::decode(r.stage, &r.result))
            .collect();

        Ok(AggregateResult {
            analysis_id: self.analysis_id,
            status: PipelineState::Completed,
            research_summary: stage_summary(&results, &views, StageKind::Gather, "No research data available"),
            analysis_summary: stage_summary(&results, &views, StageKind::Analyze, "No analysis data available"),
            risk_summary: stage_summary(&results, &views, StageKind::AssessRisk, "No risk data available"),
            verdict,
            trace: self.get_trace(),
            total_duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            tokens_used: results.iter().map(|r| r.tokens_used).sum(),
            stage_outputs: prior,
        })
    }

    fn transition(&self, to: PipelineState, stage: Option<&str>) -> Result<(), PipelineError> {
        let mut progress = self.progress.write();
        validate_transition(progress.state, to)?;
        tracing::debug!(analysis_id = %self.analysis_id, from = ?progress.state, to = ?to, "state transition");
        progress.state = to;
        progress.current_stage = stage.map(str::to_string);
        Ok(())
    }

    fn force_terminal(&self, terminal: PipelineState) {
        let mut progress = self.progress.write();
        if validate_transition(progress.state, terminal).is_ok() {
            progress.state = terminal;
            progress.current_stage = None;
        }
    }

    fn record_step(&self, problem: &str, stage: &dyn Stage, result: &StageResult) -> Result<(), PipelineError> {
        let view = StageView::decode(result.stage, &result.result);
        let mut progress = self.progress.write();
        let entry = TraceEntry {
            step_number: progress.trace.next_step(),
            stage: result.stage,
            stage_name: result.stage_name.clone(),
            action: format!("Executing {}", stage.config().role),
            input_summary: input_preview(problem, self.config.input_preview_chars),
            output_summary: view.output_summary(),
            reasoning: result.reasoning.clone(),
            tools_used: result.tools_used.clone(),
            confidence: result.confidence,
            duration_ms: result.duration_ms,
            error: result.error().map(str::to_string),
            timestamp: Utc::now(),
        };
        progress.trace.record(entry)?;
        Ok(())
    }

    async fn fetch_memory(&self, problem: &str) -> Option<String> {
        let memory = self.memory.as_ref()?;
        let search = memory.search(problem, self.config.memory_results, None);

        let hits = match tokio::time::timeout(self.config.memory_timeout(), search).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(err)) => {
                tracing::warn!(analysis_id = %self.analysis_id, error = %err, "memory retrieval failed");
                return None;
            }
            Err(_) => {
                tracing::warn!(analysis_id = %self.analysis_id, "memory retrieval timed out");
                return None;
            }
        };

        if hits.is_empty() {
            return None;
        }
        tracing::debug!(analysis_id = %self.analysis_id, hits = hits.len(), "memory context retrieved");
        Some(
            hits.iter()
                .map(|h| format!("- {}...", excerpt(&h.text, self.config.memory_excerpt_chars)))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    fn compile_verdict(&self, results: &[StageResult]) -> Verdict {
        let risk = results
            .iter()
            .find(|r| r.stage == StageKind::AssessRisk)
            .map(|r| StageView::decode(r.stage, &r.result));
        let risk_view = match &risk {
            Some(StageView::Risk(view)) => Some(view),
            _ => None,
        };

        let decision = results.iter().find(|r| r.stage == StageKind::Decide);
        let (decision_view, confidence) = match decision.map(|r| (StageView::decode(r.stage, &r.result), r.confidence)) {
            Some((StageView::Decision(view), confidence)) => (view, confidence),
            _ => (Default::default(), 0.0),
        };

        Verdict::compile(&decision_view, risk_view, confidence, self.config.top_risks)
    }

    async fn store_insights(&self, problem: &str, verdict: &Verdict) {
        let Some(memory) = self.memory.as_ref() else {
            return;
        };

        let factors = verdict
            .key_factors
            .iter()
            .take(3)
            .map(|f| f.description.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let text = format!(
            "Problem: {}\nDecision: {}\nKey Factors: {}\nConfidence: {}",
            excerpt(problem, INSIGHT_PROBLEM_CHARS),
            verdict.verdict,
            factors,
            verdict.confidence
        );

        let mut metadata = StructuredResult::new();
        metadata.insert("type".into(), json!("decision"));
        metadata.insert("analysis_id".into(), json!(self.analysis_id.to_string()));
        metadata.insert("verdict".into(), json!(verdict.verdict.as_str()));
        metadata.insert("confidence".into(), json!(verdict.confidence));
        metadata.insert(CATEGORY_KEY.into(), json!(ANALYSIS_RESULT_CATEGORY));

        match tokio::time::timeout(self.config.memory_timeout(), memory.add(text, metadata)).await {
            Ok(Ok(id)) => {
                tracing::info!(analysis_id = %self.analysis_id, memory_id = %id, "decision insight stored");
            }
            Ok(Err(err)) => {
                tracing::warn!(analysis_id = %self.analysis_id, error = %err, "failed to store insight");
            }
            Err(_) => {
                tracing::warn!(analysis_id = %self.analysis_id, "storing insight timed out");
            }
        }
    }
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("analysis_id", &self.analysis_id)
            .field("stages", &self.stages.iter().map(|s| s.name().to_string()).collect::<Vec<_>>())
            .field("has_memory", &self.memory.is_some())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn validate_stage_order(stages: &[Arc<dyn Stage>]) -> Result<(), PipelineError> {
    for (position, expected) in StageKind::ALL.iter().enumerate() {
        match stages.get(position) {
            Some(stage) if stage.kind() == *expected => {}
            found => {
                return Err(PipelineError::StageOrder {
                    position,
                    expected: expected.to_string(),
                    found: found.map_or_else(|| "nothing".to_string(), |s| s.kind().to_string()),
                });
            }
        }
    }
    if let Some(extra) = stages.get(StageKind::ALL.len()) {
        return Err(PipelineError::StageOrder {
            position: StageKind::ALL.len(),
            expected: "end of pipeline".to_string(),
            found: extra.kind().to_string(),
        });
    }
    Ok(())
}

fn input_preview(problem: &str, max_chars: usize) -> String {
    if problem.chars().count() > max_chars {
        format!("{}...", excerpt(problem, max_chars))
    } else {
        problem.to_string()
    }
}

fn stage_summary(results: &[StageResult], views: &[StageView], kind: StageKind, empty: &str) -> String {
    results
        .iter()
        .zip(views)
        .find(|(r, _)| r.stage == kind && !r.result.is_empty())
        .map_or_else(|| empty.to_string(), |(_, view)| view.stage_summary())
}
