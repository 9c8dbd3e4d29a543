//! Analysis service
//!
//! Entry point for the transport layer. Validates problem statements,
//! persists records through an injected [`AnalysisRepository`] and owns
//! exactly one [`PipelineOrchestrator`] per in-flight analysis id.

use crate::config::PipelineConfig;
use crate::error::{MemoryError, PipelineError};
use crate::explanation::{synthesize_explanation, Explanation};
use crate::inference::InferenceService;
use crate::memory::{remember_feedback, Feedback, MemoryService};
use crate::orchestrator::{PipelineOrchestrator, PipelineStatus};
use crate::repository::{AnalysisRecord, AnalysisRepository};
use crate::trace::{ReasoningTrace, TraceSummary};
use crate::types::{AggregateResult, AnalysisId, ContextMap, TraceEntry};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;

/// Shortest accepted problem statement, in characters
pub const MIN_PROBLEM_CHARS: usize = 20;

/// Longest accepted problem statement, in characters
pub const MAX_PROBLEM_CHARS: usize = 5000;

type Running = Arc<DashMap<AnalysisId, Arc<PipelineOrchestrator>>>;

/// Runs analyses and answers queries about them
pub struct AnalysisService {
    config: PipelineConfig,
    inference: Arc<dyn InferenceService>,
    memory: Option<Arc<dyn MemoryService>>,
    repository: Arc<dyn AnalysisRepository>,
    running: Running,
}

impl AnalysisService {
    /// Create a service
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        inference: Arc<dyn InferenceService>,
        repository: Arc<dyn AnalysisRepository>,
    ) -> Self {
        Self {
            config,
            inference,
            memory: None,
            repository,
            running: Arc::new(DashMap::new()),
        }
    }

    /// With memory service
    #[inline]
    #[must_use]
    pub fn with_memory(mut self, memory: Arc<dyn MemoryService>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Trimmed problem statement, if its length is acceptable
    pub fn validate_problem(problem: &str) -> Result<String, PipelineError> {
        let trimmed = problem.trim();
        let chars = trimmed.chars().count();
        if chars < MIN_PROBLEM_CHARS {
            return Err(PipelineError::InvalidProblem(format!(
                "must be at least {MIN_PROBLEM_CHARS} characters, got {chars}"
            )));
        }
        if chars > MAX_PROBLEM_CHARS {
            return Err(PipelineError::InvalidProblem(format!(
                "must be at most {MAX_PROBLEM_CHARS} characters, got {chars}"
            )));
        }
        Ok(trimmed.to_string())
    }

    async fn prepare(
        &self,
        problem: &str,
        context: &ContextMap,
    ) -> Result<(Arc<PipelineOrchestrator>, AnalysisRecord), PipelineError> {
        let problem = Self::validate_problem(problem)?;
        let mut orchestrator = PipelineOrchestrator::new(self.config.clone(), Arc::clone(&self.inference));
        if let Some(memory) = &self.memory {
            orchestrator = orchestrator.with_memory(Arc::clone(memory));
        }
        let orchestrator = Arc::new(orchestrator);
        let id = orchestrator.analysis_id();

        let record = AnalysisRecord::new(id, problem, context.clone());
        self.repository.put(record.clone()).await?;
        self.running.insert(id, Arc::clone(&orchestrator));
        tracing::info!(analysis_id = %id, "analysis created");
        Ok((orchestrator, record))
    }

    /// Start an analysis in the background
    pub async fn start(&self, problem: &str, context: ContextMap) -> Result<AnalysisId, PipelineError> {
        let (orchestrator, record) = self.prepare(problem, &context).await?;
        let id = orchestrator.analysis_id();
        let repository = Arc::clone(&self.repository);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            if let Err(err) = drive(repository, running, orchestrator, record, context).await {
                tracing::error!(analysis_id = %id, error = %err, "failed to persist analysis outcome");
            }
        });
        Ok(id)
    }

    /// Run an analysis to completion and return its final record
    pub async fn run(&self, problem: &str, context: ContextMap) -> Result<AnalysisRecord, PipelineError> {
        let (orchestrator, record) = self.prepare(problem, &context).await?;
        drive(
            Arc::clone(&self.repository),
            Arc::clone(&self.running),
            orchestrator,
            record,
            context,
        )
        .await
    }

    async fn record(&self, id: AnalysisId) -> Result<AnalysisRecord, PipelineError> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))
    }

    fn live(&self, id: AnalysisId) -> Option<Arc<PipelineOrchestrator>> {
        self.running.get(&id).map(|o| Arc::clone(o.value()))
    }

    /// Current status
    pub async fn status(&self, id: AnalysisId) -> Result<PipelineStatus, PipelineError> {
        if let Some(orchestrator) = self.live(id) {
            return Ok(orchestrator.get_status());
        }
        let record = self.record(id).await?;
        let trace = record.result.as_ref().map(|r| r.trace.as_slice()).unwrap_or_default();
        Ok(PipelineStatus {
            analysis_id: id,
            state: record.status,
            current_stage: None,
            progress_percent: record.status.progress_percent(),
            completed_steps: trace.len(),
            latest_step: trace.last().cloned(),
        })
    }

    /// Trace recorded so far
    pub async fn trace(&self, id: AnalysisId) -> Result<Vec<TraceEntry>, PipelineError> {
        if let Some(orchestrator) = self.live(id) {
            return Ok(orchestrator.get_trace());
        }
        let record = self.record(id).await?;
        Ok(record.result.map(|r| r.trace).unwrap_or_default())
    }

    /// Compiled aggregate, once the analysis has completed
    pub async fn result(&self, id: AnalysisId) -> Result<Option<AggregateResult>, PipelineError> {
        Ok(self.record(id).await?.result)
    }

    /// Explanation of a completed analysis
    pub async fn explain(&self, id: AnalysisId) -> Result<Explanation, PipelineError> {
        let result = self
            .result(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("{id} has no completed result")))?;
        Ok(synthesize_explanation(&result.verdict, &result.trace))
    }

    /// Derived summary of the reasoning process
    pub async fn trace_summary(&self, id: AnalysisId) -> Result<TraceSummary, PipelineError> {
        let entries = self.trace(id).await?;
        let trace = ReasoningTrace::replay(id, entries)?;
        Ok(trace.summary(self.config.key_decision_threshold))
    }

    /// Request cancellation; returns whether a live run was signalled
    pub async fn cancel(&self, id: AnalysisId) -> Result<bool, PipelineError> {
        if let Some(orchestrator) = self.live(id) {
            orchestrator.cancel();
            tracing::info!(analysis_id = %id, "cancellation requested");
            return Ok(true);
        }
        self.record(id).await?;
        Ok(false)
    }

    /// Most recent analyses
    pub async fn list(&self, limit: usize) -> Result<Vec<AnalysisRecord>, PipelineError> {
        Ok(self.repository.list(limit).await?)
    }

    /// Number of orchestrators whose outcome is not yet persisted
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.running.len()
    }

    /// Delete a finished analysis record
    ///
    /// A finished run whose outcome could not be persisted is dropped as well.
    pub async fn delete(&self, id: AnalysisId) -> Result<bool, PipelineError> {
        let live = self
            .running
            .remove_if(&id, |_, orchestrator| orchestrator.state().is_terminal())
            .is_some();
        if let Some(orchestrator) = self.live(id) {
            return Err(PipelineError::StillRunning(orchestrator.state()));
        }
        Ok(self.repository.delete(id).await? || live)
    }

    /// Store user feedback on an analysis in long-term memory
    ///
    /// Returns the memory id, or `None` when no memory service is configured.
    pub async fn feedback(&self, id: AnalysisId, feedback: &Feedback) -> Result<Option<String>, PipelineError> {
        self.record(id).await?;
        let Some(memory) = &self.memory else {
            return Ok(None);
        };
        match remember_feedback(memory.as_ref(), id, feedback).await {
            Ok(memory_id) => Ok(Some(memory_id)),
            Err(MemoryError::Invalid(reason)) => Err(PipelineError::InvalidFeedback(reason)),
            Err(err) => {
                tracing::warn!(analysis_id = %id, error = %err, "failed to store feedback");
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for AnalysisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisService")
            .field("running", &self.running.len())
            .field("has_memory", &self.memory.is_some())
            .finish_non_exhaustive()
    }
}

/// Execute one orchestrator and persist its terminal state
///
/// The orchestrator leaves the live set once its outcome is stored. When the
/// final write fails it stays live, so queries keep answering from it.
async fn drive(
    repository: Arc<dyn AnalysisRepository>,
    running: Running,
    orchestrator: Arc<PipelineOrchestrator>,
    mut record: AnalysisRecord,
    context: ContextMap,
) -> Result<AnalysisRecord, PipelineError> {
    let id = orchestrator.analysis_id();
    let outcome = orchestrator.execute(&record.problem_statement, context).await;

    record.status = orchestrator.state();
    record.completed_at = Some(Utc::now());
    match outcome {
        Ok(aggregate) => record.result = Some(aggregate),
        Err(err) => record.error = Some(err.to_string()),
    }

    repository.put(record.clone()).await?;
    running.remove(&id);
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_length_bounds() {
        assert!(AnalysisService::validate_problem("too short").is_err());
        assert!(AnalysisService::validate_problem(&"a".repeat(5001)).is_err());
        assert_eq!(
            AnalysisService::validate_problem("   exactly twenty chars!   ").unwrap(),
            "exactly twenty chars!"
        );
        assert!(AnalysisService::validate_problem(&"é".repeat(20)).is_ok());
    }
}
