//! Stage contract
//!
//! Every pipeline stage builds a prompt from its input, invokes inference,
//! parses the raw reply and reports confidence, timing and failure state.
//! [`Stage::run`] is total: inference and parse failures are absorbed into
//! a degraded [`StageResult`] and never escape the stage boundary.

mod llm;

pub use llm::LlmStage;

use crate::config::{PipelineConfig, StageConfig};
use crate::error::InferenceError;
use crate::inference::{InferenceReply, InferenceService};
use crate::parser::{self, Parsed};
use crate::prompts::StageNames;
use crate::types::{StageInput, StageKind, StageOutcome, StageResult, StructuredResult};
use crate::views::StageView;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

/// One pipeline stage
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage identity
    fn kind(&self) -> StageKind;

    /// Stage configuration
    fn config(&self) -> &StageConfig;

    /// Stage name (keys the prior-results map)
    fn name(&self) -> &str {
        &self.config().name
    }

    /// Deterministic prompt for the input
    fn build_prompt(&self, input: &StageInput) -> String;

    /// One inference call for a built prompt
    async fn invoke(&self, prompt: String) -> Result<InferenceReply, InferenceError>;

    /// Parse a raw reply; never fails
    fn parse(&self, raw: &str) -> Parsed {
        parser::parse_reply(self.kind(), raw)
    }

    /// Execute the stage end to end
    async fn run(&self, input: &StageInput) -> StageResult {
        let started = Instant::now();
        let kind = self.kind();
        let name = self.name().to_string();
        tracing::info!(stage = %name, "stage started");

        let prompt = self.build_prompt(input);
        let reply = match self.invoke(prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                let duration_ms = elapsed_ms(started);
                tracing::error!(stage = %name, error = %err, code = err.code(), duration_ms, "stage failed");
                return failed_result(kind, name, &err, duration_ms);
            }
        };

        let parsed = self.parse(&reply.text);
        let outcome = if parsed.is_fallback() {
            StageOutcome::Degraded
        } else {
            StageOutcome::Completed
        };
        let result = parsed.into_result();
        let view = StageView::decode(kind, &result);
        let confidence = view.confidence();
        let tools_used = permitted_tools(self.config(), &view.common().tools_used);
        let duration_ms = elapsed_ms(started);

        if outcome == StageOutcome::Degraded {
            tracing::warn!(stage = %name, duration_ms, "stage reply unparseable, fallback object used");
        } else {
            tracing::info!(stage = %name, confidence, duration_ms, tokens = reply.tokens_used, "stage completed");
        }

        StageResult {
            stage: kind,
            reasoning: view.reasoning_summary(&name),
            stage_name: name,
            result,
            confidence,
            tools_used,
            tokens_used: reply.tokens_used,
            duration_ms,
            outcome,
        }
    }
}

/// The four standard stages, in pipeline order, sharing one backend
#[must_use]
pub fn standard_stages(
    config: &PipelineConfig,
    inference: Arc<dyn InferenceService>,
) -> Vec<Arc<dyn Stage>> {
    let names: StageNames = StageKind::ALL.map(|s| config.stages.get(s).name.clone());
    StageKind::ALL
        .into_iter()
        .map(|kind| {
            Arc::new(
                LlmStage::new(kind, config.stages.get(kind).clone(), Arc::clone(&inference))
                    .with_stage_names(names.clone())
                    .with_timeout(config.inference_timeout()),
            ) as Arc<dyn Stage>
        })
        .collect()
}

fn failed_result(kind: StageKind, name: String, err: &InferenceError, duration_ms: u64) -> StageResult {
    let mut result = StructuredResult::new();
    result.insert("error".into(), Value::String(err.to_string()));
    StageResult {
        stage: kind,
        reasoning: format!("{name} failed with error: {err}"),
        stage_name: name,
        result,
        confidence: 0.0,
        tools_used: Vec::new(),
        tokens_used: 0,
        duration_ms,
        outcome: StageOutcome::Failed,
    }
}

/// Declared capabilities the stage is allowed to report, deduplicated
fn permitted_tools(config: &StageConfig, declared: &[String]) -> Vec<String> {
    let mut tools: Vec<String> = Vec::new();
    for tool in declared {
        if config.permits(tool) && !tools.contains(tool) {
            tools.push(tool.clone());
        }
    }
    tools
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::InferenceRequest;
    use serde_json::json;
    use std::time::Duration;

    struct Fixed(Result<InferenceReply, InferenceError>);

    #[async_trait]
    impl InferenceService for Fixed {
        async fn invoke(&self, _request: InferenceRequest) -> Result<InferenceReply, InferenceError> {
            self.0.clone()
        }
    }

    struct Stalled;

    #[async_trait]
    impl InferenceService for Stalled {
        async fn invoke(&self, _request: InferenceRequest) -> Result<InferenceReply, InferenceError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(InferenceReply::default())
        }
    }

    fn stage(kind: StageKind, inference: impl InferenceService + 'static) -> LlmStage {
        LlmStage::new(kind, StageConfig::for_stage(kind), Arc::new(inference))
    }

    #[tokio::test]
    async fn completed_run_reports_declared_confidence() {
        let reply = json!({
            "overall_risk_score": 0.4,
            "tools_used": ["db_query", "web_search", "db_query"],
            "confidence": 0.85
        })
        .to_string();
        let stage = stage(StageKind::AssessRisk, Fixed(Ok(InferenceReply::new(reply, 321))));

        let result = stage.run(&StageInput::new("idea")).await;
        assert_eq!(result.outcome, StageOutcome::Completed);
        assert_eq!(result.confidence, 0.85);
        assert_eq!(result.tokens_used, 321);
        assert_eq!(result.tools_used, vec!["db_query"]);
        assert_eq!(result.stage_name, "Risk Agent");
        assert_eq!(result.reasoning, "Overall risk level: 40%");
    }

    #[tokio::test]
    async fn garbage_reply_degrades_to_fallback() {
        let stage = stage(StageKind::Gather, Fixed(Ok(InferenceReply::new("no json here", 10))));
        let result = stage.run(&StageInput::new("idea")).await;

        assert_eq!(result.outcome, StageOutcome::Degraded);
        assert_eq!(result.confidence, 0.3);
        assert_eq!(result.error(), Some(parser::PARSE_ERROR_MESSAGE));
    }

    #[tokio::test]
    async fn inference_error_is_absorbed() {
        let err = InferenceError::Transport("connection reset".into());
        let stage = stage(StageKind::Analyze, Fixed(Err(err)));
        let result = stage.run(&StageInput::new("idea")).await;

        assert!(result.is_failed());
        assert_eq!(result.confidence, 0.0);
        assert!(result.tools_used.is_empty());
        assert!(result.error().unwrap().contains("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_absorbed() {
        let stage = stage(StageKind::Decide, Stalled).with_timeout(Duration::from_secs(5));
        let result = stage.run(&StageInput::new("idea")).await;

        assert!(result.is_failed());
        assert!(result.error().unwrap().contains("timed out"));
    }

    #[test]
    fn standard_stages_follow_pipeline_order() {
        let stages = standard_stages(
            &PipelineConfig::default(),
            Arc::new(Fixed(Ok(InferenceReply::default()))),
        );
        let kinds: Vec<_> = stages.iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, StageKind::ALL.to_vec());
    }
}
