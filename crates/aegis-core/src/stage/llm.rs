//! Inference-backed stage

use super::Stage;
use crate::config::StageConfig;
use crate::error::InferenceError;
use crate::inference::{InferenceReply, InferenceRequest, InferenceService};
use crate::prompts::{self, StageNames};
use crate::types::{StageInput, StageKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Default deadline for one inference call
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Stage that renders the standard prompt for its kind and calls an
/// [`InferenceService`] under a deadline
pub struct LlmStage {
    kind: StageKind,
    config: StageConfig,
    names: StageNames,
    inference: Arc<dyn InferenceService>,
    timeout: Duration,
}

impl LlmStage {
    /// Create a stage with default stage names and deadline
    #[must_use]
    pub fn new(kind: StageKind, config: StageConfig, inference: Arc<dyn InferenceService>) -> Self {
        Self {
            kind,
            config,
            names: prompts::default_stage_names(),
            inference,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// With the configured names of all stages, used to look up prior results
    #[inline]
    #[must_use]
    pub fn with_stage_names(mut self, names: StageNames) -> Self {
        self.names = names;
        self
    }

    /// With inference deadline
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for LlmStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmStage")
            .field("kind", &self.kind)
            .field("name", &self.config.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for LlmStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn config(&self) -> &StageConfig {
        &self.config
    }

    fn build_prompt(&self, input: &StageInput) -> String {
        prompts::with_memory_section(
            prompts::task_prompt(self.kind, input, &self.names),
            input.memory_context.as_deref(),
        )
    }

    async fn invoke(&self, prompt: String) -> Result<InferenceReply, InferenceError> {
        let request = InferenceRequest::for_stage(&self.config, prompt);
        tokio::time::timeout(self.timeout, self.inference.invoke(request))
            .await
            .map_err(|_| InferenceError::Timeout(self.timeout))?
    }
}
