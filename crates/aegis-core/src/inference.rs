//! Inference service interface
//!
//! The generative model is an external collaborator. Stages depend only on
//! this trait; the HTTP client lives in `aegis-gateway`.

use crate::config::StageConfig;
use crate::error::InferenceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One inference call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// System instructions
    pub system_prompt: String,
    /// Task prompt
    pub user_prompt: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Output-length budget
    pub max_tokens: u32,
}

impl InferenceRequest {
    /// Build a request from a stage configuration and a task prompt
    #[must_use]
    pub fn for_stage(config: &StageConfig, user_prompt: String) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            user_prompt,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// Reply to one inference call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceReply {
    /// Raw generated text
    pub text: String,
    /// Total tokens billed for the call
    pub tokens_used: u64,
}

impl InferenceReply {
    /// Create a reply
    #[inline]
    #[must_use]
    pub fn new(text: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            text: text.into(),
            tokens_used,
        }
    }
}

/// Generative inference backend
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Perform one call; may fail with a transport or timeout error
    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceReply, InferenceError>;
}
