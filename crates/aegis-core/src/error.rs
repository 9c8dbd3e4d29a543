//! Error types for Aegis Core
//!
//! Provides the error taxonomy for the pipeline:
//! - Inference failures (absorbed at the stage boundary)
//! - Memory-service failures (always non-fatal)
//! - State machine and trace violations (orchestration-level, fatal)
//! - Configuration and repository errors

use crate::state_machine::PipelineState;
use std::time::Duration;

/// Orchestration-level error
///
/// Only these errors abort an analysis run. Stage-local failures never
/// surface here; they are represented as degraded [`crate::StageResult`]s.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Illegal pipeline state transition
    #[error("state machine error: {0}")]
    IllegalTransition(#[from] StateMachineError),

    /// Stage list does not follow the fixed pipeline order
    #[error("stage order violation at position {position}: expected {expected}, found {found}")]
    StageOrder {
        position: usize,
        expected: String,
        found: String,
    },

    /// Trace recorder rejected an entry
    #[error("trace error: {0}")]
    Trace(#[from] TraceError),

    /// Analysis was cancelled before completion
    #[error("analysis cancelled")]
    Cancelled,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Problem statement rejected before execution
    #[error("invalid problem statement: {0}")]
    InvalidProblem(String),

    /// Feedback rejected before storing
    #[error("invalid feedback: {0}")]
    InvalidFeedback(String),

    /// Unknown analysis identifier
    #[error("analysis not found: {0}")]
    NotFound(String),

    /// Orchestrator has already been run
    #[error("analysis already started (state: {0:?})")]
    AlreadyStarted(PipelineState),

    /// Analysis is still executing
    #[error("analysis still running (state: {0:?})")]
    StillRunning(PipelineState),

    /// Repository failure
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl PipelineError {
    /// Check if error is a cancellation
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if re-submitting the same analysis could succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Repository(_))
    }
}

/// Inference service errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum InferenceError {
    /// Network or transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Call exceeded its deadline
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    /// Provider answered with an error status
    #[error("provider error (status {status}): {message}")]
    Provider {
        /// HTTP-like status code
        status: u16,
        /// Provider message
        message: String,
        /// Whether a retry may succeed
        retryable: bool,
    },

    /// Provider refused the request
    #[error("refused: {0}")]
    Refused(String),

    /// Malformed provider envelope
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// Client misconfiguration
    #[error("configuration error: {0}")]
    Config(String),
}

impl InferenceError {
    /// Whether this error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Provider { retryable, .. } => *retryable,
            Self::Refused(_) | Self::InvalidResponse(_) | Self::Config(_) => false,
        }
    }

    /// Short error code for logging
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
            Self::Provider { .. } => "provider_error",
            Self::Refused(_) => "refused",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Config(_) => "config_error",
        }
    }
}

/// Memory service errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum MemoryError {
    /// Backend not reachable
    #[error("memory service unavailable: {0}")]
    Unavailable(String),

    /// Call exceeded its deadline
    #[error("memory call timed out after {0:?}")]
    Timeout(Duration),

    /// Backend reported a failure
    #[error("memory backend error: {0}")]
    Backend(String),

    /// Entry rejected before storing
    #[error("invalid memory entry: {0}")]
    Invalid(String),
}

/// State machine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// Transition not permitted from the current state
    #[error("illegal transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current state
        from: PipelineState,
        /// Requested state
        to: PipelineState,
    },
}

/// Trace recorder errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceError {
    /// Step number breaks the contiguous 1..N sequence
    #[error("trace step out of order: expected {expected}, got {got}")]
    StepOutOfOrder {
        /// Next valid step number
        expected: usize,
        /// Step number supplied
        got: usize,
    },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Sampling temperature outside [0, 2]
    #[error("stage {stage}: temperature {value} outside [0, 2]")]
    Temperature {
        /// Stage name
        stage: String,
        /// Offending value
        value: f32,
    },

    /// Output budget outside [100, 8000]
    #[error("stage {stage}: max_tokens {value} outside [100, 8000]")]
    MaxTokens {
        /// Stage name
        stage: String,
        /// Offending value
        value: u32,
    },

    /// Config file could not be read
    #[error("cannot read config {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for the schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantically invalid value
    #[error("invalid value: {0}")]
    Invalid(String),
}

/// Analysis repository errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    /// No record for the identifier
    #[error("record not found: {0}")]
    NotFound(String),

    /// Storage backend failure
    #[error("storage failure: {0}")]
    Storage(String),
}
