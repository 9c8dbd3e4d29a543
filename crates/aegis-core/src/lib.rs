//! Aegis Core - staged reasoning pipeline
//!
//! Turns one natural-language problem statement into an explainable verdict:
//! - Four fixed stages (Gather, Analyze, Assess Risk, Decide), each one
//!   inference call under a strict output contract
//! - Prose-tolerant parsing with deterministic fallbacks
//! - A forward-only state machine with cancellation
//! - A reasoning trace and post-hoc explanation synthesis
//!
//! # Example
//!
//! ```rust,ignore
//! use aegis_core::{ContextMap, PipelineConfig, PipelineOrchestrator};
//! use std::sync::Arc;
//!
//! # async fn example(inference: Arc<dyn aegis_core::InferenceService>) -> Result<(), aegis_core::PipelineError> {
//! let orchestrator = PipelineOrchestrator::new(PipelineConfig::default(), inference);
//! let result = orchestrator
//!     .execute("A subscription service for office plants", ContextMap::new())
//!     .await?;
//!
//! println!("{} ({:.0}%)", result.verdict.verdict, result.verdict.confidence * 100.0);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod explanation;
pub mod inference;
pub mod memory;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod repository;
pub mod service;
pub mod stage;
pub mod state_machine;
pub mod trace;
pub mod types;
pub mod verdict;
pub mod views;

// Re-exports for convenience
pub use config::{PipelineConfig, StageConfig, StageConfigs};
pub use error::{
    ConfigError, InferenceError, MemoryError, PipelineError, RepositoryError, StateMachineError,
    TraceError,
};
pub use explanation::{synthesize_explanation, ConfidenceTier, Explanation, Sentiment, TimelineItem};
pub use inference::{InferenceReply, InferenceRequest, InferenceService};
pub use memory::{remember_feedback, Feedback, InMemoryMemory, MemoryHit, MemoryService};
pub use orchestrator::{PipelineOrchestrator, PipelineStatus};
pub use parser::{parse_reply, Parsed};
pub use repository::{AnalysisRecord, AnalysisRepository, InMemoryRepository};
pub use service::AnalysisService;
pub use stage::{standard_stages, LlmStage, Stage};
pub use state_machine::PipelineState;
pub use trace::{KeyDecision, ReasoningTrace, TraceSummary};
pub use types::{
    AggregateResult, AnalysisId, ContextMap, PriorResults, StageInput, StageKind, StageOutcome,
    StageResult, StructuredResult, TraceEntry,
};
pub use verdict::{Polarity, Probability, RiskItem, Severity, Verdict, VerdictKind, WeightedFactor};
pub use views::StageView;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Aegis Core
    pub use crate::{
        AggregateResult, AnalysisService, ContextMap, InferenceService, MemoryService,
        PipelineConfig, PipelineError, PipelineOrchestrator, PipelineState, Stage, StageKind,
        Verdict, VerdictKind,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
