//! Core types for Aegis
//!
//! Defines the fundamental types exchanged along the pipeline:
//! - Analysis identifiers
//! - Stage identity and ordering
//! - Stage inputs and results
//! - Trace entries
//! - The compiled aggregate result

use crate::state_machine::PipelineState;
use crate::verdict::Verdict;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

/// Stage-specific structured result (free-form keyed map)
pub type StructuredResult = Map<String, Value>;

/// Shared free-form context map supplied by the caller
pub type ContextMap = Map<String, Value>;

/// Prior stage results keyed by stage name, in execution order
pub type PriorResults = IndexMap<String, StructuredResult>;

/// Unique analysis identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AnalysisId(pub Ulid);

impl AnalysisId {
    /// Generate new analysis ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for AnalysisId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AnalysisId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AnalysisId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// The four fixed pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Gather facts about the problem
    Gather,
    /// Analyze viability from gathered facts
    Analyze,
    /// Assess risks from facts and analysis
    AssessRisk,
    /// Synthesize the final verdict
    Decide,
}

impl StageKind {
    /// Execution order; total and fixed
    pub const ALL: [StageKind; 4] = [
        StageKind::Gather,
        StageKind::Analyze,
        StageKind::AssessRisk,
        StageKind::Decide,
    ];

    /// Zero-based position in the pipeline
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            StageKind::Gather => 0,
            StageKind::Analyze => 1,
            StageKind::AssessRisk => 2,
            StageKind::Decide => 3,
        }
    }

    /// Default stage name; keys the prior-results map
    #[inline]
    #[must_use]
    pub fn default_name(self) -> &'static str {
        match self {
            StageKind::Gather => "Research Agent",
            StageKind::Analyze => "Analysis Agent",
            StageKind::AssessRisk => "Risk Agent",
            StageKind::Decide => "Decision Agent",
        }
    }

    /// Default role label
    #[inline]
    #[must_use]
    pub fn default_role(self) -> &'static str {
        match self {
            StageKind::Gather => "Data Gatherer",
            StageKind::Analyze => "Strategic Analyst",
            StageKind::AssessRisk => "Risk Assessor",
            StageKind::Decide => "Decision Maker",
        }
    }

    /// Confidence used when the reply declares none (or an invalid one)
    #[inline]
    #[must_use]
    pub fn default_confidence(self) -> f64 {
        match self {
            StageKind::Gather => 0.6,
            StageKind::Analyze | StageKind::AssessRisk => 0.7,
            StageKind::Decide => 0.5,
        }
    }

    /// Opening sentence of this stage's narrative line
    #[inline]
    #[must_use]
    pub fn narrative_lead(self) -> &'static str {
        match self {
            StageKind::Gather => "First, we gathered information about the problem.",
            StageKind::Analyze => "Next, we analyzed the data to evaluate viability.",
            StageKind::AssessRisk => "We then assessed potential risks.",
            StageKind::Decide => "Finally, we synthesized everything to reach a decision.",
        }
    }

    /// Pipeline state while this stage runs
    #[inline]
    #[must_use]
    pub fn running_state(self) -> PipelineState {
        match self {
            StageKind::Gather => PipelineState::Gathering,
            StageKind::Analyze => PipelineState::Analyzing,
            StageKind::AssessRisk => PipelineState::AssessingRisk,
            StageKind::Decide => PipelineState::Deciding,
        }
    }

    /// Stages whose results this stage's prompt embeds
    #[must_use]
    pub fn dependencies(self) -> &'static [StageKind] {
        match self {
            StageKind::Gather => &[],
            StageKind::Analyze => &[StageKind::Gather],
            StageKind::AssessRisk => &[StageKind::Gather, StageKind::Analyze],
            StageKind::Decide => &[StageKind::Gather, StageKind::Analyze, StageKind::AssessRisk],
        }
    }

    /// Whether this is the terminal stage
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, StageKind::Decide)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.default_name())
    }
}

/// Input to a single stage invocation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageInput {
    /// Original problem statement
    pub task: String,
    /// Shared caller context
    pub context: ContextMap,
    /// Results of every stage completed so far
    pub prior_results: PriorResults,
    /// Retrieved long-term memory (first stage only)
    pub memory_context: Option<String>,
}

impl StageInput {
    /// Create new input
    #[inline]
    #[must_use]
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }

    /// With context map
    #[inline]
    #[must_use]
    pub fn with_context(mut self, context: ContextMap) -> Self {
        self.context = context;
        self
    }

    /// With prior results
    #[inline]
    #[must_use]
    pub fn with_prior_results(mut self, prior: PriorResults) -> Self {
        self.prior_results = prior;
        self
    }

    /// With memory context
    #[inline]
    #[must_use]
    pub fn with_memory(mut self, memory: Option<String>) -> Self {
        self.memory_context = memory.filter(|m| !m.trim().is_empty());
        self
    }

    /// Prior result for a stage name
    #[inline]
    #[must_use]
    pub fn prior(&self, stage_name: &str) -> Option<&StructuredResult> {
        self.prior_results.get(stage_name)
    }
}

/// How a stage run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Reply parsed into structured data
    Completed,
    /// Reply unparseable; deterministic fallback object used
    Degraded,
    /// Inference or parsing raised; error payload recorded
    Failed,
}

/// Result of one stage execution; immutable once produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage identity
    pub stage: StageKind,
    /// Stage name
    pub stage_name: String,
    /// Structured result (or error payload)
    pub result: StructuredResult,
    /// One-line reasoning summary
    pub reasoning: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Capabilities actually invoked
    pub tools_used: Vec<String>,
    /// Token cost of the inference call
    pub tokens_used: u64,
    /// Wall-clock duration
    pub duration_ms: u64,
    /// Completion state
    pub outcome: StageOutcome,
}

impl StageResult {
    /// Error message recorded in the structured result, if any
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.result.get("error").and_then(Value::as_str)
    }

    /// Whether the stage raised past inference or parsing
    #[inline]
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.outcome == StageOutcome::Failed
    }
}

/// One entry of the reasoning trace; append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// 1-based contiguous step number
    pub step_number: usize,
    /// Stage identity
    pub stage: StageKind,
    /// Stage name
    pub stage_name: String,
    /// Action label
    pub action: String,
    /// Truncated problem preview
    pub input_summary: String,
    /// One-line output summary
    pub output_summary: String,
    /// Stage reasoning summary
    pub reasoning: String,
    /// Capabilities used by the stage
    pub tools_used: Vec<String>,
    /// Stage confidence
    pub confidence: f64,
    /// Stage duration
    pub duration_ms: u64,
    /// Error recorded by the stage, if any
    pub error: Option<String>,
    /// Completion time
    pub timestamp: DateTime<Utc>,
}

/// Compiled aggregate of one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Analysis identifier
    pub analysis_id: AnalysisId,
    /// Final state (always completed for a returned aggregate)
    pub status: PipelineState,
    /// Gather stage summary
    pub research_summary: String,
    /// Analyze stage summary
    pub analysis_summary: String,
    /// Risk stage summary
    pub risk_summary: String,
    /// Final verdict
    pub verdict: Verdict,
    /// Full ordered trace
    pub trace: Vec<TraceEntry>,
    /// Total wall-clock duration
    pub total_duration_ms: u64,
    /// Summed token cost across stages
    pub tokens_used: u64,
    /// Raw structured result per stage, in execution order
    pub stage_outputs: PriorResults,
}
