//! Testing utilities for the Aegis workspace
//!
//! Scripted inference backends, failing collaborators and fixtures shared by
//! the integration tests.

#![allow(missing_docs)]

use aegis_core::error::{InferenceError, MemoryError, RepositoryError};
use aegis_core::memory::{MemoryHit, MemoryService};
use aegis_core::prompts::system_prompt;
use aegis_core::{
    standard_stages, AnalysisId, AnalysisRecord, AnalysisRepository, ContextMap, InMemoryRepository, InferenceReply,
    InferenceRequest, InferenceService, PipelineConfig, PipelineOrchestrator, Stage, StageConfig, StageInput, StageKind,
    StageResult, StructuredResult,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TOKENS_PER_REPLY: u64 = 120;

pub const PROBLEM: &str = "A subscription service that delivers and maintains office plants";

/// Stage a request belongs to, recognised by its system prompt
pub fn stage_of(request: &InferenceRequest) -> Option<StageKind> {
    StageKind::ALL
        .into_iter()
        .find(|s| system_prompt(*s) == request.system_prompt)
}

pub fn gather_reply() -> Value {
    json!({
        "market_overview": {
            "market_size": "$4.2B",
            "growth_rate": "8% CAGR",
            "key_trends": ["Biophilic office design", "Hybrid work"]
        },
        "competitors": [
            {"name": "Leafy Co", "strengths": ["Brand"], "weaknesses": ["Price"]},
            {"name": "GreenDesk", "strengths": ["Coverage"], "weaknesses": ["Service"]}
        ],
        "summary": "Growing market with fragmented competition",
        "confidence": 0.8
    })
}

pub fn analyze_reply() -> Value {
    json!({
        "market_viability": {"score": 0.72},
        "technical_feasibility": {"score": 0.9},
        "business_model_analysis": {"score": 0.6},
        "competitive_position": {"score": 0.55},
        "overall_analysis_score": 0.69,
        "key_insights": ["Recurring revenue", "Low technical risk"],
        "confidence": 0.75
    })
}

pub fn risk_reply() -> Value {
    json!({
        "risks": [
            {
                "category": "operational",
                "description": "Plant mortality during winter",
                "severity": "high",
                "probability": "likely",
                "mitigation": {"strategy": "Seasonal care plans"},
                "impact_score": 0.6
            },
            {
                "category": "market",
                "description": "Office vacancy rates",
                "severity": "medium",
                "probability": "possible",
                "mitigation": "Target coworking spaces",
                "impact_score": 0.4
            }
        ],
        "overall_risk_score": 0.45,
        "risk_matrix_summary": {"critical_risks": 0, "high_risks": 1},
        "top_3_concerns": ["Plant mortality"],
        "confidence": 0.7
    })
}

pub fn decision_reply(verdict: &str) -> Value {
    json!({
        "verdict": verdict,
        "summary": format!("Verdict {verdict} after weighing market and risk"),
        "detailed_reasoning": {"why_this_decision": "Demand is real but operations are demanding"},
        "key_factors": [
            {"factor": "Recurring revenue", "impact": "positive", "weight": 0.8, "explanation": "Subscriptions"},
            {"factor": "Operational complexity", "impact": "negative", "weight": 0.6, "explanation": "Logistics"}
        ],
        "conditions": ["Pilot in one city"],
        "recommendations": [{"priority": "high", "action": "Run a pilot"}],
        "next_steps": ["Interview facility managers", "Price a pilot"],
        "confidence": 0.82
    })
}

/// Well-formed reply for each stage; Decide answers PROCEED
pub fn canned_reply(stage: StageKind) -> Value {
    match stage {
        StageKind::Gather => gather_reply(),
        StageKind::Analyze => analyze_reply(),
        StageKind::AssessRisk => risk_reply(),
        StageKind::Decide => decision_reply("PROCEED"),
    }
}

/// Inference backend answering from a per-stage script and recording every request
#[derive(Debug, Default)]
pub struct ScriptedInference {
    replies: HashMap<StageKind, String>,
    requests: Mutex<Vec<(StageKind, InferenceRequest)>>,
}

impl ScriptedInference {
    /// Canned well-formed replies for all stages
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(mut self, stage: StageKind, reply: impl Into<String>) -> Self {
        self.replies.insert(stage, reply.into());
        self
    }

    pub fn with_json(self, stage: StageKind, reply: &Value) -> Self {
        self.with_reply(stage, reply.to_string())
    }

    pub fn with_verdict(self, verdict: &str) -> Self {
        self.with_json(StageKind::Decide, &decision_reply(verdict))
    }

    pub fn reply_for(&self, stage: StageKind) -> String {
        self.replies
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| canned_reply(stage).to_string())
    }

    pub fn requests(&self) -> Vec<(StageKind, InferenceRequest)> {
        self.requests.lock().clone()
    }

    pub fn prompt_for(&self, stage: StageKind) -> Option<String> {
        self.requests
            .lock()
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, r)| r.user_prompt.clone())
    }
}

#[async_trait]
impl InferenceService for ScriptedInference {
    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceReply, InferenceError> {
        let stage = stage_of(&request)
            .ok_or_else(|| InferenceError::InvalidResponse("unrecognised system prompt".into()))?;
        self.requests.lock().push((stage, request));
        Ok(InferenceReply::new(self.reply_for(stage), TOKENS_PER_REPLY))
    }
}

/// Answers every stage with prose that holds no JSON object
#[derive(Debug, Default)]
pub struct GarbageInference;

#[async_trait]
impl InferenceService for GarbageInference {
    async fn invoke(&self, _request: InferenceRequest) -> Result<InferenceReply, InferenceError> {
        Ok(InferenceReply::new(
            "I am sorry, I cannot produce structured output for this request.",
            TOKENS_PER_REPLY,
        ))
    }
}

/// Stalls on one stage, otherwise answers like [`ScriptedInference`]
#[derive(Debug)]
pub struct StallOnStage {
    pub stage: StageKind,
    pub delay: Duration,
    pub inner: ScriptedInference,
}

impl StallOnStage {
    pub fn new(stage: StageKind, delay: Duration) -> Self {
        Self {
            stage,
            delay,
            inner: ScriptedInference::new(),
        }
    }
}

#[async_trait]
impl InferenceService for StallOnStage {
    async fn invoke(&self, request: InferenceRequest) -> Result<InferenceReply, InferenceError> {
        if stage_of(&request) == Some(self.stage) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.invoke(request).await
    }
}

/// Fails every inference call with the given error
#[derive(Debug)]
pub struct FailingInference(pub InferenceError);

#[async_trait]
impl InferenceService for FailingInference {
    async fn invoke(&self, _request: InferenceRequest) -> Result<InferenceReply, InferenceError> {
        Err(self.0.clone())
    }
}

/// Memory backend that is always unavailable
#[derive(Debug, Default)]
pub struct FailingMemory {
    calls: AtomicUsize,
}

impl FailingMemory {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MemoryService for FailingMemory {
    async fn search(&self, _query: &str, _limit: usize, _category: Option<&str>) -> Result<Vec<MemoryHit>, MemoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(MemoryError::Unavailable("connection refused".into()))
    }

    async fn add(&self, _text: String, _metadata: StructuredResult) -> Result<String, MemoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(MemoryError::Unavailable("connection refused".into()))
    }
}

/// Repository whose reads or writes can be made to fail
#[derive(Debug, Default)]
pub struct FlakyRepository {
    inner: InMemoryRepository,
    fail_get: bool,
    puts_allowed: Option<usize>,
    puts: AtomicUsize,
}

impl FlakyRepository {
    /// Every `get` fails; writes succeed
    pub fn failing_reads() -> Self {
        Self {
            fail_get: true,
            ..Self::default()
        }
    }

    /// The first `allowed` writes succeed, later ones fail
    pub fn failing_writes_after(allowed: usize) -> Self {
        Self {
            puts_allowed: Some(allowed),
            ..Self::default()
        }
    }
}

#[async_trait]
impl AnalysisRepository for FlakyRepository {
    async fn get(&self, id: AnalysisId) -> Result<Option<AnalysisRecord>, RepositoryError> {
        if self.fail_get {
            return Err(RepositoryError::Storage("read timed out".into()));
        }
        self.inner.get(id).await
    }

    async fn put(&self, record: AnalysisRecord) -> Result<(), RepositoryError> {
        let attempt = self.puts.fetch_add(1, Ordering::SeqCst);
        if self.puts_allowed.is_some_and(|allowed| attempt >= allowed) {
            return Err(RepositoryError::Storage("disk full".into()));
        }
        self.inner.put(record).await
    }

    async fn delete(&self, id: AnalysisId) -> Result<bool, RepositoryError> {
        self.inner.delete(id).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<AnalysisRecord>, RepositoryError> {
        self.inner.list(limit).await
    }
}

/// Wraps a stage and keeps a copy of every input it receives
pub struct RecordingStage {
    inner: Arc<dyn Stage>,
    inputs: Mutex<Vec<StageInput>>,
}

impl RecordingStage {
    pub fn new(inner: Arc<dyn Stage>) -> Self {
        Self {
            inner,
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn inputs(&self) -> Vec<StageInput> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn kind(&self) -> StageKind {
        self.inner.kind()
    }

    fn config(&self) -> &StageConfig {
        self.inner.config()
    }

    fn build_prompt(&self, input: &StageInput) -> String {
        self.inner.build_prompt(input)
    }

    async fn invoke(&self, prompt: String) -> Result<InferenceReply, InferenceError> {
        self.inner.invoke(prompt).await
    }

    async fn run(&self, input: &StageInput) -> StageResult {
        self.inputs.lock().push(input.clone());
        self.inner.run(input).await
    }
}

/// Standard stages over `inference`, each wrapped in a [`RecordingStage`]
pub fn recording_stages(config: &PipelineConfig, inference: Arc<dyn InferenceService>) -> Vec<Arc<RecordingStage>> {
    standard_stages(config, inference)
        .into_iter()
        .map(|stage| Arc::new(RecordingStage::new(stage)))
        .collect()
}

pub fn setup_orchestrator(inference: Arc<dyn InferenceService>) -> PipelineOrchestrator {
    PipelineOrchestrator::new(PipelineConfig::default(), inference)
}

pub fn context(pairs: &[(&str, &str)]) -> ContextMap {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), Value::String((*v).to_string())))
        .collect()
}
