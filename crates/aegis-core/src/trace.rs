//! Reasoning trace recorder
//!
//! Append-only log coupled one-to-one with stage completions. Step numbers
//! are checked on every append so the trace is always the contiguous
//! sequence 1..N.

use crate::error::TraceError;
use crate::types::{AnalysisId, TraceEntry};
use serde::{Deserialize, Serialize};

/// A trace entry whose confidence met the key-decision threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyDecision {
    /// Stage name
    pub stage_name: String,
    /// Action label
    pub action: String,
    /// Output summary
    pub outcome: String,
    /// Stage confidence
    pub confidence: f64,
}

/// Derived explanation of the reasoning process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    /// Number of recorded steps
    pub total_steps: usize,
    /// Stage names, in first-appearance order
    pub stages_involved: Vec<String>,
    /// Sum of stage durations
    pub total_duration_ms: u64,
    /// Mean stage confidence (0 for an empty trace)
    pub average_confidence: f64,
    /// Narrative in trace order
    pub narrative: String,
    /// Entries at or above the key-decision threshold
    pub key_decisions: Vec<KeyDecision>,
    /// Deduplicated capabilities used
    pub tools_used: Vec<String>,
}

/// Ordered reasoning trace of one analysis
#[derive(Debug, Clone, Default)]
pub struct ReasoningTrace {
    analysis_id: AnalysisId,
    entries: Vec<TraceEntry>,
}

impl ReasoningTrace {
    /// Create an empty trace
    #[inline]
    #[must_use]
    pub fn new(analysis_id: AnalysisId) -> Self {
        Self {
            analysis_id,
            entries: Vec::new(),
        }
    }

    /// Rebuild a trace from stored entries, re-checking step order
    pub fn replay(analysis_id: AnalysisId, entries: impl IntoIterator<Item = TraceEntry>) -> Result<Self, TraceError> {
        let mut trace = Self::new(analysis_id);
        for entry in entries {
            trace.record(entry)?;
        }
        Ok(trace)
    }

    /// Step number the next entry must carry
    #[inline]
    #[must_use]
    pub fn next_step(&self) -> usize {
        self.entries.len() + 1
    }

    /// Append an entry
    pub fn record(&mut self, entry: TraceEntry) -> Result<(), TraceError> {
        let expected = self.next_step();
        if entry.step_number != expected {
            return Err(TraceError::StepOutOfOrder {
                expected,
                got: entry.step_number,
            });
        }

        tracing::info!(
            analysis_id = %self.analysis_id,
            step = entry.step_number,
            stage = %entry.stage_name,
            action = %entry.action,
            confidence = entry.confidence,
            duration_ms = entry.duration_ms,
            "reasoning step recorded"
        );
        self.entries.push(entry);
        Ok(())
    }

    /// Entries in step order
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent entry
    #[inline]
    #[must_use]
    pub fn latest(&self) -> Option<&TraceEntry> {
        self.entries.last()
    }

    /// Narrative sentences concatenated in trace order
    #[must_use]
    pub fn narrative(&self) -> String {
        if self.entries.is_empty() {
            return "No analysis performed.".to_string();
        }
        self.entries
            .iter()
            .map(|e| format!("{} {}", e.stage.narrative_lead(), e.output_summary))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Entries whose confidence is at least `threshold`
    #[must_use]
    pub fn key_decisions(&self, threshold: f64) -> Vec<KeyDecision> {
        self.entries
            .iter()
            .filter(|e| e.confidence >= threshold)
            .map(|e| KeyDecision {
                stage_name: e.stage_name.clone(),
                action: e.action.clone(),
                outcome: e.output_summary.clone(),
                confidence: e.confidence,
            })
            .collect()
    }

    /// Union of capabilities used, in first-use order
    #[must_use]
    pub fn tools_used(&self) -> Vec<String> {
        let mut tools: Vec<String> = Vec::new();
        for tool in self.entries.iter().flat_map(|e| &e.tools_used) {
            if !tools.contains(tool) {
                tools.push(tool.clone());
            }
        }
        tools
    }

    /// Full derived explanation of the process
    #[must_use]
    pub fn summary(&self, key_decision_threshold: f64) -> TraceSummary {
        let mut stages_involved: Vec<String> = Vec::new();
        for entry in &self.entries {
            if !stages_involved.contains(&entry.stage_name) {
                stages_involved.push(entry.stage_name.clone());
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let average_confidence = if self.entries.is_empty() {
            0.0
        } else {
            self.entries.iter().map(|e| e.confidence).sum::<f64>() / self.entries.len() as f64
        };

        TraceSummary {
            total_steps: self.entries.len(),
            stages_involved,
            total_duration_ms: self.entries.iter().map(|e| e.duration_ms).sum(),
            average_confidence,
            narrative: self.narrative(),
            key_decisions: self.key_decisions(key_decision_threshold),
            tools_used: self.tools_used(),
        }
    }

    /// Consume into the entry list
    #[inline]
    #[must_use]
    pub fn into_entries(self) -> Vec<TraceEntry> {
        self.entries
    }
}
