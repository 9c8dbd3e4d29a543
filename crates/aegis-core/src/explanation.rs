//! Explanation synthesizer
//!
//! Pure transform of a verdict and its trace into a human-readable
//! explanation: sentiment and header by verdict, a five-tier confidence
//! label, factors split by polarity and a simplified per-stage timeline.

use crate::types::TraceEntry;
use crate::verdict::{Polarity, Verdict, VerdictKind};
use serde::{Deserialize, Serialize};

/// Suffix dropped from stage names in the timeline
const STAGE_NAME_SUFFIX: &str = " Agent";

/// Overall tone of the explanation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    /// Proceed
    Positive,
    /// Reject
    Negative,
    /// Conditional
    Neutral,
}

/// Five-tier confidence label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceTier {
    /// Below 0.4
    #[serde(rename = "Very Low")]
    VeryLow,
    /// At least 0.4
    Low,
    /// At least 0.6
    Moderate,
    /// At least 0.75
    High,
    /// At least 0.9
    #[serde(rename = "Very High")]
    VeryHigh,
}

impl ConfidenceTier {
    /// Tier for a confidence value
    #[must_use]
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.9 {
            ConfidenceTier::VeryHigh
        } else if confidence >= 0.75 {
            ConfidenceTier::High
        } else if confidence >= 0.6 {
            ConfidenceTier::Moderate
        } else if confidence >= 0.4 {
            ConfidenceTier::Low
        } else {
            ConfidenceTier::VeryLow
        }
    }

    /// Display label
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            ConfidenceTier::VeryHigh => "Very High",
            ConfidenceTier::High => "High",
            ConfidenceTier::Moderate => "Moderate",
            ConfidenceTier::Low => "Low",
            ConfidenceTier::VeryLow => "Very Low",
        }
    }
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One timeline row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
    /// Stage label without the role suffix
    pub stage: String,
    /// One-line outcome
    pub outcome: String,
    /// Confidence as a percentage
    pub confidence: String,
}

/// Human-readable explanation of a verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// Headline recommendation
    pub header: String,
    /// Tone
    pub sentiment: Sentiment,
    /// Confidence tier
    pub confidence_level: ConfidenceTier,
    /// Confidence as a percentage
    pub confidence_percentage: String,
    /// Executive summary
    pub summary: String,
    /// Positive factors
    pub main_reasons: Vec<String>,
    /// Negative factors
    pub concerns: Vec<String>,
    /// Next steps
    pub next_actions: Vec<String>,
    /// Per-stage timeline
    pub timeline: Vec<TimelineItem>,
}

fn percentage(value: f64) -> String {
    format!("{:.0}%", value * 100.0)
}

/// Synthesize an explanation from a verdict and its trace
#[must_use]
pub fn synthesize_explanation(verdict: &Verdict, trace: &[TraceEntry]) -> Explanation {
    let (sentiment, header) = match verdict.verdict {
        VerdictKind::Proceed => (Sentiment::Positive, "Recommendation: Proceed"),
        VerdictKind::Reject => (Sentiment::Negative, "Recommendation: Do Not Proceed"),
        VerdictKind::Conditional => (Sentiment::Neutral, "Recommendation: Proceed with Conditions"),
    };

    let factor_names = |polarity| {
        verdict
            .factors(polarity)
            .map(|f| f.description.clone())
            .collect::<Vec<_>>()
    };

    Explanation {
        header: header.to_string(),
        sentiment,
        confidence_level: ConfidenceTier::from_confidence(verdict.confidence),
        confidence_percentage: percentage(verdict.confidence),
        summary: verdict.summary.clone(),
        main_reasons: factor_names(Polarity::Positive),
        concerns: factor_names(Polarity::Negative),
        next_actions: verdict.next_steps.clone(),
        timeline: trace
            .iter()
            .map(|e| TimelineItem {
                stage: e
                    .stage_name
                    .strip_suffix(STAGE_NAME_SUFFIX)
                    .unwrap_or(&e.stage_name)
                    .to_string(),
                outcome: e.output_summary.clone(),
                confidence: percentage(e.confidence),
            })
            .collect(),
    }
}
