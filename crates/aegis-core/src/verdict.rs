//! Final verdict model
//!
//! The verdict is compiled exactly once, from the terminal stage's result
//! and the risk stage's itemized risks. Every field has an explicit default
//! so a degraded or failed decision still yields a well-formed verdict.

use crate::types::StructuredResult;
use crate::views::{DecisionView, RiskView};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Verdict value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictKind {
    /// Benefits outweigh risks
    #[serde(alias = "GO")]
    Proceed,
    /// Risks or challenges too significant
    #[serde(alias = "NO-GO", alias = "NO_GO")]
    Reject,
    /// Proceed only if conditions are met
    #[default]
    Conditional,
}

impl VerdictKind {
    /// Decode a verdict label; unknown labels decode as `Conditional`
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_ascii_uppercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "PROCEED" | "GO" => VerdictKind::Proceed,
            "REJECT" | "NO-GO" | "NOGO" => VerdictKind::Reject,
            _ => VerdictKind::Conditional,
        }
    }

    /// Canonical label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            VerdictKind::Proceed => "PROCEED",
            VerdictKind::Reject => "REJECT",
            VerdictKind::Conditional => "CONDITIONAL",
        }
    }
}

impl std::fmt::Display for VerdictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction in which a factor pushes the decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Supports proceeding
    Positive,
    /// Argues against proceeding
    Negative,
    /// No clear direction
    #[default]
    Neutral,
}

impl Polarity {
    fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "positive" => Polarity::Positive,
            "negative" => Polarity::Negative,
            _ => Polarity::Neutral,
        }
    }
}

/// One weighted decision factor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedFactor {
    /// What the factor is
    pub description: String,
    /// Direction of influence
    pub polarity: Polarity,
    /// Relative weight in [0, 1]
    pub weight: f64,
    /// Why it matters
    pub explanation: String,
}

impl WeightedFactor {
    /// Decode one `key_factors` entry; non-objects are skipped
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        Some(Self {
            description: string_field(map, &["factor", "description"]),
            polarity: Polarity::from_label(&string_field(map, &["impact", "polarity"])),
            weight: unit_field(map, "weight", 0.5),
            explanation: string_field(map, &["explanation"]),
        })
    }
}

/// Severity tier of a risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Low impact
    Low,
    /// Moderate impact
    #[default]
    Medium,
    /// High impact
    High,
    /// Potentially fatal to the venture
    Critical,
}

impl Severity {
    fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "low" => Severity::Low,
            _ => Severity::Medium,
        }
    }
}

/// Probability tier of a risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Probability {
    /// Unlikely to occur
    Unlikely,
    /// Could occur
    #[default]
    Possible,
    /// Likely to occur
    Likely,
    /// Very likely to occur
    VeryLikely,
}

impl Probability {
    fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "very_likely" => Probability::VeryLikely,
            "likely" => Probability::Likely,
            "unlikely" => Probability::Unlikely,
            _ => Probability::Possible,
        }
    }
}

/// One itemized risk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskItem {
    /// Risk category
    pub category: String,
    /// Description
    pub description: String,
    /// Severity tier
    pub severity: Severity,
    /// Probability tier
    pub probability: Probability,
    /// Mitigation strategy
    pub mitigation: String,
    /// Impact score in [0, 1]
    pub impact_score: f64,
}

impl RiskItem {
    /// Decode one `risks` entry; non-objects are skipped
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let category = string_field(map, &["category"]);
        let mitigation = match map.get("mitigation") {
            Some(Value::Object(m)) => m
                .get("strategy")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Some(Self {
            category: if category.is_empty() { "unknown".into() } else { category },
            description: string_field(map, &["description", "title"]),
            severity: Severity::from_label(&string_field(map, &["severity"])),
            probability: Probability::from_label(&string_field(map, &["probability"])),
            mitigation,
            impact_score: unit_field(map, "impact_score", 0.5),
        })
    }
}

/// Final decision of an analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Verdict value
    pub verdict: VerdictKind,
    /// Executive summary
    pub summary: String,
    /// Detailed rationale
    pub detailed_rationale: String,
    /// Weighted factors, in declared order
    pub key_factors: Vec<WeightedFactor>,
    /// Highest-ranked risks from the risk stage
    pub risks: Vec<RiskItem>,
    /// Conditions attached to a conditional verdict
    pub conditions: Vec<String>,
    /// Recommended actions
    pub recommendations: Vec<String>,
    /// Next steps
    pub next_steps: Vec<String>,
    /// Aggregate confidence in [0, 1]
    #[serde(alias = "confidence_score")]
    pub confidence: f64,
}

impl Verdict {
    /// Compile from the decision and risk views
    ///
    /// `confidence` is the terminal stage's already-normalized confidence.
    #[must_use]
    pub fn compile(
        decision: &DecisionView,
        risk: Option<&RiskView>,
        confidence: f64,
        top_risks: usize,
    ) -> Self {
        let risks = risk
            .map(|r| r.risks.iter().take(top_risks).cloned().collect())
            .unwrap_or_default();

        let summary = match (&decision.common.summary, &decision.common.error) {
            (Some(summary), _) => summary.clone(),
            (None, Some(error)) => format!("Decision unavailable: {error}"),
            (None, None) => String::new(),
        };

        Self {
            verdict: decision.verdict,
            summary,
            detailed_rationale: decision.common.why_this_decision.clone().unwrap_or_default(),
            key_factors: decision.key_factors.clone(),
            risks,
            conditions: decision.conditions.clone(),
            recommendations: decision.recommendations.clone(),
            next_steps: decision.next_steps.clone(),
            confidence: clamp_unit(confidence),
        }
    }

    /// Factors with the given polarity, in declared order
    pub fn factors(&self, polarity: Polarity) -> impl Iterator<Item = &WeightedFactor> {
        self.key_factors.iter().filter(move |f| f.polarity == polarity)
    }
}

fn string_field(map: &StructuredResult, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| match map.get(*k) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

fn unit_field(map: &StructuredResult, key: &str, default: f64) -> f64 {
    map.get(key)
        .and_then(crate::views::as_number)
        .map_or(default, clamp_unit)
}

/// Clamp into [0, 1]; NaN maps to 0
#[inline]
#[must_use]
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StageKind;
    use crate::views::StageView;
    use serde_json::json;

    fn map(value: Value) -> StructuredResult {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn verdict_labels_normalize() {
        assert_eq!(VerdictKind::from_label("PROCEED"), VerdictKind::Proceed);
        assert_eq!(VerdictKind::from_label("go"), VerdictKind::Proceed);
        assert_eq!(VerdictKind::from_label("NO-GO"), VerdictKind::Reject);
        assert_eq!(VerdictKind::from_label("no_go"), VerdictKind::Reject);
        assert_eq!(VerdictKind::from_label("Reject"), VerdictKind::Reject);
        assert_eq!(VerdictKind::from_label("maybe?"), VerdictKind::Conditional);
    }

    #[test]
    fn verdict_kind_serde_accepts_legacy_labels() {
        let kind: VerdictKind = serde_json::from_value(json!("NO-GO")).unwrap();
        assert_eq!(kind, VerdictKind::Reject);
        assert_eq!(serde_json::to_value(VerdictKind::Proceed).unwrap(), json!("PROCEED"));
    }

    #[test]
    fn factor_defaults_and_clamping() {
        let factor = WeightedFactor::from_value(&json!({
            "factor": "Strong demand",
            "impact": "positive",
            "weight": 1.7
        }))
        .unwrap();
        assert_eq!(factor.polarity, Polarity::Positive);
        assert_eq!(factor.weight, 1.0);
        assert!(factor.explanation.is_empty());

        assert!(WeightedFactor::from_value(&json!("bare string")).is_none());
    }

    #[test]
    fn risk_mitigation_accepts_object_or_string() {
        let a = RiskItem::from_value(&json!({
            "severity": "critical",
            "probability": "very likely",
            "mitigation": {"strategy": "hedge"}
        }))
        .unwrap();
        assert_eq!(a.mitigation, "hedge");
        assert_eq!(a.category, "unknown");
        assert_eq!(a.severity, Severity::Critical);
        assert_eq!(a.probability, Probability::VeryLikely);

        let b = RiskItem::from_value(&json!({"mitigation": "insure", "impact_score": "0.9"})).unwrap();
        assert_eq!(b.mitigation, "insure");
        assert_eq!(b.severity, Severity::Medium);
        assert_eq!(b.impact_score, 0.9);
    }

    #[test]
    fn compile_takes_top_risks_and_defaults() {
        let decision = map(json!({
            "verdict": "GO",
            "summary": "Go for it",
            "detailed_reasoning": {"why_this_decision": "Demand is strong"},
            "key_factors": [{"factor": "demand", "impact": "positive", "weight": 0.9}],
            "recommendations": [{"action": "Ship MVP"}, "Hire"],
            "conditions": ["Secure funding"],
        }));
        let risks: Vec<Value> = (0..8).map(|i| json!({"description": format!("risk {i}")})).collect();
        let risk = map(json!({"risks": risks}));

        let StageView::Decision(d) = StageView::decode(StageKind::Decide, &decision) else {
            panic!("decision view expected");
        };
        let StageView::Risk(r) = StageView::decode(StageKind::AssessRisk, &risk) else {
            panic!("risk view expected");
        };

        let verdict = Verdict::compile(&d, Some(&r), 0.82, 5);
        assert_eq!(verdict.verdict, VerdictKind::Proceed);
        assert_eq!(verdict.risks.len(), 5);
        assert_eq!(verdict.recommendations, vec!["Ship MVP", "Hire"]);
        assert_eq!(verdict.detailed_rationale, "Demand is strong");
        assert_eq!(verdict.conditions, vec!["Secure funding"]);
        assert_eq!(verdict.confidence, 0.82);
    }

    #[test]
    fn failed_decision_compiles_to_conditional() {
        let decision = map(json!({"error": "inference timed out after 5s"}));
        let StageView::Decision(d) = StageView::decode(StageKind::Decide, &decision) else {
            panic!("decision view expected");
        };
        let verdict = Verdict::compile(&d, None, 0.0, 5);
        assert_eq!(verdict.verdict, VerdictKind::Conditional);
        assert_eq!(verdict.confidence, 0.0);
        assert!(verdict.summary.contains("timed out"));
        assert!(verdict.risks.is_empty());
    }

    #[test]
    fn confidence_score_alias_deserializes() {
        let verdict: Verdict = serde_json::from_value(json!({
            "verdict": "REJECT",
            "summary": "",
            "detailed_rationale": "",
            "key_factors": [],
            "risks": [],
            "conditions": [],
            "recommendations": [],
            "next_steps": [],
            "confidence_score": 0.4
        }))
        .unwrap();
        assert_eq!(verdict.confidence, 0.4);
    }

    #[test]
    fn clamp_handles_nan() {
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(-3.0), 0.0);
        assert_eq!(clamp_unit(0.25), 0.25);
    }
}
