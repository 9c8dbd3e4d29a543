//! Typed stage views
//!
//! Stage results travel between stages as free-form maps so the contract
//! stays coupled to generative output. At every boundary that needs a field
//! (confidence, reasoning summary, verdict compilation, trace summaries) the
//! map is decoded once into a tagged per-stage view with explicit defaults.
//! All accessors are total: missing or mistyped fields decode to defaults.

use crate::types::{StageKind, StructuredResult};
use crate::verdict::{clamp_unit, RiskItem, VerdictKind, WeightedFactor};
use serde_json::Value;

/// Placeholder reasoning some models emit verbatim
const PLACEHOLDER_REASONING: &str = "Analysis completed.";

/// Characters of `why_this_decision` kept in a reasoning summary
const RATIONALE_EXCERPT_CHARS: usize = 150;

/// Characters of `summary` kept when it is the only reasoning source
const SUMMARY_EXCERPT_CHARS: usize = 200;

/// Get value at a dot-separated path
#[must_use]
pub fn get_path<'a>(map: &'a StructuredResult, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = map.get(segments.next()?)?;
    for segment in segments {
        match current {
            Value::Object(inner) => current = inner.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Finite number, or a string that parses as one
#[must_use]
pub fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_at(map: &StructuredResult, path: &str) -> Option<String> {
    get_path(map, path).and_then(as_text)
}

fn number_at(map: &StructuredResult, path: &str) -> Option<f64> {
    get_path(map, path).and_then(as_number)
}

fn list_at(map: &StructuredResult, path: &str) -> Vec<String> {
    match get_path(map, path) {
        Some(Value::Array(items)) => items.iter().filter_map(as_text).collect(),
        _ => Vec::new(),
    }
}

fn percent(score: f64) -> String {
    format!("{:.0}%", score * 100.0)
}

/// Fields every stage result may carry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommonView {
    /// Explicit reasoning text
    pub reasoning: Option<String>,
    /// `detailed_reasoning.why_this_decision`
    pub why_this_decision: Option<String>,
    /// `detailed_reasoning.key_considerations`
    pub key_considerations: Vec<String>,
    /// Free-text summary
    pub summary: Option<String>,
    /// Bullet key points
    pub key_points: Vec<String>,
    /// Free-text conclusion
    pub conclusion: Option<String>,
    /// Declared confidence before clamping
    pub declared_confidence: Option<f64>,
    /// Declared capabilities used (unfiltered)
    pub tools_used: Vec<String>,
    /// Error payload, if the stage degraded or failed
    pub error: Option<String>,
}

impl CommonView {
    fn decode(map: &StructuredResult) -> Self {
        Self {
            reasoning: text_at(map, "reasoning")
                .filter(|r| r.trim() != PLACEHOLDER_REASONING),
            why_this_decision: text_at(map, "detailed_reasoning.why_this_decision"),
            key_considerations: list_at(map, "detailed_reasoning.key_considerations"),
            summary: text_at(map, "summary"),
            key_points: list_at(map, "key_points"),
            conclusion: text_at(map, "conclusion"),
            declared_confidence: number_at(map, "confidence")
                .or_else(|| number_at(map, "confidence_score")),
            tools_used: list_at(map, "tools_used"),
            error: text_at(map, "error"),
        }
    }
}

/// Gather stage view
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatherView {
    /// Common fields
    pub common: CommonView,
    /// Whether a `market_overview` object was present
    pub has_market_overview: bool,
    /// `market_overview.market_size`
    pub market_size: Option<String>,
    /// `market_overview.growth_rate`
    pub growth_rate: Option<String>,
    /// `market_overview.key_trends`
    pub key_trends: Vec<String>,
    /// Number of `competitors` entries
    pub competitor_count: usize,
}

/// Analyze stage view
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzeView {
    /// Common fields
    pub common: CommonView,
    /// `overall_analysis_score`
    pub overall_score: Option<f64>,
    /// `market_viability.score`
    pub market_viability: Option<f64>,
    /// `technical_feasibility.score`
    pub technical_feasibility: Option<f64>,
    /// `business_model_analysis.score`
    pub business_model: Option<f64>,
    /// `competitive_position.score`
    pub competitive_position: Option<f64>,
}

/// Risk stage view
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskView {
    /// Common fields
    pub common: CommonView,
    /// `overall_risk_score`
    pub overall_risk_score: Option<f64>,
    /// `risk_matrix_summary.critical_risks`
    pub critical_risks: u64,
    /// `risk_matrix_summary.high_risks`
    pub high_risks: u64,
    /// Itemized risks, in declared order
    pub risks: Vec<RiskItem>,
    /// `top_3_concerns`
    pub top_concerns: Vec<String>,
}

/// Decision stage view
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionView {
    /// Common fields
    pub common: CommonView,
    /// Normalized verdict (`Conditional` when absent or unknown)
    pub verdict: VerdictKind,
    /// Whether a verdict field was present at all
    pub has_verdict: bool,
    /// Weighted factors
    pub key_factors: Vec<WeightedFactor>,
    /// Conditions for a conditional verdict
    pub conditions: Vec<String>,
    /// Recommended actions (`action` of object entries, or plain strings)
    pub recommendations: Vec<String>,
    /// Next steps
    pub next_steps: Vec<String>,
}

/// Tagged decoder over the four stage output shapes
#[derive(Debug, Clone, PartialEq)]
pub enum StageView {
    /// Gather output
    Gather(GatherView),
    /// Analyze output
    Analyze(AnalyzeView),
    /// Risk output
    Risk(RiskView),
    /// Decision output
    Decision(DecisionView),
}

impl StageView {
    /// Decode a stage result into its view
    #[must_use]
    pub fn decode(stage: StageKind, map: &StructuredResult) -> Self {
        let common = CommonView::decode(map);
        match stage {
            StageKind::Gather => StageView::Gather(GatherView {
                common,
                has_market_overview: matches!(map.get("market_overview"), Some(Value::Object(_))),
                market_size: text_at(map, "market_overview.market_size"),
                growth_rate: text_at(map, "market_overview.growth_rate"),
                key_trends: list_at(map, "market_overview.key_trends"),
                competitor_count: map
                    .get("competitors")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len),
            }),
            StageKind::Analyze => StageView::Analyze(AnalyzeView {
                common,
                overall_score: number_at(map, "overall_analysis_score"),
                market_viability: number_at(map, "market_viability.score"),
                technical_feasibility: number_at(map, "technical_feasibility.score"),
                business_model: number_at(map, "business_model_analysis.score"),
                competitive_position: number_at(map, "competitive_position.score"),
            }),
            StageKind::AssessRisk => StageView::Risk(RiskView {
                common,
                overall_risk_score: number_at(map, "overall_risk_score"),
                critical_risks: count_at(map, "risk_matrix_summary.critical_risks"),
                high_risks: count_at(map, "risk_matrix_summary.high_risks"),
                risks: map
                    .get("risks")
                    .and_then(Value::as_array)
                    .map(|items| items.iter().filter_map(RiskItem::from_value).collect())
                    .unwrap_or_default(),
                top_concerns: list_at(map, "top_3_concerns"),
            }),
            StageKind::Decide => {
                let label = text_at(map, "verdict");
                StageView::Decision(DecisionView {
                    common,
                    verdict: label
                        .as_deref()
                        .map_or(VerdictKind::Conditional, VerdictKind::from_label),
                    has_verdict: label.is_some(),
                    key_factors: map
                        .get("key_factors")
                        .and_then(Value::as_array)
                        .map(|items| items.iter().filter_map(WeightedFactor::from_value).collect())
                        .unwrap_or_default(),
                    conditions: list_at(map, "conditions"),
                    recommendations: recommendations(map),
                    next_steps: list_at(map, "next_steps"),
                })
            }
        }
    }

    /// Stage this view was decoded for
    #[must_use]
    pub fn stage(&self) -> StageKind {
        match self {
            StageView::Gather(_) => StageKind::Gather,
            StageView::Analyze(_) => StageKind::Analyze,
            StageView::Risk(_) => StageKind::AssessRisk,
            StageView::Decision(_) => StageKind::Decide,
        }
    }

    /// Fields shared by every stage
    #[must_use]
    pub fn common(&self) -> &CommonView {
        match self {
            StageView::Gather(v) => &v.common,
            StageView::Analyze(v) => &v.common,
            StageView::Risk(v) => &v.common,
            StageView::Decision(v) => &v.common,
        }
    }

    /// Confidence in [0, 1]
    ///
    /// `confidence` is canonical, `confidence_score` is accepted when it is
    /// absent or not numeric. Out-of-range values are clamped; a missing or
    /// non-numeric value yields the stage default.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.common()
            .declared_confidence
            .map_or_else(|| self.stage().default_confidence(), clamp_unit)
    }

    /// One-line reasoning summary, by fixed precedence
    #[must_use]
    pub fn reasoning_summary(&self, stage_name: &str) -> String {
        let common = self.common();

        if let Some(reasoning) = &common.reasoning {
            return reasoning.trim().to_string();
        }

        let mut parts = Vec::new();
        if let Some(why) = &common.why_this_decision {
            parts.push(format!(
                "Rationale: {}",
                crate::parser::excerpt(why, RATIONALE_EXCERPT_CHARS)
            ));
        }
        if !common.key_considerations.is_empty() {
            parts.push(format!(
                "Key considerations: {}",
                common.key_considerations.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        if !parts.is_empty() {
            return parts.join(" | ");
        }

        let domain = self.domain_parts();
        if !domain.is_empty() {
            return domain.join(" | ");
        }

        if let Some(summary) = &common.summary {
            return crate::parser::excerpt(summary, SUMMARY_EXCERPT_CHARS);
        }
        if !common.key_points.is_empty() {
            return format!(
                "Key points: {}",
                common.key_points.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
            );
        }
        if let Some(conclusion) = &common.conclusion {
            return format!("Conclusion: {conclusion}");
        }

        format!("Completed {stage_name} analysis. Check the summary for key findings.")
    }

    fn domain_parts(&self) -> Vec<String> {
        let mut parts = Vec::new();
        match self {
            StageView::Gather(v) => {
                let mut market = Vec::new();
                if let Some(size) = &v.market_size {
                    market.push(format!("Market size: {size}"));
                }
                if let Some(growth) = &v.growth_rate {
                    market.push(format!("Growth: {growth}"));
                }
                if !v.key_trends.is_empty() {
                    market.push(format!(
                        "Trends: {}",
                        v.key_trends.iter().take(2).cloned().collect::<Vec<_>>().join(", ")
                    ));
                }
                if !market.is_empty() {
                    parts.push(market.join(" | "));
                }
            }
            StageView::Analyze(v) => {
                if let Some(score) = v.overall_score {
                    parts.push(format!("Overall viability score: {}", percent(score)));
                }
                if let Some(score) = v.market_viability {
                    parts.push(format!("Market viability: {}", percent(score)));
                }
            }
            StageView::Risk(v) => {
                if let Some(score) = v.overall_risk_score {
                    parts.push(format!("Overall risk level: {}", percent(score)));
                }
                if v.critical_risks > 0 || v.high_risks > 0 {
                    parts.push(format!(
                        "Identified {} critical and {} high-priority risks",
                        v.critical_risks, v.high_risks
                    ));
                }
            }
            StageView::Decision(v) => {
                if v.has_verdict {
                    parts.push(format!(
                        "Reached decision: {} (confidence: {})",
                        v.verdict,
                        percent(self.confidence())
                    ));
                }
            }
        }
        parts
    }

    /// One-line outcome for a trace entry
    #[must_use]
    pub fn output_summary(&self) -> String {
        if let Some(error) = &self.common().error {
            return format!("Error: {error}");
        }
        let declared = self.common().declared_confidence;
        match self {
            StageView::Decision(v) if v.has_verdict => format!(
                "Decision: {} (confidence: {})",
                v.verdict,
                declared.map_or_else(|| "N/A".to_string(), |c| c.to_string())
            ),
            StageView::Risk(RiskView { overall_risk_score: Some(score), .. }) => {
                format!("Risk Score: {score}")
            }
            StageView::Analyze(AnalyzeView { overall_score: Some(score), .. }) => {
                format!("Analysis Score: {score}")
            }
            StageView::Gather(v) if v.has_market_overview => "Market research completed".to_string(),
            _ => "Analysis completed".to_string(),
        }
    }

    /// Human-readable per-stage summary for the aggregate result
    #[must_use]
    pub fn stage_summary(&self) -> String {
        match self {
            StageView::Gather(v) => {
                let mut parts = Vec::new();
                if let Some(size) = &v.market_size {
                    parts.push(format!("Market: {size}"));
                }
                if v.competitor_count > 0 {
                    parts.push(format!("Competitors identified: {}", v.competitor_count));
                }
                if !v.key_trends.is_empty() {
                    parts.push(format!("Key trends: {}", v.key_trends.len()));
                }
                if parts.is_empty() {
                    "Research completed".to_string()
                } else {
                    parts.join(" | ")
                }
            }
            StageView::Analyze(v) => {
                let scores: Vec<String> = [
                    ("Market", v.market_viability),
                    ("Tech", v.technical_feasibility),
                    ("Business", v.business_model),
                ]
                .into_iter()
                .filter_map(|(label, score)| {
                    score.filter(|s| *s != 0.0).map(|s| format!("{label}: {}", percent(s)))
                })
                .collect();
                if scores.is_empty() {
                    "Analysis completed".to_string()
                } else {
                    scores.join(" | ")
                }
            }
            StageView::Risk(v) => format!(
                "Overall Risk: {} | Critical: {} | High: {}",
                percent(v.overall_risk_score.unwrap_or(0.0)),
                v.critical_risks,
                v.high_risks
            ),
            StageView::Decision(v) => v
                .common
                .summary
                .clone()
                .unwrap_or_else(|| v.verdict.to_string()),
        }
    }
}

fn count_at(map: &StructuredResult, path: &str) -> u64 {
    number_at(map, path).map_or(0, |n| {
        if n <= 0.0 {
            0
        } else {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let count = n.round() as u64;
            count
        }
    })
}

fn recommendations(map: &StructuredResult) -> Vec<String> {
    let Some(Value::Array(items)) = map.get("recommendations") else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(rec) => rec.get("action").and_then(as_text),
            other => as_text(other),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn map(value: Value) -> StructuredResult {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn get_path_walks_objects() {
        let m = map(json!({"a": {"b": {"c": 3}}, "x": [1]}));
        assert_eq!(get_path(&m, "a.b.c"), Some(&json!(3)));
        assert_eq!(get_path(&m, "a.missing"), None);
        assert_eq!(get_path(&m, "x.0"), None);
    }

    #[test]
    fn confidence_prefers_canonical_field() {
        let view = StageView::decode(
            StageKind::Decide,
            &map(json!({"confidence": 0.9, "confidence_score": 0.2})),
        );
        assert_eq!(view.confidence(), 0.9);
    }

    #[test]
    fn confidence_score_used_when_canonical_invalid() {
        let view = StageView::decode(
            StageKind::Decide,
            &map(json!({"confidence": "high", "confidence_score": "0.65"})),
        );
        assert_eq!(view.confidence(), 0.65);
    }

    #[test]
    fn confidence_defaults_per_stage() {
        let empty = StructuredResult::new();
        assert_eq!(StageView::decode(StageKind::Gather, &empty).confidence(), 0.6);
        assert_eq!(StageView::decode(StageKind::Analyze, &empty).confidence(), 0.7);
        assert_eq!(StageView::decode(StageKind::Decide, &empty).confidence(), 0.5);
    }

    #[test]
    fn confidence_clamped() {
        let high = StageView::decode(StageKind::Analyze, &map(json!({"confidence": 7})));
        let low = StageView::decode(StageKind::Analyze, &map(json!({"confidence": -0.5})));
        assert_eq!(high.confidence(), 1.0);
        assert_eq!(low.confidence(), 0.0);
    }

    #[test]
    fn explicit_reasoning_wins() {
        let view = StageView::decode(
            StageKind::Analyze,
            &map(json!({"reasoning": "Strong unit economics", "overall_analysis_score": 0.8})),
        );
        assert_eq!(view.reasoning_summary("Analysis Agent"), "Strong unit economics");
    }

    #[test]
    fn placeholder_reasoning_is_skipped() {
        let view = StageView::decode(
            StageKind::Analyze,
            &map(json!({"reasoning": "Analysis completed.", "overall_analysis_score": 0.72})),
        );
        assert_eq!(view.reasoning_summary("Analysis Agent"), "Overall viability score: 72%");
    }

    #[test]
    fn detailed_reasoning_before_domain_fields() {
        let view = StageView::decode(
            StageKind::Decide,
            &map(json!({
                "verdict": "PROCEED",
                "detailed_reasoning": {
                    "why_this_decision": "Demand is proven",
                    "key_considerations": ["a", "b", "c", "d"]
                }
            })),
        );
        assert_eq!(
            view.reasoning_summary("Decision Agent"),
            "Rationale: Demand is proven | Key considerations: a, b, c"
        );
    }

    #[test]
    fn domain_fields_per_stage() {
        let gather = StageView::decode(
            StageKind::Gather,
            &map(json!({"market_overview": {"market_size": "$2B", "growth_rate": "12%", "key_trends": ["x", "y", "z"]}})),
        );
        assert_eq!(
            gather.reasoning_summary("Research Agent"),
            "Market size: $2B | Growth: 12% | Trends: x, y"
        );

        let risk = StageView::decode(
            StageKind::AssessRisk,
            &map(json!({"overall_risk_score": 0.65, "risk_matrix_summary": {"critical_risks": 1, "high_risks": 2}})),
        );
        assert_eq!(
            risk.reasoning_summary("Risk Agent"),
            "Overall risk level: 65% | Identified 1 critical and 2 high-priority risks"
        );

        let decision = StageView::decode(
            StageKind::Decide,
            &map(json!({"verdict": "NO-GO", "confidence": 0.82})),
        );
        assert_eq!(
            decision.reasoning_summary("Decision Agent"),
            "Reached decision: REJECT (confidence: 82%)"
        );
    }

    #[test]
    fn generic_fallbacks() {
        let summary = StageView::decode(StageKind::Gather, &map(json!({"summary": "short"})));
        assert_eq!(summary.reasoning_summary("Research Agent"), "short");

        let empty = StageView::decode(StageKind::Gather, &StructuredResult::new());
        assert_eq!(
            empty.reasoning_summary("Research Agent"),
            "Completed Research Agent analysis. Check the summary for key findings."
        );
    }

    #[test]
    fn output_summaries() {
        let error = StageView::decode(StageKind::Analyze, &map(json!({"error": "boom"})));
        assert_eq!(error.output_summary(), "Error: boom");

        let decision = StageView::decode(StageKind::Decide, &map(json!({"verdict": "PROCEED", "confidence": 0.8})));
        assert_eq!(decision.output_summary(), "Decision: PROCEED (confidence: 0.8)");

        let risk = StageView::decode(StageKind::AssessRisk, &map(json!({"overall_risk_score": 0.4})));
        assert_eq!(risk.output_summary(), "Risk Score: 0.4");

        let gather = StageView::decode(StageKind::Gather, &map(json!({"market_overview": {}})));
        assert_eq!(gather.output_summary(), "Market research completed");
    }

    #[test]
    fn stage_summaries() {
        let gather = StageView::decode(
            StageKind::Gather,
            &map(json!({"market_overview": {"market_size": "$5B", "key_trends": ["a", "b"]}, "competitors": [{}, {}, {}]})),
        );
        assert_eq!(gather.stage_summary(), "Market: $5B | Competitors identified: 3 | Key trends: 2");

        let analyze = StageView::decode(
            StageKind::Analyze,
            &map(json!({"market_viability": {"score": 0.75}, "technical_feasibility": {"score": 0.8}, "business_model_analysis": {"score": 0}})),
        );
        assert_eq!(analyze.stage_summary(), "Market: 75% | Tech: 80%");

        let risk = StageView::decode(StageKind::AssessRisk, &map(json!({"risk_matrix_summary": {"high_risks": 2}})));
        assert_eq!(risk.stage_summary(), "Overall Risk: 0% | Critical: 0 | High: 2");
    }

    #[test]
    fn recommendations_accept_objects_and_strings() {
        let view = StageView::decode(
            StageKind::Decide,
            &map(json!({"recommendations": [{"action": "Pilot"}, "Raise seed", 3, {"priority": "low"}]})),
        );
        let StageView::Decision(d) = view else { panic!("decision view expected") };
        assert_eq!(d.recommendations, vec!["Pilot", "Raise seed", "3"]);
    }

    proptest! {
        #[test]
        fn prop_confidence_always_in_unit_interval(raw in prop_oneof![
            any::<f64>().prop_map(|f| serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)),
            any::<i64>().prop_map(|n| json!(n)),
            ".{0,8}".prop_map(Value::String),
            Just(Value::Null),
        ]) {
            for stage in StageKind::ALL {
                let mut m = StructuredResult::new();
                m.insert("confidence".into(), raw.clone());
                let c = StageView::decode(stage, &m).confidence();
                prop_assert!((0.0..=1.0).contains(&c));
            }
        }
    }
}
