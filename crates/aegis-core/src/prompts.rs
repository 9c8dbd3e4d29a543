//! Stage prompt templates
//!
//! Each stage gets fixed system instructions describing its JSON output
//! contract, and a task prompt that embeds the problem statement plus the
//! serialized results of the stages it depends on.

use crate::types::{StageInput, StageKind, StructuredResult};
use serde_json::Value;

/// Header of the supplementary memory section
pub const MEMORY_SECTION_HEADER: &str = "[RELEVANT PAST EXPERIENCES]";

const GATHER_SYSTEM: &str = r#"You are the Research stage of a staged decision pipeline.
Gather factual, relevant data about the given business problem or idea.

RULES:
1. Only provide factual, verifiable information; mark estimates as estimates.
2. Do not draw conclusions or make recommendations.
3. Be thorough but concise.

Respond ONLY with a JSON object of this shape:
{
  "market_overview": {"market_size": "...", "growth_rate": "...", "key_trends": ["..."]},
  "competitors": [{"name": "...", "description": "...", "strengths": ["..."], "weaknesses": ["..."]}],
  "target_market": {"demographics": "...", "pain_points": ["..."], "buying_behavior": "..."},
  "industry_insights": ["..."],
  "data_sources": ["..."],
  "data_gaps": ["..."],
  "tools_used": ["web_search"],
  "confidence": 0.8
}"#;

const ANALYZE_SYSTEM: &str = r#"You are the Analysis stage of a staged decision pipeline.
Perform logical and technical analysis of the research data you are given.

RULES:
1. Base all analysis on the provided research data.
2. Be objective: note positives and negatives.
3. Do not make the final decision.

Respond ONLY with a JSON object of this shape:
{
  "market_viability": {"score": 0.75, "assessment": "...", "opportunities": ["..."], "challenges": ["..."]},
  "technical_feasibility": {"score": 0.8, "assessment": "...", "required_capabilities": ["..."], "technical_risks": ["..."]},
  "business_model_analysis": {"score": 0.7, "revenue_potential": "...", "scalability": "...", "unit_economics": "..."},
  "competitive_position": {"score": 0.65, "advantages": ["..."], "disadvantages": ["..."], "differentiation": "..."},
  "key_success_factors": ["..."],
  "critical_assumptions": ["..."],
  "overall_analysis_score": 0.72,
  "reasoning": "step-by-step explanation",
  "tools_used": ["calculator"],
  "confidence": 0.8
}"#;

const RISK_SYSTEM: &str = r#"You are the Risk stage of a staged decision pipeline.
Identify and assess the risks of the proposal using the research and analysis you are given.

Severity: critical | high | medium | low
Probability: very_likely | likely | possible | unlikely

Respond ONLY with a JSON object of this shape:
{
  "risks": [{
    "id": "RISK-001",
    "category": "market|technical|financial|operational|regulatory|competitive",
    "title": "...",
    "description": "...",
    "severity": "high",
    "probability": "possible",
    "impact_score": 0.8,
    "mitigation": {"strategy": "...", "effort": "medium", "effectiveness": 0.7}
  }],
  "risk_matrix_summary": {"critical_risks": 0, "high_risks": 1, "medium_risks": 2, "low_risks": 1},
  "overall_risk_score": 0.65,
  "top_3_concerns": ["...", "...", "..."],
  "reasoning": "how the assessment was made",
  "tools_used": ["db_query"],
  "confidence": 0.8
}"#;

const DECIDE_SYSTEM: &str = r#"You are the Decision stage of a staged decision pipeline.
Synthesize all prior findings and make the final decision with clear reasoning.

Verdicts:
- PROCEED: benefits outweigh risks
- REJECT: risks or challenges are too significant
- CONDITIONAL: proceed only if stated conditions are met

Respond ONLY with a JSON object of this shape:
{
  "verdict": "PROCEED|REJECT|CONDITIONAL",
  "summary": "executive summary",
  "detailed_reasoning": {"why_this_decision": "...", "key_considerations": ["..."], "trade_offs_considered": "..."},
  "key_factors": [{"factor": "...", "impact": "positive|negative|neutral", "weight": 0.9, "explanation": "..."}],
  "conditions": ["..."],
  "recommendations": [{"priority": "high", "action": "...", "rationale": "...", "timeline": "..."}],
  "next_steps": ["..."],
  "confidence": 0.82
}"#;

/// System instructions for a stage
#[must_use]
pub fn system_prompt(stage: StageKind) -> &'static str {
    match stage {
        StageKind::Gather => GATHER_SYSTEM,
        StageKind::Analyze => ANALYZE_SYSTEM,
        StageKind::AssessRisk => RISK_SYSTEM,
        StageKind::Decide => DECIDE_SYSTEM,
    }
}

/// Stage names indexed by [`StageKind::index`]
pub type StageNames = [String; 4];

/// Default stage names
#[must_use]
pub fn default_stage_names() -> StageNames {
    StageKind::ALL.map(|s| s.default_name().to_string())
}

/// Task prompt for a stage; a pure function of the input
///
/// Prior results are looked up under `names`, the configured stage names.
#[must_use]
pub fn task_prompt(stage: StageKind, input: &StageInput, names: &StageNames) -> String {
    let mut prompt = String::new();
    let heading = match stage {
        StageKind::Gather => "RESEARCH TASK",
        StageKind::Analyze => "ANALYSIS TASK",
        StageKind::AssessRisk => "RISK ASSESSMENT TASK",
        StageKind::Decide => "DECISION TASK",
    };
    prompt.push_str(&format!("## {heading}\n\n**Problem/Idea:**\n{}\n", input.task));

    if stage == StageKind::Gather {
        prompt.push_str(&format!(
            "\n**Additional Context:**\n{}\n",
            render_context(input)
        ));
    }

    for dep in stage.dependencies() {
        let name = &names[dep.index()];
        let data = input.prior(name);
        prompt.push_str(&format!(
            "\n### {} (from {name}):\n```json\n{}\n```\n",
            section_title(*dep),
            render_json(data)
        ));
    }

    let focus: &[&str] = match stage {
        StageKind::Gather => &[
            "Market size and potential",
            "Existing competitors",
            "Target audience characteristics",
            "Industry trends and dynamics",
        ],
        StageKind::Analyze => &[
            "Evaluate market viability from the research",
            "Assess technical feasibility",
            "Analyze business model potential",
            "Determine competitive positioning",
        ],
        StageKind::AssessRisk => &[
            "Identify significant risks across categories",
            "Assess severity and probability",
            "Propose mitigation strategies",
            "Provide an overall risk score",
        ],
        StageKind::Decide => &[
            "Synthesize all of the above",
            "Weigh the pros and cons",
            "Make a clear PROCEED, REJECT, or CONDITIONAL decision",
            "Explain the reasoning and give actionable next steps",
        ],
    };
    prompt.push_str("\n**Focus:**\n");
    for (i, item) in focus.iter().enumerate() {
        prompt.push_str(&format!("{}. {item}\n", i + 1));
    }
    prompt.push_str("\nReturn your findings in the specified JSON format.\n");
    prompt
}

/// Append the delimited memory section, if any
#[must_use]
pub fn with_memory_section(prompt: String, memory: Option<&str>) -> String {
    match memory {
        Some(memory) if !memory.trim().is_empty() => {
            format!("{prompt}\n\n{MEMORY_SECTION_HEADER}\n{memory}")
        }
        _ => prompt,
    }
}

fn section_title(stage: StageKind) -> &'static str {
    match stage {
        StageKind::Gather => "RESEARCH FINDINGS",
        StageKind::Analyze => "ANALYSIS RESULTS",
        StageKind::AssessRisk => "RISK ASSESSMENT",
        StageKind::Decide => "DECISION",
    }
}

fn render_context(input: &StageInput) -> String {
    if let Some(info) = input.context.get("additional_info").and_then(Value::as_str) {
        return info.to_string();
    }
    if input.context.is_empty() {
        return "None provided".to_string();
    }
    serde_json::to_string_pretty(&input.context).unwrap_or_else(|_| "None provided".to_string())
}

fn render_json(data: Option<&StructuredResult>) -> String {
    let empty = StructuredResult::new();
    serde_json::to_string_pretty(data.unwrap_or(&empty)).unwrap_or_else(|_| "{}".to_string())
}
