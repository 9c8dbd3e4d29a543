//! Human-readable rendering of a completed analysis

use aegis_core::{AggregateResult, Explanation};
use std::fmt::Write;

pub(crate) fn render_aggregate(aggregate: &AggregateResult) -> String {
    let verdict = &aggregate.verdict;
    let mut out = String::new();

    let _ = writeln!(out, "Analysis {}", aggregate.analysis_id);
    let _ = writeln!(out, "Verdict: {} ({:.0}% confidence)", verdict.verdict, verdict.confidence * 100.0);
    if !verdict.summary.is_empty() {
        let _ = writeln!(out, "{}", verdict.summary);
    }

    let _ = writeln!(out, "\nResearch: {}", aggregate.research_summary);
    let _ = writeln!(out, "Analysis: {}", aggregate.analysis_summary);
    let _ = writeln!(out, "Risk:     {}", aggregate.risk_summary);

    if !verdict.risks.is_empty() {
        let _ = writeln!(out, "\nTop risks:");
        for risk in &verdict.risks {
            let _ = writeln!(out, "  - [{:?}] {}", risk.severity, risk.description);
        }
    }
    if !verdict.conditions.is_empty() {
        let _ = writeln!(out, "\nConditions:");
        for condition in &verdict.conditions {
            let _ = writeln!(out, "  - {condition}");
        }
    }

    let _ = writeln!(out, "\nTrace:");
    for entry in &aggregate.trace {
        let _ = writeln!(
            out,
            "  {}. {} - {} ({:.0}%, {} ms)",
            entry.step_number,
            entry.stage_name,
            entry.output_summary,
            entry.confidence * 100.0,
            entry.duration_ms
        );
        if let Some(error) = &entry.error {
            let _ = writeln!(out, "     error: {error}");
        }
    }
    let _ = writeln!(
        out,
        "\n{} tokens in {} ms",
        aggregate.tokens_used, aggregate.total_duration_ms
    );
    out
}

pub(crate) fn render_explanation(explanation: &Explanation) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", explanation.header);
    let _ = writeln!(
        out,
        "Confidence: {} ({})",
        explanation.confidence_level, explanation.confidence_percentage
    );
    if !explanation.summary.is_empty() {
        let _ = writeln!(out, "\n{}", explanation.summary);
    }

    let sections = [
        ("Main reasons", &explanation.main_reasons),
        ("Concerns", &explanation.concerns),
        ("Next actions", &explanation.next_actions),
    ];
    for (title, items) in sections {
        if items.is_empty() {
            continue;
        }
        let _ = writeln!(out, "\n{title}:");
        for item in items {
            let _ = writeln!(out, "  - {item}");
        }
    }

    let _ = writeln!(out, "\nTimeline:");
    for item in &explanation.timeline {
        let _ = writeln!(out, "  {:<10} {} ({})", item.stage, item.outcome, item.confidence);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::{synthesize_explanation, Verdict, VerdictKind};

    fn verdict() -> Verdict {
        Verdict {
            verdict: VerdictKind::Reject,
            summary: "Market too small".into(),
            detailed_rationale: String::new(),
            key_factors: vec![],
            risks: vec![],
            conditions: vec![],
            recommendations: vec![],
            next_steps: vec!["Revisit next year".into()],
            confidence: 0.45,
        }
    }

    #[test]
    fn explanation_lists_sections() {
        let rendered = render_explanation(&synthesize_explanation(&verdict(), &[]));
        assert!(rendered.starts_with("Recommendation: Do Not Proceed"));
        assert!(rendered.contains("Confidence: Low (45%)"));
        assert!(rendered.contains("  - Revisit next year"));
        assert!(!rendered.contains("Concerns:"));
    }
}
