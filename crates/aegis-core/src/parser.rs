//! Structured response parser
//!
//! Extracts one JSON object from an inference reply that may carry leading
//! or trailing prose. Parsing never fails: when nothing decodes, a
//! deterministic stage-specific fallback object is returned so downstream
//! stages always receive a well-shaped map.

use crate::types::{StageKind, StructuredResult};
use serde_json::{json, Value};

/// Characters of the raw reply kept in a fallback object
pub const RAW_EXCERPT_CHARS: usize = 500;

/// Confidence declared by every fallback object
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Error message stored in fallback objects
pub const PARSE_ERROR_MESSAGE: &str = "Failed to parse response";

/// Outcome of parsing one reply
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// Reply contained a decodable object
    Structured(StructuredResult),
    /// Nothing decoded; fallback object substituted
    Fallback(StructuredResult),
}

impl Parsed {
    /// Whether the fallback object was used
    #[inline]
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Parsed::Fallback(_))
    }

    /// The result map, whichever way it was produced
    #[inline]
    #[must_use]
    pub fn into_result(self) -> StructuredResult {
        match self {
            Parsed::Structured(map) | Parsed::Fallback(map) => map,
        }
    }
}

/// Parse a raw reply for a stage
///
/// Candidates are tried in order:
/// 1. greedy span from the first `{` to the last `}`
/// 2. the balanced object opened by the first `{` (string-aware)
/// 3. the entire trimmed reply
///
/// The first candidate that decodes to a JSON object wins.
#[must_use]
pub fn parse_reply(stage: StageKind, raw: &str) -> Parsed {
    match extract_object(raw) {
        Some(map) => Parsed::Structured(map),
        None => {
            tracing::debug!(stage = %stage, "reply not decodable, using fallback object");
            Parsed::Fallback(fallback_object(stage, raw))
        }
    }
}

/// Locate and decode the first JSON object in `raw`
#[must_use]
pub fn extract_object(raw: &str) -> Option<StructuredResult> {
    let trimmed = raw.trim();

    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                if let Some(map) = decode_object(&trimmed[start..=end]) {
                    return Some(map);
                }
            }
        }

        let remainder = &trimmed[start..];
        if let Some(end) = find_matching_brace(remainder) {
            if let Some(map) = decode_object(&remainder[..end]) {
                return Some(map);
            }
        }
    }

    decode_object(trimmed)
}

fn decode_object(candidate: &str) -> Option<StructuredResult> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Byte offset just past the brace closing the object that opens `s`.
/// Braces inside JSON strings are not counted.
fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            continue;
        }
        match c {
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Deterministic fallback object for a stage
#[must_use]
pub fn fallback_object(stage: StageKind, raw: &str) -> StructuredResult {
    let defaults = match stage {
        StageKind::Gather => json!({
            "market_overview": {"market_size": "Unable to parse", "key_trends": []},
            "competitors": [],
            "target_market": {},
            "industry_insights": [],
        }),
        StageKind::Analyze => json!({
            "market_viability": {"score": 0.5, "assessment": "Unable to parse"},
            "technical_feasibility": {"score": 0.5},
            "business_model_analysis": {"score": 0.5},
            "competitive_position": {"score": 0.5},
            "overall_analysis_score": 0.5,
        }),
        StageKind::AssessRisk => json!({
            "risks": [],
            "risk_matrix_summary": {},
            "overall_risk_score": 0.5,
            "top_3_concerns": ["Unable to parse risk assessment"],
        }),
        StageKind::Decide => json!({
            "verdict": "CONDITIONAL",
            "summary": "Unable to parse decision - manual review required",
            "key_factors": [],
            "recommendations": [],
            "next_steps": ["Review raw output manually"],
        }),
    };

    let mut map = StructuredResult::new();
    map.insert("error".into(), Value::String(PARSE_ERROR_MESSAGE.into()));
    map.insert(
        "raw_response".into(),
        Value::String(excerpt(raw, RAW_EXCERPT_CHARS)),
    );
    if let Value::Object(fields) = defaults {
        map.extend(fields);
    }
    map.insert("confidence".into(), json!(FALLBACK_CONFIDENCE));
    map
}

/// First `max_chars` characters of `text`, respecting char boundaries
#[must_use]
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
