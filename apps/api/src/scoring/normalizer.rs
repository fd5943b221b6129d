//! Scoring normalizer: turns whatever the generation service returned into a canonical
//! `MatchResult`, or computes a deterministic keyword-overlap score when it returned
//! nothing usable.
//!
//! `normalize` never fails. Deciding whether the AI call "worked" is the caller's job;
//! the `method` field tells it which path produced the result.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::llm_client::strip_json_fences;
use crate::scoring::keywords::tokenize;

/// Which path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMethod {
    Ai,
    Basic,
}

impl ScoringMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMethod::Ai => "ai",
            ScoringMethod::Basic => "basic",
        }
    }
}

/// Canonical match / ATS score. `score` is always within 0–100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub score: u8,
    pub matched_factors: BTreeSet<String>,
    pub missing_factors: BTreeSet<String>,
    pub explanation: String,
    pub method: ScoringMethod,
}

/// Text the fallback scorer compares.
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    /// Candidate skills / CV text.
    pub candidate_text: &'a str,
    /// Job requirements / description text.
    pub requirements_text: &'a str,
}

/// Shape the AI is asked to return. Accepts camelCase aliases and numeric strings.
#[derive(Debug, Deserialize)]
struct AiMatchPayload {
    #[serde(deserialize_with = "lenient_score")]
    score: f64,
    #[serde(default, alias = "matchedFactors", alias = "matched_skills")]
    matched_factors: Vec<String>,
    #[serde(default, alias = "missingFactors", alias = "missing_skills")]
    missing_factors: Vec<String>,
    #[serde(default)]
    explanation: Option<String>,
}

fn lenient_score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Value::deserialize(deserializer)?;
    let score = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    score
        .filter(|s| s.is_finite())
        .ok_or_else(|| D::Error::custom(format!("score is not numeric: {value}")))
}

/// Normalizes a raw AI response, falling back to keyword overlap when it is absent
/// or malformed.
pub fn normalize(raw: Option<&Value>, input: &ScoringInput<'_>) -> MatchResult {
    match raw.and_then(parse_ai_payload) {
        Some(payload) => from_ai_payload(payload),
        None => basic_match(input),
    }
}

fn parse_ai_payload(raw: &Value) -> Option<AiMatchPayload> {
    match raw {
        // Some models return the JSON object as a string, sometimes fenced.
        Value::String(text) => serde_json::from_str(strip_json_fences(text)).ok(),
        Value::Object(_) => serde_json::from_value(raw.clone()).ok(),
        _ => None,
    }
}

fn from_ai_payload(payload: AiMatchPayload) -> MatchResult {
    let score = payload.score.round().clamp(0.0, 100.0) as u8;
    let matched_factors = clean_factors(payload.matched_factors);
    let missing_factors = clean_factors(payload.missing_factors);

    let explanation = payload
        .explanation
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| summarize(score, &matched_factors, &missing_factors));

    MatchResult {
        score,
        matched_factors,
        missing_factors,
        explanation,
        method: ScoringMethod::Ai,
    }
}

fn clean_factors(factors: Vec<String>) -> BTreeSet<String> {
    factors
        .into_iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect()
}

fn summarize(score: u8, matched: &BTreeSet<String>, missing: &BTreeSet<String>) -> String {
    format!(
        "Match score {score}/100 with {} matched and {} missing factors.",
        matched.len(),
        missing.len()
    )
}

/// Deterministic keyword-overlap score:
/// `|candidate ∩ required| / |required| × 100`, rounded.
pub fn basic_match(input: &ScoringInput<'_>) -> MatchResult {
    let candidate = tokenize(input.candidate_text);
    let required = tokenize(input.requirements_text);

    let matched_factors: BTreeSet<String> = required.intersection(&candidate).cloned().collect();
    let missing_factors: BTreeSet<String> = required.difference(&candidate).cloned().collect();

    let score = if required.is_empty() {
        0
    } else {
        ((matched_factors.len() as f64 / required.len() as f64) * 100.0)
            .round()
            .clamp(0.0, 100.0) as u8
    };

    let explanation = format!(
        "AI analysis unavailable; score estimated from keyword overlap \
        ({} of {} requirement keywords found in the CV).",
        matched_factors.len(),
        required.len()
    );

    MatchResult {
        score,
        matched_factors,
        missing_factors,
        explanation,
        method: ScoringMethod::Basic,
    }
}

/// JSON schema the generation service must satisfy for match scoring.
pub fn match_schema() -> Value {
    serde_json::json!({
        "title": "match_result",
        "type": "object",
        "required": ["score", "matched_factors", "missing_factors", "explanation"],
        "properties": {
            "score": {"type": "integer", "minimum": 0, "maximum": 100},
            "matched_factors": {"type": "array", "items": {"type": "string"}},
            "missing_factors": {"type": "array", "items": {"type": "string"}},
            "explanation": {"type": "string"}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CV: &str = "Senior backend engineer. Rust, PostgreSQL, Kubernetes, gRPC.";
    const JD: &str = "We need Rust and Kafka on Kubernetes.";

    fn input() -> ScoringInput<'static> {
        ScoringInput {
            candidate_text: CV,
            requirements_text: JD,
        }
    }

    #[test]
    fn test_well_formed_payload_is_ai() {
        let raw = json!({
            "score": 82,
            "matched_factors": ["Rust", "Kubernetes"],
            "missing_factors": ["Kafka"],
            "explanation": "Solid systems background."
        });
        let result = normalize(Some(&raw), &input());
        assert_eq!(result.method, ScoringMethod::Ai);
        assert_eq!(result.score, 82);
        assert!(result.matched_factors.contains("Rust"));
        assert_eq!(result.explanation, "Solid systems background.");
    }

    #[test]
    fn test_out_of_range_scores_are_clamped() {
        let high = normalize(Some(&json!({"score": 140})), &input());
        let low = normalize(Some(&json!({"score": -3.5})), &input());
        assert_eq!(high.score, 100);
        assert_eq!(low.score, 0);
        assert_eq!(high.method, ScoringMethod::Ai);
    }

    #[test]
    fn test_numeric_string_and_camel_case_accepted() {
        let raw = json!({"score": "67%", "matchedFactors": ["Rust"], "missingFactors": []});
        let result = normalize(Some(&raw), &input());
        assert_eq!(result.method, ScoringMethod::Ai);
        assert_eq!(result.score, 67);
        assert!(result.matched_factors.contains("Rust"));
        assert!(result.explanation.contains("67/100"));
    }

    #[test]
    fn test_fenced_json_string_is_parsed() {
        let raw = Value::String("```json\n{\"score\": 55}\n```".to_string());
        let result = normalize(Some(&raw), &input());
        assert_eq!(result.method, ScoringMethod::Ai);
        assert_eq!(result.score, 55);
    }

    #[test]
    fn test_none_falls_back_to_basic() {
        let result = normalize(None, &input());
        assert_eq!(result.method, ScoringMethod::Basic);
        assert!(result.score <= 100);
        assert!(result.explanation.contains("AI analysis unavailable"));
    }

    #[test]
    fn test_malformed_inputs_fall_back_to_basic() {
        let malformed = [
            json!(null),
            json!([1, 2, 3]),
            json!({"score": "high"}),
            json!({"matched_factors": ["Rust"]}),
            json!({"score": 50, "matched_factors": [1, 2]}),
            json!("not json at all"),
            json!(true),
        ];
        for raw in &malformed {
            let result = normalize(Some(raw), &input());
            assert_eq!(result.method, ScoringMethod::Basic, "input: {raw}");
            assert!(result.score <= 100);
        }
    }

    #[test]
    fn test_basic_score_is_overlap_ratio() {
        // Required tokens: need, rust, kafka, kubernetes → 2 of 4 matched.
        let result = basic_match(&input());
        assert_eq!(result.score, 50);
        assert_eq!(
            result.matched_factors,
            BTreeSet::from(["kubernetes".to_string(), "rust".to_string()])
        );
        assert!(result.missing_factors.contains("kafka"));
    }

    #[test]
    fn test_basic_with_no_requirements_scores_zero() {
        let result = basic_match(&ScoringInput {
            candidate_text: CV,
            requirements_text: "",
        });
        assert_eq!(result.score, 0);
        assert!(result.matched_factors.is_empty());
    }

    #[test]
    fn test_basic_full_overlap_scores_100() {
        let result = basic_match(&ScoringInput {
            candidate_text: "rust kafka",
            requirements_text: "Rust, Kafka",
        });
        assert_eq!(result.score, 100);
    }

    #[test]
    fn test_method_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ScoringMethod::Basic).unwrap(), json!("basic"));
    }
}
