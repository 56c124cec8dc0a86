//! Evaluation stage: LLM-as-judge with a strict structured-output
//! contract.
//!
//! The judge prompt requests a machine-parseable JSON verdict: five
//! dimension scores plus severity-tagged findings. Anything the strict
//! parser rejects surfaces as `StageError::ScoringParse`; the pipeline
//! records a zeroed result rather than inventing plausible scores.

use serde::Deserialize;
use uuid::Uuid;

use crate::gateway::Attribution;
use crate::orchestrator::types::{AnswerRecord, EvaluationRecord, MaskedCase, Question};
use crate::provider::StageRequest;
use crate::scoring::{Finding, ScoringEngine, Severity, DIMENSIONS};

use super::{ProviderHandle, StageError};

/// Parsed judge verdict, before scoring arithmetic.
#[derive(Debug, Clone)]
pub struct JudgeVerdict {
    /// Dimension values aligned with [`DIMENSIONS`].
    pub values: [f64; 5],
    pub findings: Vec<Finding>,
    pub rationale: String,
}

/// Judge one answer against the masked judge decision.
pub async fn evaluate_answer(
    handle: &ProviderHandle,
    engine: &ScoringEngine,
    answer: &AnswerRecord,
    masked: &MaskedCase,
    question: &Question,
    job_id: Option<Uuid>,
) -> Result<EvaluationRecord, StageError> {
    let mut attribution = Attribution::new("stages::evaluate");
    attribution.job_id = job_id;

    let dimension_max = engine.config().dimension_max;
    let request = StageRequest::Evaluate {
        question: &question.text,
        case_text: &masked.body,
        judge_decision: &masked.decision,
        answer: &answer.answer,
        dimension_max,
    };

    let output = match handle.invoke(&request, attribution).await {
        Ok(output) => output,
        // An empty judge reply is unparseable output, not a missing answer.
        Err(StageError::EmptyAnswer) => {
            return Err(StageError::ScoringParse(
                "judge returned empty content".to_string(),
            ))
        }
        Err(e) => return Err(e),
    };

    let verdict = parse_judge_verdict(&output.reply.answer, dimension_max)?;
    let breakdown = engine.score(&verdict.values, &verdict.findings);

    Ok(EvaluationRecord {
        breakdown,
        findings: verdict.findings,
        rationale: verdict.rationale,
        parse_failed: false,
    })
}

/// The zeroed record for a question whose judge output failed to parse.
pub fn parse_failure_record(engine: &ScoringEngine) -> EvaluationRecord {
    EvaluationRecord {
        breakdown: engine.score(&[0.0; 5], &[]),
        findings: Vec::new(),
        rationale: String::new(),
        parse_failed: true,
    }
}

// =============================================================================
// JSON parsing
// =============================================================================

#[derive(Debug, Deserialize)]
struct JudgeJson {
    dimension_scores: std::collections::HashMap<String, f64>,
    #[serde(default)]
    findings: Vec<FindingJson>,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Deserialize)]
struct FindingJson {
    severity: String,
    #[serde(default)]
    description: String,
}

/// Parse the judge's free text into a verdict. Strict: all five
/// dimensions must be present and in range, severities must be one of
/// the three tiers.
pub fn parse_judge_verdict(raw: &str, dimension_max: u8) -> Result<JudgeVerdict, StageError> {
    let json_str = extract_json(raw);
    let parsed: JudgeJson = serde_json::from_str(json_str)
        .map_err(|e| StageError::ScoringParse(e.to_string()))?;

    let dmax = f64::from(dimension_max);
    let mut values = [0.0; 5];
    for (i, dimension) in DIMENSIONS.iter().enumerate() {
        let value = *parsed.dimension_scores.get(*dimension).ok_or_else(|| {
            StageError::ScoringParse(format!("missing dimension '{dimension}'"))
        })?;
        if !value.is_finite() || !(0.0..=dmax).contains(&value) {
            return Err(StageError::ScoringParse(format!(
                "dimension '{dimension}' out of range [0,{dmax}]: {value}"
            )));
        }
        values[i] = value;
    }

    let mut findings = Vec::with_capacity(parsed.findings.len());
    for f in parsed.findings {
        let severity = match f.severity.to_ascii_lowercase().as_str() {
            "minor" => Severity::Minor,
            "moderate" => Severity::Moderate,
            "major" => Severity::Major,
            other => {
                return Err(StageError::ScoringParse(format!(
                    "unknown finding severity: {other}"
                )))
            }
        };
        findings.push(Finding {
            severity,
            description: f.description,
        });
    }

    Ok(JudgeVerdict {
        values,
        findings,
        rationale: parsed.rationale,
    })
}

/// Extract a JSON object from a response (handles models that add
/// surrounding text).
fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(start) = trimmed.find('{') {
        let remainder = &trimmed[start..];
        let mut depth = 0;
        let mut in_string = false;
        let mut escaped = false;
        for (i, c) in remainder.char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            match c {
                '\\' if in_string => escaped = true,
                '"' => in_string = !in_string,
                '{' if !in_string => depth += 1,
                '}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        return &remainder[..=i];
                    }
                }
                _ => {}
            }
        }
    }

    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::ScoringConfig;

    const VALID: &str = r#"{"dimension_scores": {"statutory_basis": 4, "subsumption_alignment": 3, "value_balancing": 4, "fact_coverage": 2, "remedy_consistency": 3}, "findings": [{"severity": "moderate", "description": "missed a limitation defense"}], "rationale": "solid but incomplete"}"#;

    #[test]
    fn parses_valid_verdict() {
        let verdict = parse_judge_verdict(VALID, 4).unwrap();
        assert_eq!(verdict.values, [4.0, 3.0, 4.0, 2.0, 3.0]);
        assert_eq!(verdict.findings.len(), 1);
        assert_eq!(verdict.findings[0].severity, Severity::Moderate);
        assert_eq!(verdict.rationale, "solid but incomplete");
    }

    #[test]
    fn parses_verdict_with_surrounding_text() {
        let raw = format!("Here is my verdict:\n{VALID}\nHope that helps.");
        let verdict = parse_judge_verdict(&raw, 4).unwrap();
        assert_eq!(verdict.values[0], 4.0);
    }

    #[test]
    fn rejects_missing_dimension() {
        let raw = r#"{"dimension_scores": {"statutory_basis": 4}, "findings": []}"#;
        let err = parse_judge_verdict(raw, 4).unwrap_err();
        assert!(matches!(err, StageError::ScoringParse(_)));
        assert_eq!(err.label(), "scoring_parse");
    }

    #[test]
    fn rejects_out_of_range_score() {
        let raw = VALID.replace(r#""statutory_basis": 4"#, r#""statutory_basis": 7"#);
        let err = parse_judge_verdict(&raw, 4).unwrap_err();
        assert!(matches!(err, StageError::ScoringParse(_)));
    }

    #[test]
    fn rejects_unknown_severity() {
        let raw = VALID.replace(r#""severity": "moderate""#, r#""severity": "catastrophic""#);
        let err = parse_judge_verdict(&raw, 4).unwrap_err();
        assert!(matches!(err, StageError::ScoringParse(_)));
    }

    #[test]
    fn rejects_non_json_prose() {
        let err = parse_judge_verdict("The answer deserves a 16 out of 20.", 4).unwrap_err();
        assert!(matches!(err, StageError::ScoringParse(_)));
    }

    #[test]
    fn findings_default_to_empty() {
        let raw = r#"{"dimension_scores": {"statutory_basis": 1, "subsumption_alignment": 1, "value_balancing": 1, "fact_coverage": 1, "remedy_consistency": 1}}"#;
        let verdict = parse_judge_verdict(raw, 4).unwrap();
        assert!(verdict.findings.is_empty());
        assert!(verdict.rationale.is_empty());
    }

    #[test]
    fn extract_json_handles_braces_in_strings() {
        let raw = r#"note { "a": "has } brace", "b": 1 } trailing"#;
        let json = extract_json(raw);
        assert_eq!(json, r#"{ "a": "has } brace", "b": 1 }"#);
    }

    #[test]
    fn parse_failure_record_is_zeroed_and_flagged() {
        let engine = ScoringEngine::new(ScoringConfig::default());
        let record = parse_failure_record(&engine);
        assert!(record.parse_failed);
        assert_eq!(record.breakdown.raw_total, 0.0);
        assert_eq!(record.breakdown.penalized_total, 0.0);
        assert_eq!(record.breakdown.grade, "poor");
    }
}
