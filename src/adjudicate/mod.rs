//! Per-chunk compliance adjudication.
//!
//! Sends one rule/chunk pair to the LLM and parses the structured
//! verdict. Parsing is an explicit result sum: well-formed output
//! becomes an [`Adjudication`], anything else coerces to an `unclear`
//! verdict with the raw payload preserved for audit. Line numbers are
//! never taken from the model; callers copy them verbatim from the
//! code chunk.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Timeouts;
use crate::error::Result;
use crate::model::{CodeChunk, Severity, Verdict};
use crate::prompts::{build_compliance_prompt, PromptSet};
use crate::provider::{with_retry, with_timeout, ChatMessage, LlmProvider, RateLimiter};

/// Structured verdict for one rule/chunk pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjudication {
    /// Compliance classification.
    pub verdict: Verdict,
    /// Severity level.
    pub severity: Severity,
    /// Severity score, always inside the level's band.
    pub severity_score: f32,
    /// Model confidence in `[0, 1]`.
    pub confidence: f32,
    /// Explanation of the verdict.
    pub explanation: String,
    /// Cited evidence, when provided.
    pub evidence: Option<String>,
    /// Suggested remediation, when provided.
    pub remediation: Option<String>,
    /// The raw payload, preserved when the output was coerced.
    pub raw: Option<String>,
}

/// Wire shape the model is asked to produce.
#[derive(Debug, Deserialize)]
struct WireVerdict {
    verdict: String,
    severity: String,
    severity_score: f64,
    confidence: Option<f64>,
    explanation: Option<String>,
    evidence: Option<String>,
    remediation: Option<String>,
}

/// Parses a model response into a verdict.
///
/// # Errors
///
/// Returns the raw response when it cannot be interpreted; callers
/// coerce with [`coerce_malformed`].
pub fn parse_verdict(response: &str) -> std::result::Result<Adjudication, String> {
    // Models wrap JSON in prose or fences; take the outermost object.
    let start = response.find('{');
    let end = response.rfind('}');
    let (Some(start), Some(end)) = (start, end) else {
        return Err(response.to_string());
    };
    if end < start {
        return Err(response.to_string());
    }

    let wire: WireVerdict = match serde_json::from_str(&response[start..=end]) {
        Ok(wire) => wire,
        Err(_) => return Err(response.to_string()),
    };

    // "unknown" appears in the wild as a synonym for unclear
    let verdict = match wire.verdict.as_str() {
        "unknown" => Verdict::Unclear,
        other => match Verdict::parse(other) {
            Some(v) => v,
            None => return Err(response.to_string()),
        },
    };
    let Some(severity) = Severity::parse(&wire.severity) else {
        return Err(response.to_string());
    };

    #[allow(clippy::cast_possible_truncation)]
    let score = severity.clamp_score(wire.severity_score as f32);
    #[allow(clippy::cast_possible_truncation)]
    let confidence = wire.confidence.unwrap_or(0.5).clamp(0.0, 1.0) as f32;

    Ok(Adjudication {
        verdict,
        severity,
        severity_score: score,
        confidence,
        explanation: wire.explanation.unwrap_or_default(),
        evidence: wire.evidence,
        remediation: wire.remediation,
        raw: None,
    })
}

/// Coerces a malformed response into the fixed fallback verdict.
///
/// The raw payload rides along for audit.
#[must_use]
pub fn coerce_malformed(raw: String) -> Adjudication {
    Adjudication {
        verdict: Verdict::Unclear,
        severity: Severity::Medium,
        severity_score: 5.0,
        confidence: 0.0,
        explanation: raw.clone(),
        evidence: None,
        remediation: None,
        raw: Some(raw),
    }
}

/// LLM-backed adjudicator.
pub struct Adjudicator {
    llm: Arc<dyn LlmProvider>,
    limiter: Arc<RateLimiter>,
    prompts: PromptSet,
    timeouts: Timeouts,
}

impl Adjudicator {
    /// Creates an adjudicator.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmProvider>, limiter: Arc<RateLimiter>, prompts: PromptSet) -> Self {
        Self {
            llm,
            limiter,
            prompts,
            timeouts: Timeouts::default(),
        }
    }

    /// Adjudicates one rule/chunk pair.
    ///
    /// Malformed model output is coerced, never retried; only transport
    /// failures after retries surface as errors.
    ///
    /// # Errors
    ///
    /// Returns a transient provider error when the completion call
    /// itself fails.
    pub async fn adjudicate(&self, rule_text: &str, chunk: &CodeChunk) -> Result<Adjudication> {
        self.limiter.acquire().await;
        let messages = [
            ChatMessage::system(self.prompts.compliance.clone()),
            ChatMessage::user(build_compliance_prompt(
                rule_text,
                &chunk.file_path,
                chunk.start_line,
                chunk.end_line,
                &chunk.language,
                &chunk.chunk_text,
            )),
        ];

        let response = with_retry("adjudicate", || {
            with_timeout(
                "complete",
                self.timeouts.provider,
                self.llm.complete(&messages, 0.1, 1500),
            )
        })
        .await?;

        Ok(parse_verdict(&response).unwrap_or_else(|raw| {
            tracing::warn!(
                file = %chunk.file_path,
                "malformed adjudication output coerced to unclear"
            );
            coerce_malformed(raw)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_well_formed() {
        let response = r#"{
            "verdict": "non_compliant",
            "severity": "high",
            "severity_score": 7.5,
            "confidence": 0.9,
            "explanation": "No MFA check on admin route",
            "evidence": "admin_login() skips second factor",
            "remediation": "Add TOTP verification"
        }"#;
        let verdict = parse_verdict(response).unwrap();
        assert_eq!(verdict.verdict, Verdict::NonCompliant);
        assert_eq!(verdict.severity, Severity::High);
        assert!((verdict.severity_score - 7.5).abs() < f32::EPSILON);
        assert!((verdict.confidence - 0.9).abs() < 1e-6);
        assert!(verdict.raw.is_none());
    }

    #[test]
    fn test_parse_fenced_json() {
        let response = "Here is my analysis:\n```json\n{\"verdict\": \"compliant\", \
             \"severity\": \"low\", \"severity_score\": 1.0}\n```";
        let verdict = parse_verdict(response).unwrap();
        assert_eq!(verdict.verdict, Verdict::Compliant);
        // Missing confidence defaults mid-scale
        assert!((verdict.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_parse_unknown_verdict_aliases_unclear() {
        let response = r#"{"verdict": "unknown", "severity": "medium", "severity_score": 5.0}"#;
        assert_eq!(parse_verdict(response).unwrap().verdict, Verdict::Unclear);
    }

    #[test]
    fn test_parse_out_of_band_score_clamped() {
        let response = r#"{"verdict": "partial", "severity": "high", "severity_score": 9.9}"#;
        let verdict = parse_verdict(response).unwrap();
        assert!(verdict.severity.contains_score(verdict.severity_score));

        let response = r#"{"verdict": "partial", "severity": "critical", "severity_score": 2.0}"#;
        let verdict = parse_verdict(response).unwrap();
        assert!(verdict.severity.contains_score(verdict.severity_score));
        assert!((verdict.severity_score - 8.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_verdict("total nonsense").is_err());
        assert!(parse_verdict("").is_err());
        assert!(parse_verdict("{\"verdict\": \"meh\"}").is_err());
        assert!(parse_verdict("{not json}").is_err());
    }

    #[test]
    fn test_coerce_preserves_raw() {
        let coerced = coerce_malformed("I think it looks fine".to_string());
        assert_eq!(coerced.verdict, Verdict::Unclear);
        assert_eq!(coerced.severity, Severity::Medium);
        assert!((coerced.severity_score - 5.0).abs() < f32::EPSILON);
        assert_eq!(coerced.explanation, "I think it looks fine");
        assert_eq!(coerced.raw.as_deref(), Some("I think it looks fine"));
    }

    #[test]
    fn test_coerced_empty_response() {
        let coerced = coerce_malformed(String::new());
        assert_eq!(coerced.verdict, Verdict::Unclear);
        assert!((coerced.severity_score - 5.0).abs() < f32::EPSILON);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parsed_scores_always_in_band(
                severity in prop::sample::select(vec!["low", "medium", "high", "critical"]),
                score in -5.0f64..15.0,
            ) {
                let response = format!(
                    r#"{{"verdict": "partial", "severity": "{severity}", "severity_score": {score}}}"#
                );
                let verdict = parse_verdict(&response).unwrap();
                prop_assert!(verdict.severity.contains_score(verdict.severity_score));
            }

            #[test]
            fn arbitrary_text_never_panics(response in ".{0,200}") {
                let _ = parse_verdict(&response);
            }
        }
    }
}
