//! Agent step payloads and pure step logic.
//!
//! The orchestrator persists one result blob per step; the types here
//! are those blobs. Pure logic that needs no provider access (plan
//! parsing with its fallback, the judge's aggregation rule) also lives
//! here so it can be tested without an LLM.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::Verdict;

/// Validation plan for one regulation chunk (Planner output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Rule the chunk belongs to.
    pub rule_id: String,
    /// Section reference, when known.
    pub rule_section: Option<String>,
    /// The regulation text the plan was derived from.
    pub rule_text: String,
    /// What the rule requires.
    pub intent: String,
    /// Compliance dimensions identified.
    pub compliance_dimensions: Vec<String>,
    /// Concrete engineering tasks to search for.
    pub tasks: Vec<String>,
}

/// Planner result blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannerResult {
    /// One plan per regulation chunk, in input order.
    pub plans: Vec<PlanEntry>,
}

/// Wire shape the planner model is asked to produce.
#[derive(Debug, Deserialize)]
struct WirePlan {
    intent: Option<String>,
    compliance_dimensions: Option<Vec<String>>,
    tasks: Option<Vec<String>>,
}

/// Parses the planner response, falling back to a single generic task
/// on malformed output.
#[must_use]
pub fn parse_plan(
    rule_id: &str,
    rule_section: Option<&str>,
    rule_text: &str,
    response: &str,
) -> PlanEntry {
    let parsed = response
        .find('{')
        .zip(response.rfind('}'))
        .filter(|(start, end)| start < end)
        .and_then(|(start, end)| serde_json::from_str::<WirePlan>(&response[start..=end]).ok());

    let fallback_tasks = || vec![format!("Check implementation of {rule_id}")];
    match parsed {
        Some(wire) => {
            let tasks = wire.tasks.filter(|t| !t.is_empty());
            PlanEntry {
                rule_id: rule_id.to_string(),
                rule_section: rule_section.map(str::to_string),
                rule_text: rule_text.to_string(),
                intent: wire
                    .intent
                    .unwrap_or_else(|| "Validate compliance".to_string()),
                compliance_dimensions: wire
                    .compliance_dimensions
                    .unwrap_or_else(|| vec!["general".to_string()]),
                tasks: tasks.unwrap_or_else(fallback_tasks),
            }
        }
        None => PlanEntry {
            rule_id: rule_id.to_string(),
            rule_section: rule_section.map(str::to_string),
            rule_text: rule_text.to_string(),
            intent: "Validate compliance".to_string(),
            compliance_dimensions: vec!["general".to_string()],
            tasks: fallback_tasks(),
        },
    }
}

/// One code location matched to a task (Navigator output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigatorHit {
    /// Matched chunk.
    pub chunk_id: Uuid,
    /// File the chunk lives in.
    pub file_path: String,
    /// First line of the chunk.
    pub start_line: usize,
    /// Last line of the chunk.
    pub end_line: usize,
    /// Similarity of the match.
    pub similarity: f32,
    /// First 200 characters of the chunk text.
    pub snippet: String,
}

/// Hits for one task of one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationEntry {
    /// Rule the task came from.
    pub rule_id: String,
    /// Regulation text driving the adjudication downstream.
    pub rule_text: String,
    /// The task searched for.
    pub task: String,
    /// Gated hits, best first.
    pub hits: Vec<NavigatorHit>,
}

/// Navigator result blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigatorResult {
    /// Entries in task order.
    pub entries: Vec<NavigationEntry>,
    /// Tasks with no hit above the similarity threshold.
    pub unmatched_tasks: Vec<String>,
}

impl NavigatorResult {
    /// Total hits across all entries.
    #[must_use]
    pub fn hit_count(&self) -> usize {
        self.entries.iter().map(|e| e.hits.len()).sum()
    }
}

/// Per-hit control status (Investigator output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    /// The control is in place.
    Implemented,
    /// The control is partially in place.
    Partial,
    /// The control is absent.
    Missing,
}

impl ControlStatus {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Implemented => "implemented",
            Self::Partial => "partial",
            Self::Missing => "missing",
        }
    }

    /// Maps an adjudication verdict onto a control status.
    ///
    /// `unclear` lands on `partial`: the control could not be confirmed,
    /// which must not count as implemented.
    #[must_use]
    pub const fn from_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Compliant => Self::Implemented,
            Verdict::NonCompliant => Self::Missing,
            Verdict::Partial | Verdict::Unclear => Self::Partial,
        }
    }
}

/// One adjudicated hit (Investigator output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationItem {
    /// Rule evaluated.
    pub rule_id: String,
    /// Task that matched the code.
    pub task: String,
    /// File of the evidence.
    pub file_path: String,
    /// First evidence line, copied from the chunk.
    pub start_line: usize,
    /// Last evidence line, copied from the chunk.
    pub end_line: usize,
    /// Control status derived from the verdict.
    pub status: ControlStatus,
    /// Adjudicator verdict.
    pub verdict: Verdict,
    /// Severity level name.
    pub severity: crate::model::Severity,
    /// Severity score.
    pub severity_score: f32,
    /// Adjudicator confidence.
    pub confidence: f32,
    /// Short explanation of the observation.
    pub finding: String,
    /// Cited evidence, when provided.
    pub evidence: Option<String>,
    /// Suggested remediation, when provided.
    pub remediation: Option<String>,
}

/// Investigator result blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvestigatorResult {
    /// Adjudicated items in hit order.
    pub items: Vec<InvestigationItem>,
}

/// Case-level verdict (Judge output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseVerdict {
    /// Aggregated verdict.
    pub verdict: Verdict,
    /// Mean confidence across items (0.5 with no items).
    pub confidence: f32,
    /// One-line reason.
    pub reason: String,
    /// Number of adjudicated items behind the verdict.
    pub evidence_count: usize,
    /// Executive summary, when the LLM produced one.
    pub summary: Option<String>,
}

/// Aggregates investigator items into the case verdict.
///
/// Every item weighs equally: any `missing` control makes the case
/// `non_compliant`; all `implemented` makes it `compliant`; anything
/// else is `partial`. Confidence is the unweighted mean.
#[must_use]
pub fn aggregate_verdict(items: &[InvestigationItem]) -> CaseVerdict {
    let evidence_count = items.len();
    let confidence = if items.is_empty() {
        0.5
    } else {
        items.iter().map(|i| i.confidence).sum::<f32>() / evidence_count as f32
    };

    let any_missing = items.iter().any(|i| i.status == ControlStatus::Missing);
    let all_implemented = items.iter().all(|i| i.status == ControlStatus::Implemented);

    let (verdict, reason) = if any_missing {
        let missing: Vec<&str> = items
            .iter()
            .filter(|i| i.status == ControlStatus::Missing)
            .map(|i| i.finding.as_str())
            .take(3)
            .collect();
        (
            Verdict::NonCompliant,
            format!("Missing controls: {}", missing.join("; ")),
        )
    } else if all_implemented {
        (
            Verdict::Compliant,
            "All compliance controls properly implemented".to_string(),
        )
    } else {
        (Verdict::Partial, "Implementation incomplete".to_string())
    };

    CaseVerdict {
        verdict,
        confidence: (confidence * 100.0).round() / 100.0,
        reason,
        evidence_count,
        summary: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;

    fn item(status: ControlStatus, confidence: f32) -> InvestigationItem {
        InvestigationItem {
            rule_id: "R1".into(),
            task: "check retention".into(),
            file_path: "src/log.py".into(),
            start_line: 1,
            end_line: 20,
            status,
            verdict: match status {
                ControlStatus::Implemented => Verdict::Compliant,
                ControlStatus::Partial => Verdict::Partial,
                ControlStatus::Missing => Verdict::NonCompliant,
            },
            severity: Severity::Medium,
            severity_score: 4.0,
            confidence,
            finding: format!("control is {}", status.as_str()),
            evidence: Some("evidence".into()),
            remediation: None,
        }
    }

    #[test]
    fn test_parse_plan_well_formed() {
        let response = r#"{"intent": "retain logs", "compliance_dimensions": ["retention"],
            "tasks": ["Find log retention configuration", "Verify archive policy"]}"#;
        let plan = parse_plan("RBI-1", Some("4.2"), "Logs must be retained 5 years", response);
        assert_eq!(plan.intent, "retain logs");
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.rule_text, "Logs must be retained 5 years");
        assert_eq!(plan.rule_section.as_deref(), Some("4.2"));
    }

    #[test]
    fn test_parse_plan_malformed_falls_back() {
        for response in ["not json at all", "", "{\"tasks\": []}"] {
            let plan = parse_plan("RBI-1", None, "text", response);
            assert_eq!(plan.intent, "Validate compliance");
            assert_eq!(plan.compliance_dimensions, vec!["general".to_string()]);
            assert_eq!(plan.tasks, vec!["Check implementation of RBI-1".to_string()]);
        }
    }

    #[test]
    fn test_control_status_from_verdict() {
        assert_eq!(
            ControlStatus::from_verdict(Verdict::Compliant),
            ControlStatus::Implemented
        );
        assert_eq!(
            ControlStatus::from_verdict(Verdict::NonCompliant),
            ControlStatus::Missing
        );
        assert_eq!(
            ControlStatus::from_verdict(Verdict::Partial),
            ControlStatus::Partial
        );
        assert_eq!(
            ControlStatus::from_verdict(Verdict::Unclear),
            ControlStatus::Partial
        );
    }

    #[test]
    fn test_aggregate_all_implemented() {
        let items = vec![
            item(ControlStatus::Implemented, 0.9),
            item(ControlStatus::Implemented, 0.7),
        ];
        let verdict = aggregate_verdict(&items);
        assert_eq!(verdict.verdict, Verdict::Compliant);
        assert!((verdict.confidence - 0.8).abs() < 1e-6);
        assert_eq!(verdict.evidence_count, 2);
    }

    #[test]
    fn test_aggregate_any_missing_wins() {
        let items = vec![
            item(ControlStatus::Implemented, 1.0),
            item(ControlStatus::Missing, 0.6),
            item(ControlStatus::Partial, 0.8),
        ];
        let verdict = aggregate_verdict(&items);
        assert_eq!(verdict.verdict, Verdict::NonCompliant);
        assert!(verdict.reason.starts_with("Missing controls:"));
    }

    #[test]
    fn test_aggregate_mixed_is_partial() {
        let items = vec![
            item(ControlStatus::Implemented, 0.9),
            item(ControlStatus::Partial, 0.5),
        ];
        assert_eq!(aggregate_verdict(&items).verdict, Verdict::Partial);
    }

    #[test]
    fn test_aggregate_empty() {
        let verdict = aggregate_verdict(&[]);
        assert_eq!(verdict.verdict, Verdict::Compliant);
        assert!((verdict.confidence - 0.5).abs() < f32::EPSILON);
        assert_eq!(verdict.evidence_count, 0);
    }

    #[test]
    fn test_aggregate_reason_caps_missing_list() {
        let items: Vec<InvestigationItem> =
            (0..5).map(|_| item(ControlStatus::Missing, 0.5)).collect();
        let verdict = aggregate_verdict(&items);
        assert_eq!(verdict.reason.matches("control is missing").count(), 3);
    }

    #[test]
    fn test_navigator_hit_count() {
        let hit = NavigatorHit {
            chunk_id: Uuid::new_v4(),
            file_path: "f.py".into(),
            start_line: 1,
            end_line: 2,
            similarity: 0.8,
            snippet: "code".into(),
        };
        let result = NavigatorResult {
            entries: vec![
                NavigationEntry {
                    rule_id: "R1".into(),
                    rule_text: "t".into(),
                    task: "a".into(),
                    hits: vec![hit.clone(), hit.clone()],
                },
                NavigationEntry {
                    rule_id: "R1".into(),
                    rule_text: "t".into(),
                    task: "b".into(),
                    hits: vec![hit],
                },
            ],
            unmatched_tasks: vec![],
        };
        assert_eq!(result.hit_count(), 3);
    }
}
