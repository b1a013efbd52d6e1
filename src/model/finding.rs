//! Compliance findings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::now_ts;
use crate::error::{Error, Result};

/// Compliance classification of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The code satisfies the rule.
    Compliant,
    /// The code violates the rule.
    NonCompliant,
    /// The rule is partially implemented.
    Partial,
    /// The adjudicator could not decide (including coerced malformed
    /// output).
    Unclear,
}

impl Verdict {
    /// Stable string form used in persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compliant => "compliant",
            Self::NonCompliant => "non_compliant",
            Self::Partial => "partial",
            Self::Unclear => "unclear",
        }
    }

    /// Parses the persisted string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "compliant" => Some(Self::Compliant),
            "non_compliant" => Some(Self::NonCompliant),
            "partial" => Some(Self::Partial),
            "unclear" => Some(Self::Unclear),
            _ => None,
        }
    }

    /// Whether this verdict demands evidence on the finding.
    #[must_use]
    pub const fn requires_evidence(self) -> bool {
        matches!(self, Self::NonCompliant | Self::Partial)
    }
}

/// Severity level with a total order (`Low < Medium < High < Critical`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Score band `[0, 3)`.
    Low,
    /// Score band `[3, 6)`.
    Medium,
    /// Score band `[6, 8)`.
    High,
    /// Score band `[8, 10]`.
    Critical,
}

impl Severity {
    /// Stable string form used in persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parses the persisted string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Inclusive-start score band for this level.
    ///
    /// The end is exclusive except for `Critical`, whose band closes at
    /// 10.0 inclusive.
    #[must_use]
    pub const fn band(self) -> (f32, f32) {
        match self {
            Self::Low => (0.0, 3.0),
            Self::Medium => (3.0, 6.0),
            Self::High => (6.0, 8.0),
            Self::Critical => (8.0, 10.0),
        }
    }

    /// Whether a score falls inside this level's band.
    #[must_use]
    pub fn contains_score(self, score: f32) -> bool {
        let (lo, hi) = self.band();
        if matches!(self, Self::Critical) {
            (lo..=hi).contains(&score)
        } else {
            (lo..hi).contains(&score)
        }
    }

    /// Clamps a score into this level's band.
    #[must_use]
    pub fn clamp_score(self, score: f32) -> f32 {
        let (lo, hi) = self.band();
        let hi = if matches!(self, Self::Critical) {
            hi
        } else {
            // Largest f32 strictly below the exclusive bound at 0.1
            // resolution; scores are reported to one decimal place.
            hi - 0.1
        };
        score.clamp(lo, hi)
    }

    /// The level whose band contains the score.
    #[must_use]
    pub fn from_score(score: f32) -> Self {
        match score {
            s if s >= 8.0 => Self::Critical,
            s if s >= 6.0 => Self::High,
            s if s >= 3.0 => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// Review status of a finding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    /// Awaiting reviewer decision.
    #[default]
    Pending,
    /// Reviewer confirmed the finding.
    Approved,
    /// Reviewer rejected the finding.
    Rejected,
    /// Reviewer chose to ignore the finding.
    Ignored,
}

impl FindingStatus {
    /// Stable string form used in persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Ignored => "ignored",
        }
    }

    /// Parses the persisted string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "ignored" => Some(Self::Ignored),
            _ => None,
        }
    }
}

/// One adjudicated compliance observation owned by a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Opaque finding identifier.
    pub finding_id: Uuid,

    /// Owning case.
    pub case_id: Uuid,

    /// Rule the code was evaluated against.
    pub rule_id: String,

    /// File the evidence lives in.
    pub file_path: String,

    /// First evidence line, copied verbatim from the code chunk.
    pub start_line: usize,

    /// Last evidence line, copied verbatim from the code chunk.
    pub end_line: usize,

    /// Compliance classification.
    pub verdict: Verdict,

    /// Severity level.
    pub severity: Severity,

    /// Severity score, consistent with the level's band.
    pub severity_score: f32,

    /// Adjudicator confidence in `[0, 1]`.
    pub confidence: f32,

    /// Evidence supporting the verdict.
    pub evidence: String,

    /// Adjudicator reasoning.
    pub reasoning: String,

    /// Suggested remediation, when non-compliant.
    pub remediation: Option<String>,

    /// Review status.
    pub status: FindingStatus,

    /// Reviewer note recorded with the decision.
    pub reviewer_note: Option<String>,

    /// Unix timestamp of the review decision.
    pub reviewed_at: Option<i64>,

    /// Ticket created for this finding; the `(case_id, finding_id)`
    /// natural key maps to at most one ticket.
    pub ticket_id: Option<String>,

    /// Unix timestamp of creation.
    pub created_at: i64,
}

impl Finding {
    /// Creates a pending finding.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        case_id: Uuid,
        rule_id: impl Into<String>,
        file_path: impl Into<String>,
        start_line: usize,
        end_line: usize,
        verdict: Verdict,
        severity: Severity,
        severity_score: f32,
        confidence: f32,
    ) -> Self {
        Self {
            finding_id: Uuid::new_v4(),
            case_id,
            rule_id: rule_id.into(),
            file_path: file_path.into(),
            start_line,
            end_line,
            verdict,
            severity,
            severity_score,
            confidence,
            evidence: String::new(),
            reasoning: String::new(),
            remediation: None,
            status: FindingStatus::Pending,
            reviewer_note: None,
            reviewed_at: None,
            ticket_id: None,
            created_at: now_ts(),
        }
    }

    /// Validates the finding invariants: evidence present where the
    /// verdict requires it, score inside the severity band, confidence
    /// in range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first violated
    /// invariant.
    pub fn validate(&self) -> Result<()> {
        if self.verdict.requires_evidence() && self.evidence.trim().is_empty() {
            return Err(Error::invalid_input(format!(
                "{} finding must carry evidence",
                self.verdict.as_str()
            )));
        }
        if !self.severity.contains_score(self.severity_score) {
            return Err(Error::invalid_input(format!(
                "severity_score {} outside {} band",
                self.severity_score,
                self.severity.as_str()
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::invalid_input(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        if self.start_line > self.end_line {
            return Err(Error::invalid_input("start_line exceeds end_line"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn sample_finding(verdict: Verdict) -> Finding {
        let mut finding = Finding::new(
            Uuid::new_v4(),
            "RBI-1",
            "src/auth.py",
            10,
            42,
            verdict,
            Severity::High,
            6.5,
            0.9,
        );
        finding.evidence = "password stored in plaintext".into();
        finding
    }

    #[test]
    fn test_verdict_round_trip() {
        for verdict in [
            Verdict::Compliant,
            Verdict::NonCompliant,
            Verdict::Partial,
            Verdict::Unclear,
        ] {
            assert_eq!(Verdict::parse(verdict.as_str()), Some(verdict));
        }
    }

    #[test]
    fn test_severity_total_order() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test_case(Severity::Low, 0.0, true; "low band start")]
    #[test_case(Severity::Low, 2.9, true; "low band inside")]
    #[test_case(Severity::Low, 3.0, false; "low band end exclusive")]
    #[test_case(Severity::Medium, 5.0, true; "medium inside")]
    #[test_case(Severity::High, 6.0, true; "high start")]
    #[test_case(Severity::High, 8.0, false; "high end exclusive")]
    #[test_case(Severity::Critical, 8.0, true; "critical start")]
    #[test_case(Severity::Critical, 10.0, true; "critical end inclusive")]
    fn test_severity_bands(severity: Severity, score: f32, expected: bool) {
        assert_eq!(severity.contains_score(score), expected);
    }

    #[test]
    fn test_clamp_score_enters_band() {
        for severity in [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            for raw in [-5.0_f32, 0.0, 2.5, 5.0, 7.0, 9.0, 12.0] {
                let clamped = severity.clamp_score(raw);
                assert!(
                    severity.contains_score(clamped),
                    "{severity:?} clamp({raw}) = {clamped} left the band"
                );
            }
        }
    }

    #[test]
    fn test_from_score_matches_bands() {
        assert_eq!(Severity::from_score(0.0), Severity::Low);
        assert_eq!(Severity::from_score(3.0), Severity::Medium);
        assert_eq!(Severity::from_score(6.0), Severity::High);
        assert_eq!(Severity::from_score(8.0), Severity::Critical);
        assert_eq!(Severity::from_score(10.0), Severity::Critical);
    }

    #[test]
    fn test_validate_ok() {
        assert!(sample_finding(Verdict::NonCompliant).validate().is_ok());
    }

    #[test]
    fn test_validate_requires_evidence() {
        let mut finding = sample_finding(Verdict::NonCompliant);
        finding.evidence = "  ".into();
        assert!(finding.validate().is_err());

        // Compliant findings don't need evidence
        let mut finding = sample_finding(Verdict::Compliant);
        finding.evidence = String::new();
        assert!(finding.validate().is_ok());
    }

    #[test]
    fn test_validate_score_band() {
        let mut finding = sample_finding(Verdict::Partial);
        finding.severity_score = 9.5; // out of High band
        assert!(finding.validate().is_err());
    }

    #[test]
    fn test_validate_confidence_range() {
        let mut finding = sample_finding(Verdict::Partial);
        finding.confidence = 1.5;
        assert!(finding.validate().is_err());
    }

    #[test]
    fn test_validate_line_order() {
        let mut finding = sample_finding(Verdict::Partial);
        finding.start_line = 50;
        finding.end_line = 10;
        assert!(finding.validate().is_err());
    }
}
