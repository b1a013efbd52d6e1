//! Audit cases.
//!
//! A case is a single audit instance: one repository evaluated against a
//! set of regulations through the five-agent workflow. The case record
//! is the durable state of that workflow; after each step the
//! orchestrator commits `steps_completed`, `current_step`, and the
//! step's result blob in one transaction so a crash resumes from the
//! last completed step.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::now_ts;

/// The fixed agent workflow, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStep {
    /// Converts regulation text into engineering validation tasks.
    Planner,
    /// Maps tasks to code locations by vector search.
    Navigator,
    /// Adjudicates each matched location.
    Investigator,
    /// Aggregates hit verdicts into the case verdict and persists findings.
    Judge,
    /// Composes remediation tasks and pauses for approval.
    Remediator,
}

impl AuditStep {
    /// All steps in execution order.
    pub const ALL: [Self; 5] = [
        Self::Planner,
        Self::Navigator,
        Self::Investigator,
        Self::Judge,
        Self::Remediator,
    ];

    /// Stable string form used in persistence and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Navigator => "navigator",
            Self::Investigator => "investigator",
            Self::Judge => "judge",
            Self::Remediator => "remediator",
        }
    }

    /// Parses the persisted string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|step| step.as_str() == s)
    }

    /// The step after this one, if any.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(idx + 1).copied()
    }
}

/// Lifecycle status of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// Created, not yet picked up by a worker.
    Pending,
    /// Steps are executing.
    Running,
    /// Remediation tasks generated; paused for the human decision.
    WaitingApproval,
    /// Terminal success (with or without tickets).
    Completed,
    /// Terminal failure; `error_message` is set.
    Failed,
    /// Explicitly paused; resumable back to running.
    Paused,
}

impl CaseStatus {
    /// Stable string form used in persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingApproval => "waiting_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }

    /// Parses the persisted string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "waiting_approval" => Some(Self::WaitingApproval),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "paused" => Some(Self::Paused),
            _ => None,
        }
    }

    /// Whether this status admits no further mutation (log retention
    /// aside).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The human decision recorded at the HITL gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserDecision {
    /// Create tickets for the (possibly edited) remediation tasks.
    Approved,
    /// Complete the case with no tickets.
    Declined,
}

impl UserDecision {
    /// Stable string form used in persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Declined => "declined",
        }
    }

    /// Parses the persisted string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(Self::Approved),
            "declined" => Some(Self::Declined),
            _ => None,
        }
    }
}

/// Durable state of one audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    /// Opaque case identifier.
    pub case_id: Uuid,

    /// Repository under audit.
    pub repo_id: Uuid,

    /// Rules evaluated by this case.
    pub regulation_ids: Vec<String>,

    /// Lifecycle status.
    pub status: CaseStatus,

    /// Step currently executing; never a member of `steps_completed`.
    pub current_step: Option<AuditStep>,

    /// Steps finished, in completion order.
    pub steps_completed: Vec<AuditStep>,

    /// Steps not yet started.
    pub steps_pending: Vec<AuditStep>,

    /// Planner result blob.
    pub planner_result: Option<Value>,

    /// Navigator result blob.
    pub navigator_result: Option<Value>,

    /// Investigator result blob.
    pub investigator_result: Option<Value>,

    /// Judge result blob.
    pub judge_result: Option<Value>,

    /// Remediator result blob (the proposed tasks).
    pub remediator_result: Option<Value>,

    /// Whether the case is gated on human approval.
    pub requires_approval: bool,

    /// The decision recorded at resume.
    pub user_decision: Option<UserDecision>,

    /// Ticket IDs created on approval, in task order.
    pub jira_ticket_ids: Vec<String>,

    /// Failure detail when `status` is `Failed`.
    pub error_message: Option<String>,

    /// Cooperative cancel flag, observed at step boundaries.
    pub cancel_requested: bool,

    /// Unix timestamp of creation.
    pub started_at: i64,

    /// Unix timestamp of the last mutation.
    pub updated_at: i64,

    /// Unix timestamp of the terminal transition.
    pub completed_at: Option<i64>,
}

impl Case {
    /// Creates a pending case with the full workflow ahead of it.
    #[must_use]
    pub fn new(repo_id: Uuid, regulation_ids: Vec<String>) -> Self {
        let now = now_ts();
        Self {
            case_id: Uuid::new_v4(),
            repo_id,
            regulation_ids,
            status: CaseStatus::Pending,
            current_step: None,
            steps_completed: Vec::new(),
            steps_pending: AuditStep::ALL.to_vec(),
            planner_result: None,
            navigator_result: None,
            investigator_result: None,
            judge_result: None,
            remediator_result: None,
            requires_approval: false,
            user_decision: None,
            jira_ticket_ids: Vec::new(),
            error_message: None,
            cancel_requested: false,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Returns the stored result blob for a step.
    #[must_use]
    pub const fn step_result(&self, step: AuditStep) -> Option<&Value> {
        match step {
            AuditStep::Planner => self.planner_result.as_ref(),
            AuditStep::Navigator => self.navigator_result.as_ref(),
            AuditStep::Investigator => self.investigator_result.as_ref(),
            AuditStep::Judge => self.judge_result.as_ref(),
            AuditStep::Remediator => self.remediator_result.as_ref(),
        }
    }

    /// Stores the result blob for a step.
    pub fn set_step_result(&mut self, step: AuditStep, result: Value) {
        let slot = match step {
            AuditStep::Planner => &mut self.planner_result,
            AuditStep::Navigator => &mut self.navigator_result,
            AuditStep::Investigator => &mut self.investigator_result,
            AuditStep::Judge => &mut self.judge_result,
            AuditStep::Remediator => &mut self.remediator_result,
        };
        *slot = Some(result);
    }

    /// Checks the workflow partition invariant: completed, current, and
    /// pending are pairwise disjoint and cover exactly the fixed set.
    #[must_use]
    pub fn step_partition_valid(&self) -> bool {
        let mut seen = Vec::with_capacity(AuditStep::ALL.len());
        for step in &self.steps_completed {
            if seen.contains(step) {
                return false;
            }
            seen.push(*step);
        }
        if let Some(step) = self.current_step {
            if seen.contains(&step) {
                return false;
            }
            seen.push(step);
        }
        for step in &self.steps_pending {
            if seen.contains(step) {
                return false;
            }
            seen.push(*step);
        }
        seen.len() == AuditStep::ALL.len()
    }

    /// Marks a step complete and advances the bookkeeping.
    ///
    /// Clears `current_step`; the orchestrator claims the next step when
    /// it starts executing it, keeping the three step sets disjoint.
    pub fn mark_step_complete(&mut self, step: AuditStep, result: Value) {
        if !self.steps_completed.contains(&step) {
            self.steps_completed.push(step);
        }
        self.steps_pending.retain(|s| *s != step);
        self.current_step = None;
        self.set_step_result(step, result);
        self.updated_at = now_ts();
    }

    /// The step the orchestrator should execute next: the claimed
    /// current step after a crash, otherwise the first step not yet
    /// completed.
    #[must_use]
    pub fn next_step(&self) -> Option<AuditStep> {
        self.current_step.or_else(|| {
            AuditStep::ALL
                .into_iter()
                .find(|s| !self.steps_completed.contains(s))
        })
    }

    /// Claims a step as current, removing it from the pending set.
    pub fn claim_step(&mut self, step: AuditStep) {
        self.steps_pending.retain(|s| *s != step);
        self.current_step = Some(step);
        self.updated_at = now_ts();
    }
}
