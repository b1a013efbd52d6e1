//! Staged multi-agent audit.
//!
//! A case walks the five-agent workflow under a durable state machine:
//!
//! ```text
//! pending ─start─▶ running ─(all steps ok)──▶ waiting_approval ─approve──▶ completed
//!                                          └─decline──▶ completed (no tickets)
//! running ─(fatal)──▶ failed
//! running ─(pause)──▶ paused ─resume──▶ running
//! ```
//!
//! Planner turns regulation text into engineering tasks, Navigator maps
//! tasks to code by vector search, Investigator adjudicates each hit,
//! Judge aggregates the case verdict and persists findings, and
//! Remediator proposes tickets behind a human-approval gate.

pub mod agents;
pub mod logstream;
pub mod orchestrator;
pub mod remediate;

pub use agents::{
    aggregate_verdict, parse_plan, CaseVerdict, ControlStatus, InvestigationItem,
    InvestigatorResult, NavigationEntry, NavigatorHit, NavigatorResult, PlanEntry, PlannerResult,
};
pub use logstream::{CaseLogger, LOG_TTL_SECS};
pub use orchestrator::{Orchestrator, MAX_INVESTIGATIONS};
pub use remediate::{build_tasks, RemediationTask, Remediator, RemediatorResult, TaskPriority};
