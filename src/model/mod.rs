//! Domain types for the compliance-audit engine.
//!
//! Entities follow the ownership rules of the data model: a repository
//! exclusively owns its code chunks, a case exclusively owns its findings
//! and log entries, and jobs are owned by the queue and reference cases
//! and repositories only through their payloads.

pub mod case;
pub mod chunk;
pub mod finding;
pub mod job;
pub mod log;
pub mod regulation;
pub mod repo;

pub use case::{AuditStep, Case, CaseStatus, UserDecision};
pub use chunk::{CodeChunk, DeltaType};
pub use finding::{Finding, FindingStatus, Severity, Verdict};
pub use job::{AuditJobPayload, IndexJobPayload, Job, JobStatus, JobType};
pub use log::LogEntry;
pub use regulation::RegulationChunk;
pub use repo::Repo;

/// Returns the current Unix timestamp in seconds.
#[allow(clippy::cast_possible_wrap)]
#[must_use]
pub fn now_ts() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
