//! Background jobs.
//!
//! Jobs are owned by the queue. Delivery is at-least-once: workers must
//! make their side effects idempotent on natural keys (`chunk_hash`,
//! `case_id`, `finding_id`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::now_ts;

/// Kind of background work a job carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Repository indexing (full or delta).
    Index,
    /// Staged audit of a case.
    Audit,
}

impl JobType {
    /// Stable string form used in persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Audit => "audit",
        }
    }

    /// Parses the persisted string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "index" => Some(Self::Index),
            "audit" => Some(Self::Audit),
            _ => None,
        }
    }
}

/// Lifecycle status of a job. Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be leased (includes retry waits).
    Queued,
    /// Leased by a worker; the lease may expire and be reclaimed.
    Running,
    /// Finished successfully; `result` is retained 24 h.
    Completed,
    /// Exhausted retries; `error` is retained 7 d.
    Failed,
}

impl JobStatus {
    /// Stable string form used in persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses the persisted string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether this status admits no further mutation.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A queued unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Opaque job identifier.
    pub job_id: Uuid,

    /// Kind of work.
    pub job_type: JobType,

    /// Typed payload, serialized as JSON.
    pub payload: Value,

    /// Lifecycle status.
    pub status: JobStatus,

    /// Retries consumed so far; never exceeds `max_retries`.
    pub retries: u32,

    /// Retry budget.
    pub max_retries: u32,

    /// Lease duration granted on each lease, in seconds.
    pub timeout_secs: u64,

    /// Earliest Unix timestamp the job may be leased (retry backoff).
    pub available_at: i64,

    /// Lease expiry; a passed expiry makes the job reclaimable.
    pub lease_expires_at: Option<i64>,

    /// Identifier of the worker holding the lease.
    pub worker_id: Option<String>,

    /// Result blob on completion.
    pub result: Option<Value>,

    /// Error message on failure.
    pub error: Option<String>,

    /// Unix timestamp of enqueue.
    pub created_at: i64,

    /// Unix timestamp of first lease.
    pub started_at: Option<i64>,

    /// Unix timestamp of terminal transition.
    pub completed_at: Option<i64>,
}

impl Job {
    /// Creates a queued job.
    #[must_use]
    pub fn new(job_type: JobType, payload: Value, timeout_secs: u64, max_retries: u32) -> Self {
        let now = now_ts();
        Self {
            job_id: Uuid::new_v4(),
            job_type,
            payload,
            status: JobStatus::Queued,
            retries: 0,
            max_retries,
            timeout_secs,
            available_at: now,
            lease_expires_at: None,
            worker_id: None,
            result: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Payload of an index job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexJobPayload {
    /// Repository to index.
    pub repo_id: Uuid,

    /// Specific commit to check out; default branch head when absent.
    pub commit_sha: Option<String>,

    /// Changed paths for delta mode; a full pass when absent.
    pub changed_files: Option<Vec<String>>,
}

/// Payload of an audit job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditJobPayload {
    /// Case to run.
    pub case_id: Uuid,
}
