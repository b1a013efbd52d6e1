//! Error types for compliance-audit operations.
//!
//! This module provides the error hierarchy using `thiserror` for all
//! subsystems: storage, chunking, providers, the job queue, and audit
//! orchestration. Every error classifies into an [`ErrorClass`] which
//! drives retry policy at the call site and in the queue.

use thiserror::Error;

/// Result type alias for audit-engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Retry/propagation classification of an error.
///
/// - `Transient` errors are retried with backoff at the call site and,
///   if they escape a worker step, through queue retry.
/// - `InputInvalid` errors are surfaced to the caller and never retried.
/// - `Semantic` errors (unparseable provider output) are coerced by the
///   consuming component and never retried.
/// - `Fatal` errors fail the job or case and alert the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, 5xx, network errors, deadlocks, rate-limit exhaustion.
    Transient,
    /// Malformed payloads, unknown entities, validation failures.
    InputInvalid,
    /// Provider returned unparseable or schema-invalid output.
    Semantic,
    /// Corrupt state, missing schema, unrecoverable I/O.
    Fatal,
}

/// Top-level error for all audit-engine operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage-related errors (database operations).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Chunking-related errors (source-code processing).
    #[error("chunking error: {0}")]
    Chunking(#[from] ChunkingError),

    /// Provider errors (embedding, LLM, ticketing, repo source).
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Job queue errors.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Audit orchestration errors.
    #[error("audit error: {0}")]
    Audit(#[from] AuditError),

    /// Invalid input from a caller.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of what was invalid.
        message: String,
    },

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },
}

impl Error {
    /// Classifies this error for retry policy.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Storage(e) => e.class(),
            Self::Chunking(_) => ErrorClass::InputInvalid,
            Self::Provider(e) => e.class(),
            Self::Queue(e) => e.class(),
            Self::Audit(e) => e.class(),
            Self::InvalidInput { .. } => ErrorClass::InputInvalid,
            Self::Config { .. } => ErrorClass::Fatal,
        }
    }

    /// Convenience constructor for caller-input validation failures.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Storage-specific errors for database operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection or query error.
    #[error("database error: {0}")]
    Database(String),

    /// Storage not initialized (init command not run).
    #[error("store not initialized. Run: regscan-rs init")]
    NotInitialized,

    /// Repository not found by ID.
    #[error("repository not found: {repo_id}")]
    RepoNotFound {
        /// Repository ID that was not found.
        repo_id: String,
    },

    /// Audit case not found by ID.
    #[error("case not found: {case_id}")]
    CaseNotFound {
        /// Case ID that was not found.
        case_id: String,
    },

    /// Finding not found by ID.
    #[error("finding not found: {finding_id}")]
    FindingNotFound {
        /// Finding ID that was not found.
        finding_id: String,
    },

    /// A terminal case or job was mutated.
    #[error("state is terminal and immutable: {entity}")]
    Terminal {
        /// Entity that refused the mutation.
        entity: String,
    },

    /// Stored data failed to deserialize.
    #[error("corrupt persisted state: {0}")]
    Corrupt(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Embedding blob has the wrong dimension for the deployment.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured deployment dimension.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },
}

impl StorageError {
    const fn class(&self) -> ErrorClass {
        match self {
            Self::Database(_) => ErrorClass::Transient,
            Self::RepoNotFound { .. }
            | Self::CaseNotFound { .. }
            | Self::FindingNotFound { .. }
            | Self::Terminal { .. }
            | Self::DimensionMismatch { .. } => ErrorClass::InputInvalid,
            Self::NotInitialized | Self::Corrupt(_) | Self::Serialization(_) => ErrorClass::Fatal,
        }
    }
}

/// Chunking-specific errors for source-code processing.
///
/// A chunker failure on one file is logged and the file is skipped; these
/// never abort an index pass.
#[derive(Error, Debug)]
pub enum ChunkingError {
    /// File content is not valid UTF-8.
    #[error("invalid UTF-8 at byte offset {offset}")]
    InvalidUtf8 {
        /// Byte offset where invalid UTF-8 was found.
        offset: usize,
    },

    /// Invalid chunker configuration.
    #[error("invalid chunking configuration: {reason}")]
    InvalidConfig {
        /// Reason the configuration is invalid.
        reason: String,
    },

    /// Regex compilation error.
    #[error("regex error: {0}")]
    Regex(String),
}

/// Provider errors for embedding, LLM, ticketing, and repo-source calls.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provider call timed out.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// Operation that timed out (embed, complete, clone, ...).
        operation: &'static str,
        /// Configured timeout in seconds.
        seconds: u64,
    },

    /// Provider returned a transport or server error.
    #[error("{operation} failed: {reason}")]
    Upstream {
        /// Operation that failed.
        operation: &'static str,
        /// Upstream failure detail.
        reason: String,
    },

    /// Provider output did not match the expected schema.
    ///
    /// The raw payload is preserved for audit; consumers coerce this to
    /// an `unclear`/`unknown` result rather than retrying.
    #[error("malformed {operation} output")]
    Malformed {
        /// Operation whose output was malformed.
        operation: &'static str,
        /// The raw payload, kept verbatim.
        raw: String,
    },

    /// Repository clone or checkout failed.
    #[error("git {action} failed: {detail}")]
    Git {
        /// git subcommand that failed.
        action: &'static str,
        /// stderr or error detail.
        detail: String,
    },

    /// Credential for the repository could not be obtained.
    #[error("credential resolution failed for installation {installation_id}: {reason}")]
    Credential {
        /// Installation the token was requested for.
        installation_id: i64,
        /// Failure detail.
        reason: String,
    },
}

impl ProviderError {
    const fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. } | Self::Upstream { .. } | Self::Git { .. } => {
                ErrorClass::Transient
            }
            Self::Malformed { .. } => ErrorClass::Semantic,
            Self::Credential { .. } => ErrorClass::Fatal,
        }
    }
}

/// Job queue errors.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Job not found by ID.
    #[error("job not found: {job_id}")]
    JobNotFound {
        /// Job ID that was not found.
        job_id: String,
    },

    /// A terminal job was completed or failed again.
    #[error("job {job_id} is already terminal ({status})")]
    AlreadyTerminal {
        /// Job ID.
        job_id: String,
        /// Terminal status the job holds.
        status: String,
    },

    /// The worker completing a job no longer holds its lease.
    #[error("lease lost for job {job_id}")]
    LeaseLost {
        /// Job ID whose lease expired or was reassigned.
        job_id: String,
    },

    /// Job payload failed to deserialize.
    #[error("invalid job payload: {0}")]
    InvalidPayload(String),
}

impl QueueError {
    const fn class(&self) -> ErrorClass {
        match self {
            Self::JobNotFound { .. } | Self::AlreadyTerminal { .. } | Self::InvalidPayload(_) => {
                ErrorClass::InputInvalid
            }
            Self::LeaseLost { .. } => ErrorClass::Transient,
        }
    }
}

/// Audit orchestration errors.
#[derive(Error, Debug)]
pub enum AuditError {
    /// The case cannot be resumed from its current status.
    #[error("case {case_id} cannot be resumed (status: {status})")]
    NotResumable {
        /// Case ID.
        case_id: String,
        /// Status that refused the resume.
        status: String,
    },

    /// The case was cancelled by an external request.
    #[error("cancelled")]
    Cancelled,

    /// A workflow step failed fatally.
    #[error("step {step} failed: {reason}")]
    StepFailed {
        /// Step name.
        step: &'static str,
        /// Failure detail.
        reason: String,
    },

    /// No regulation chunks exist for a requested rule.
    #[error("no regulation chunks for rule: {rule_id}")]
    MissingRegulation {
        /// Rule with no stored chunks.
        rule_id: String,
    },
}

impl AuditError {
    const fn class(&self) -> ErrorClass {
        match self {
            Self::NotResumable { .. } | Self::MissingRegulation { .. } => ErrorClass::InputInvalid,
            Self::Cancelled | Self::StepFailed { .. } => ErrorClass::Fatal,
        }
    }
}

// Implement From traits for standard library and dependency errors

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Provider(ProviderError::Upstream {
            operation: "io",
            reason: err.to_string(),
        })
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(StorageError::Database(err.to_string()))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(StorageError::Serialization(err.to_string()))
    }
}

impl From<regex::Error> for ChunkingError {
    fn from(err: regex::Error) -> Self {
        Self::Regex(err.to_string())
    }
}

impl From<std::str::Utf8Error> for ChunkingError {
    fn from(err: std::str::Utf8Error) -> Self {
        Self::InvalidUtf8 {
            offset: err.valid_up_to(),
        }
    }
}
