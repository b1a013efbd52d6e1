//! # regscan-rs
//!
//! Regulation-compliance code auditor. Builds a durable semantic index
//! (the "code map") of source repositories and runs staged multi-agent
//! audits that match regulation fragments to code, adjudicate each
//! match, and gate remediation tickets behind human approval.
//!
//! ## Subsystems
//!
//! - **Chunking**: AST-hint splitting of source files into embedded,
//!   enriched semantic units
//! - **Indexing**: clone → walk → chunk → enrich → persist, with delta
//!   semantics for webhook-driven re-index
//! - **Retrieval**: rule-to-code nearest-neighbor search with
//!   similarity gating
//! - **Audit**: a durable five-agent state machine (Planner, Navigator,
//!   Investigator, Judge, Remediator) with a human-in-the-loop pause
//! - **Queue**: at-least-once background jobs with leases and retry

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod adjudicate;
pub mod audit;
pub mod chunking;
pub mod config;
pub mod error;
pub mod index;
pub mod model;
pub mod prompts;
pub mod provider;
pub mod queue;
pub mod retrieve;
pub mod service;
pub mod store;

// Re-export commonly used types at crate root
pub use error::{Error, ErrorClass, Result};

// Re-export core domain types
pub use model::{
    Case, CaseStatus, CodeChunk, DeltaType, Finding, FindingStatus, Job, JobStatus, JobType,
    LogEntry, RegulationChunk, Repo, Severity, UserDecision, Verdict,
};

// Re-export configuration
pub use config::Config;

// Re-export the service facade
pub use service::Service;

// Re-export storage types
pub use store::{SharedStore, SqliteStore, DEFAULT_DB_PATH};

// Re-export chunking types
pub use chunking::{Chunker, Language};

// Re-export queue types
pub use queue::{JobHandler, JobQueue, WorkerPool};

// Re-export provider interfaces
pub use provider::{
    ChatMessage, EmbeddingProvider, LlmProvider, Providers, RepoSource, TicketingSystem,
    TokenSource,
};
