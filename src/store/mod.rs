//! Durable persistence for the audit engine.
//!
//! One `SQLite` database holds the code map, regulation chunks, the job
//! queue, audit cases, findings, and case logs. Background workers
//! share the store behind an async mutex; every public operation is a
//! single transaction, so case-step commits and chunk batches are
//! all-or-nothing.

pub mod schema;
pub mod sqlite;
pub mod vector;

pub use sqlite::{SimilarChunk, SqliteStore, StoreStats, DEFAULT_DB_PATH};
pub use vector::{cosine_distance, cosine_similarity, decode_embedding, encode_embedding};

use std::sync::Arc;

use tokio::sync::Mutex;

/// The store handle threaded through async components.
///
/// Mutations serialize behind the mutex, which also provides the
/// per-case write ordering the orchestrator relies on.
pub type SharedStore = Arc<Mutex<SqliteStore>>;

/// Wraps a store for shared async use.
#[must_use]
pub fn shared(store: SqliteStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}
