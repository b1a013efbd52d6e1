//! Repository indexing pipeline.
//!
//! Turns a repository checkout into the durable code map: clone, walk,
//! chunk, enrich, persist, prune. Webhook-driven delta passes re-walk
//! only the changed paths and classify every chunk as added, modified,
//! unchanged, or removed.

pub mod delta;
pub mod token;
pub mod walk;
pub mod worker;

pub use delta::{classify_file_chunks, DeltaSummary};
pub use token::TokenCache;
pub use walk::walk_source_files;
pub use worker::{IndexOutcome, IndexerWorker, ENRICH_BATCH};
