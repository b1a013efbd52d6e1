//! Regulation chunks.
//!
//! Regulation text arrives pre-chunked from the ingestion collaborator;
//! this crate only consumes it. Within a `rule_id` the `chunk_index`
//! sequence is contiguous and monotonic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::chunk::sha256_hex;

/// A fragment of regulation text with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulationChunk {
    /// Opaque chunk identifier.
    pub chunk_id: Uuid,

    /// Rule this fragment belongs to (e.g. `RBI-KYC-2016`).
    pub rule_id: String,

    /// Section reference within the rule document.
    pub rule_section: Option<String>,

    /// The regulation text fragment.
    pub chunk_text: String,

    /// Position within the rule, 0-based and contiguous.
    pub chunk_index: usize,

    /// SHA-256 hex of `chunk_text`.
    pub chunk_hash: String,

    /// Dense embedding of the fragment.
    pub embedding: Option<Vec<f32>>,

    /// Supplier-provided metadata.
    pub metadata: Value,
}

impl RegulationChunk {
    /// Creates a regulation chunk, computing its hash.
    #[must_use]
    pub fn new(rule_id: impl Into<String>, chunk_index: usize, chunk_text: String) -> Self {
        let chunk_hash = sha256_hex(&chunk_text);
        Self {
            chunk_id: Uuid::new_v4(),
            rule_id: rule_id.into(),
            rule_section: None,
            chunk_text,
            chunk_index,
            chunk_hash,
            embedding: None,
            metadata: Value::Null,
        }
    }

    /// Attaches a section reference.
    #[must_use]
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.rule_section = Some(section.into());
        self
    }

    /// Attaches an embedding.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}
