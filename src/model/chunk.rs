//! Code-map chunks.
//!
//! A chunk is a contiguous source-code span (ideally one function or
//! class) with its hashes, embedding, and enrichment metadata. Chunks
//! are the rows of the durable code map and are keyed by
//! `(repo_id, chunk_hash)` on upsert.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Delta classification of a chunk relative to the prior index pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaType {
    /// New chunk with no prior counterpart.
    #[default]
    Added,
    /// Chunk whose text changed; `previous_hash` records the old hash.
    Modified,
    /// Chunk identical to the prior pass; keeps its old embedding.
    Unchanged,
    /// Chunk no longer present; pruned after a successful full pass.
    Removed,
}

impl DeltaType {
    /// Stable string form used in persistence.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Unchanged => "unchanged",
            Self::Removed => "removed",
        }
    }

    /// Parses the persisted string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "added" => Some(Self::Added),
            "modified" => Some(Self::Modified),
            "unchanged" => Some(Self::Unchanged),
            "removed" => Some(Self::Removed),
            _ => None,
        }
    }
}

/// A code-map chunk.
///
/// # Examples
///
/// ```
/// use regscan_rs::model::CodeChunk;
/// use uuid::Uuid;
///
/// let chunk = CodeChunk::new(
///     Uuid::new_v4(),
///     "src/auth.py",
///     "python",
///     1,
///     12,
///     "def login():\n    pass".to_string(),
///     "f00d".to_string(),
/// );
/// assert!(chunk.start_line <= chunk.end_line);
/// assert_eq!(chunk.chunk_hash.len(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChunk {
    /// Opaque chunk identifier, stable across upserts of the same hash.
    pub chunk_id: Uuid,

    /// Owning repository.
    pub repo_id: Uuid,

    /// Path relative to the repository root.
    pub file_path: String,

    /// Detected language identifier.
    pub language: String,

    /// First line of the span (1-based, inclusive).
    pub start_line: usize,

    /// Last line of the span (1-based, inclusive).
    pub end_line: usize,

    /// The chunk text itself.
    pub chunk_text: String,

    /// Syntactic node kind when span extraction identified one
    /// (function, class, declaration).
    pub ast_node_type: Option<String>,

    /// SHA-256 hex of the full file content.
    pub file_hash: String,

    /// SHA-256 hex of `chunk_text`; the upsert natural key.
    pub chunk_hash: String,

    /// Dense embedding; `None` while pending or after provider failure.
    pub embedding: Option<Vec<f32>>,

    /// Natural-language summary; `None` while pending.
    pub nl_summary: Option<String>,

    /// Names of functions called within the span.
    pub call_links: Vec<String>,

    /// Constant assignments extracted from the span.
    pub variables: Map<String, Value>,

    /// Threshold-named constants and config-file keys.
    pub config_keys: Map<String, Value>,

    /// Tags matched from the compliance lexicon.
    pub semantic_tags: Vec<String>,

    /// Prior `chunk_hash` when `delta_type` is `Modified`.
    pub previous_hash: Option<String>,

    /// Delta classification relative to the prior pass.
    pub delta_type: DeltaType,
}

impl CodeChunk {
    /// Creates a chunk draft, computing `chunk_hash` from the text.
    #[must_use]
    pub fn new(
        repo_id: Uuid,
        file_path: impl Into<String>,
        language: impl Into<String>,
        start_line: usize,
        end_line: usize,
        chunk_text: String,
        file_hash: String,
    ) -> Self {
        let chunk_hash = sha256_hex(&chunk_text);
        Self {
            chunk_id: Uuid::new_v4(),
            repo_id,
            file_path: file_path.into(),
            language: language.into(),
            start_line,
            end_line,
            chunk_text,
            ast_node_type: None,
            file_hash,
            chunk_hash,
            embedding: None,
            nl_summary: None,
            call_links: Vec::new(),
            variables: Map::new(),
            config_keys: Map::new(),
            semantic_tags: Vec::new(),
            previous_hash: None,
            delta_type: DeltaType::Added,
        }
    }

    /// Estimates the token count as `ceil(len / 4)`.
    #[must_use]
    pub fn estimate_tokens(&self) -> usize {
        self.chunk_text.len().div_ceil(4)
    }

    /// Returns a prefix of the chunk text, cut at a char boundary.
    #[must_use]
    pub fn snippet(&self, max_len: usize) -> &str {
        if self.chunk_text.len() <= max_len {
            &self.chunk_text
        } else {
            let mut end = max_len;
            while !self.chunk_text.is_char_boundary(end) && end > 0 {
                end -= 1;
            }
            &self.chunk_text[..end]
        }
    }
}

/// Computes the SHA-256 hex digest of a string.
#[must_use]
pub fn sha256_hex(text: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk(text: &str) -> CodeChunk {
        CodeChunk::new(
            Uuid::new_v4(),
            "src/main.py",
            "python",
            1,
            5,
            text.to_string(),
            sha256_hex(text),
        )
    }

    #[test]
    fn test_chunk_hash_is_sha256_of_text() {
        let chunk = sample_chunk("def f():\n    return 1");
        assert_eq!(chunk.chunk_hash, sha256_hex(&chunk.chunk_text));
        assert_eq!(chunk.chunk_hash.len(), 64);
    }

    #[test]
    fn test_sha256_known_vector() {
        // SHA-256 of the empty string
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_identical_text_identical_hash() {
        let a = sample_chunk("same text");
        let b = sample_chunk("same text");
        assert_eq!(a.chunk_hash, b.chunk_hash);
        assert_ne!(a.chunk_id, b.chunk_id);
    }

    #[test]
    fn test_estimate_tokens() {
        let chunk = sample_chunk("abcd");
        assert_eq!(chunk.estimate_tokens(), 1);
        let chunk = sample_chunk("abcde");
        assert_eq!(chunk.estimate_tokens(), 2);
    }

    #[test]
    fn test_snippet_respects_char_boundary() {
        let chunk = sample_chunk("héllo wörld");
        let snippet = chunk.snippet(2);
        assert!(snippet.len() <= 2);
        assert!(chunk.chunk_text.starts_with(snippet));
        assert_eq!(chunk.snippet(1000), chunk.chunk_text);
    }

    #[test]
    fn test_delta_type_round_trip() {
        for delta in [
            DeltaType::Added,
            DeltaType::Modified,
            DeltaType::Unchanged,
            DeltaType::Removed,
        ] {
            assert_eq!(DeltaType::parse(delta.as_str()), Some(delta));
        }
        assert_eq!(DeltaType::parse("bogus"), None);
    }

    #[test]
    fn test_default_delta_is_added() {
        let chunk = sample_chunk("text");
        assert_eq!(chunk.delta_type, DeltaType::Added);
        assert!(chunk.previous_hash.is_none());
        assert!(chunk.embedding.is_none());
    }
}
