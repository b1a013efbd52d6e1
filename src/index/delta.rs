//! Delta classification of re-chunked files.
//!
//! Compares a file's freshly chunked drafts against the prior stored
//! set for the same `(repo_id, file_path)`. Hash-identical chunks are
//! `unchanged` and retain their prior embedding and summary; leftovers
//! pair up positionally as `modified` (recording `previous_hash`), and
//! the rest are `added` or `removed`.

use std::collections::HashSet;

use crate::model::{CodeChunk, DeltaType};

/// Result of classifying one file's chunks.
#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeltaSummary {
    /// Chunks new to the file.
    pub added: usize,
    /// Chunks whose text changed.
    pub modified: usize,
    /// Chunks identical to the prior pass.
    pub unchanged: usize,
    /// Prior chunks with no fresh counterpart.
    pub removed: usize,
}

impl DeltaSummary {
    /// Merges another summary into this one.
    pub fn merge(&mut self, other: &Self) {
        self.added += other.added;
        self.modified += other.modified;
        self.unchanged += other.unchanged;
        self.removed += other.removed;
    }
}

/// Classifies fresh chunks against the prior set for the same file.
///
/// Mutates `fresh` in place (delta type, retained enrichment,
/// `previous_hash`) and returns the prior chunks now absent, already
/// marked `removed`.
pub fn classify_file_chunks(prior: &[CodeChunk], fresh: &mut [CodeChunk]) -> (DeltaSummary, Vec<CodeChunk>) {
    let mut summary = DeltaSummary::default();
    let mut matched_prior: HashSet<usize> = HashSet::new();

    // First pass: exact hash matches are unchanged and keep their
    // enrichment, so re-indexing identical content never re-embeds.
    for chunk in fresh.iter_mut() {
        if let Some((idx, old)) = prior
            .iter()
            .enumerate()
            .find(|(i, old)| !matched_prior.contains(i) && old.chunk_hash == chunk.chunk_hash)
        {
            matched_prior.insert(idx);
            chunk.delta_type = DeltaType::Unchanged;
            chunk.embedding = old.embedding.clone();
            chunk.nl_summary = old.nl_summary.clone();
            chunk.previous_hash = None;
            summary.unchanged += 1;
        }
    }

    // Second pass: pair remaining fresh chunks with remaining prior
    // chunks in span order; pairs are modifications, leftovers are adds.
    let unmatched_prior: Vec<&CodeChunk> = prior
        .iter()
        .enumerate()
        .filter(|(i, _)| !matched_prior.contains(i))
        .map(|(_, c)| c)
        .collect();

    let mut prior_iter = unmatched_prior.iter();
    for chunk in fresh
        .iter_mut()
        .filter(|c| c.delta_type != DeltaType::Unchanged)
    {
        if let Some(old) = prior_iter.next() {
            chunk.delta_type = DeltaType::Modified;
            chunk.previous_hash = Some(old.chunk_hash.clone());
            summary.modified += 1;
        } else {
            chunk.delta_type = DeltaType::Added;
            chunk.previous_hash = None;
            summary.added += 1;
        }
    }

    // Prior chunks beyond the paired prefix no longer exist.
    let removed: Vec<CodeChunk> = prior_iter
        .map(|old| {
            let mut gone = (*old).clone();
            gone.delta_type = DeltaType::Removed;
            gone
        })
        .collect();
    summary.removed = removed.len();

    (summary, removed)
}
