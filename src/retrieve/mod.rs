//! Rule-to-code retrieval.
//!
//! Nearest-neighbor search of a rule embedding against a repository's
//! code map, with deterministic ordering and downstream similarity
//! gating.

use uuid::Uuid;

use crate::error::Result;
use crate::store::{SharedStore, SimilarChunk};

/// Retrieval front-end over the code-map store.
#[derive(Clone)]
pub struct Retriever {
    store: SharedStore,
}

impl Retriever {
    /// Creates a retriever over the shared store.
    #[must_use]
    pub const fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Returns the `top_k` chunks closest to the rule embedding.
    ///
    /// Results are ordered by ascending distance; exact ties order by
    /// `(file_path, start_line)`. With fewer than `top_k` stored rows,
    /// exactly the stored rows come back; `top_k = 0` yields nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the store scan fails.
    pub async fn retrieve(
        &self,
        rule_embedding: &[f32],
        repo_id: Uuid,
        top_k: usize,
    ) -> Result<Vec<SimilarChunk>> {
        let store = self.store.lock().await;
        store.search_similar(rule_embedding, Some(repo_id), top_k)
    }
}

/// Keeps hits whose similarity (`1 - distance`) meets the threshold.
///
/// Used by the adjudicator and navigator before any LLM spend.
#[must_use]
pub fn gate_by_similarity(hits: Vec<SimilarChunk>, threshold: f32) -> Vec<SimilarChunk> {
    hits.into_iter()
        .filter(|hit| hit.similarity() >= threshold)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::chunk::sha256_hex;
    use crate::model::{CodeChunk, Repo};
    use crate::store::{shared, SqliteStore};

    async fn seeded_store() -> (SharedStore, Uuid) {
        let mut store = SqliteStore::in_memory().unwrap();
        store.init().unwrap();
        let repo = Repo::new(1, 1, "acme/pay", "main");
        store.insert_repo(&repo).unwrap();

        let mut chunks = Vec::new();
        for (i, (text, embedding)) in [
            ("retention logic", vec![1.0, 0.0, 0.0]),
            ("auth middleware", vec![0.0, 1.0, 0.0]),
            ("logging setup", vec![0.6, 0.8, 0.0]),
        ]
        .into_iter()
        .enumerate()
        {
            let mut chunk = CodeChunk::new(
                repo.repo_id,
                format!("src/f{i}.py"),
                "python",
                1,
                10,
                text.to_string(),
                sha256_hex(text),
            );
            chunk.embedding = Some(embedding);
            chunks.push(chunk);
        }
        store.upsert_chunks(&chunks).unwrap();
        (shared(store), repo.repo_id)
    }

    #[tokio::test]
    async fn test_retrieve_orders_by_distance() {
        let (store, repo_id) = seeded_store().await;
        let retriever = Retriever::new(store);

        let hits = retriever.retrieve(&[1.0, 0.0, 0.0], repo_id, 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk.chunk_text, "retention logic");
        assert!(hits[0].distance <= hits[1].distance);
        assert!(hits[1].distance <= hits[2].distance);
    }

    #[tokio::test]
    async fn test_retrieve_k_bounds() {
        let (store, repo_id) = seeded_store().await;
        let retriever = Retriever::new(store);

        assert!(retriever
            .retrieve(&[1.0, 0.0, 0.0], repo_id, 0)
            .await
            .unwrap()
            .is_empty());
        // k beyond the row count returns exactly the rows
        let hits = retriever
            .retrieve(&[1.0, 0.0, 0.0], repo_id, 50)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_retrieve_scoped_to_repo() {
        let (store, _) = seeded_store().await;
        let retriever = Retriever::new(store);
        let other_repo = Uuid::new_v4();
        let hits = retriever
            .retrieve(&[1.0, 0.0, 0.0], other_repo, 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_similarity_gate() {
        let (store, repo_id) = seeded_store().await;
        let retriever = Retriever::new(store);
        let hits = retriever.retrieve(&[1.0, 0.0, 0.0], repo_id, 3).await.unwrap();

        let gated = gate_by_similarity(hits, 0.7);
        // Only the aligned vector clears 0.7 similarity
        assert_eq!(gated.len(), 1);
        assert_eq!(gated[0].chunk.chunk_text, "retention logic");
    }
}
