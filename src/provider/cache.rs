//! Fingerprinted cache over provider enrichment calls.
//!
//! A keyed semantic store: a hit must be byte-identical to what a cold
//! provider call would have produced, so keys are content fingerprints
//! (`emb:<sha256(text)>`, `sum:<chunk_hash>`). Entries expire after the
//! configured TTL and the cache may evict at any time; a miss simply
//! falls through to the provider.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::model::chunk::sha256_hex;

/// Cache key for an embedding of the given text.
#[must_use]
pub fn embedding_key(text: &str) -> String {
    format!("emb:{}", sha256_hex(text))
}

/// Cache key for a summary of the chunk with the given hash.
#[must_use]
pub fn summary_key(chunk_hash: &str) -> String {
    format!("sum:{chunk_hash}")
}

/// In-process TTL cache for embeddings and summaries.
#[derive(Debug)]
pub struct EnrichmentCache {
    embeddings: DashMap<String, (Vec<f32>, Instant)>,
    summaries: DashMap<String, (String, Instant)>,
    ttl_embeddings: Duration,
    ttl_summary: Duration,
}

impl EnrichmentCache {
    /// Creates a cache with per-kind TTLs.
    #[must_use]
    pub fn new(ttl_embeddings: Duration, ttl_summary: Duration) -> Self {
        Self {
            embeddings: DashMap::new(),
            summaries: DashMap::new(),
            ttl_embeddings,
            ttl_summary,
        }
    }

    /// Looks up a cached embedding for the exact text.
    #[must_use]
    pub fn get_embedding(&self, text: &str) -> Option<Vec<f32>> {
        let key = embedding_key(text);
        let entry = self.embeddings.get(&key)?;
        if entry.1 <= Instant::now() {
            drop(entry);
            self.embeddings.remove(&key);
            return None;
        }
        Some(entry.0.clone())
    }

    /// Stores an embedding under the text's fingerprint.
    pub fn put_embedding(&self, text: &str, embedding: Vec<f32>) {
        self.embeddings.insert(
            embedding_key(text),
            (embedding, Instant::now() + self.ttl_embeddings),
        );
    }

    /// Looks up a cached summary for a chunk hash.
    #[must_use]
    pub fn get_summary(&self, chunk_hash: &str) -> Option<String> {
        let key = summary_key(chunk_hash);
        let entry = self.summaries.get(&key)?;
        if entry.1 <= Instant::now() {
            drop(entry);
            self.summaries.remove(&key);
            return None;
        }
        Some(entry.0.clone())
    }

    /// Stores a summary under the chunk hash.
    pub fn put_summary(&self, chunk_hash: &str, summary: String) {
        self.summaries.insert(
            summary_key(chunk_hash),
            (summary, Instant::now() + self.ttl_summary),
        );
    }

    /// Drops every entry (eviction is allowed at any time).
    pub fn clear(&self) {
        self.embeddings.clear();
        self.summaries.clear();
    }

    /// Number of live entries across both kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.embeddings.len() + self.summaries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty() && self.summaries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> Duration {
        Duration::from_secs(86_400)
    }

    #[test]
    fn test_keys_are_fingerprinted() {
        assert_eq!(embedding_key("abc"), format!("emb:{}", sha256_hex("abc")));
        assert_eq!(summary_key("deadbeef"), "sum:deadbeef");
        assert_ne!(embedding_key("a"), embedding_key("b"));
    }

    #[test]
    fn test_embedding_round_trip() {
        let cache = EnrichmentCache::new(day(), day());
        assert!(cache.get_embedding("text").is_none());
        cache.put_embedding("text", vec![0.5, 0.25]);
        assert_eq!(cache.get_embedding("text"), Some(vec![0.5, 0.25]));
        // Different text misses
        assert!(cache.get_embedding("other").is_none());
    }

    #[test]
    fn test_summary_round_trip() {
        let cache = EnrichmentCache::new(day(), day());
        cache.put_summary("hash1", "validates login".into());
        assert_eq!(
            cache.get_summary("hash1"),
            Some("validates login".to_string())
        );
        assert!(cache.get_summary("hash2").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = EnrichmentCache::new(Duration::from_secs(10), Duration::from_secs(10));
        cache.put_embedding("text", vec![1.0]);
        cache.put_summary("h", "s".into());

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(cache.get_embedding("text").is_none());
        assert!(cache.get_summary("h").is_none());
        // Stale entries were removed on read
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_evicts_everything() {
        let cache = EnrichmentCache::new(day(), day());
        cache.put_embedding("a", vec![1.0]);
        cache.put_summary("b", "x".into());
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hit_is_byte_identical() {
        let cache = EnrichmentCache::new(day(), day());
        let vector = vec![0.1, 0.2, 0.3];
        cache.put_embedding("fn main() {}", vector.clone());
        assert_eq!(cache.get_embedding("fn main() {}"), Some(vector));
    }
}
