//! The indexer worker.
//!
//! Runs one index job through its phases: resolve a credential, clone
//! the repository into a temporary working tree, walk and chunk the
//! source, enrich chunks with embeddings and summaries (bounded
//! fan-out, cache first), persist the code map, and finalize the repo
//! counters. Delta mode re-walks only the changed paths.
//!
//! ```text
//! received → resolving_token → cloning → walking → chunking
//!          → enriching → persisting → finalizing → done
//! ```
//!
//! A non-fatal error on one chunk or file is logged and skipped; a
//! fatal error fails the job and leaves the repo's `last_commit_sha`
//! untouched.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::delta::{classify_file_chunks, DeltaSummary};
use super::token::TokenCache;
use super::walk::walk_source_files;
use crate::chunking::Chunker;
use crate::config::{Config, Timeouts};
use crate::error::{Error, ProviderError, Result, StorageError};
use crate::model::{CodeChunk, DeltaType, IndexJobPayload, Repo};
use crate::prompts::{build_summary_prompt, PromptSet};
use crate::provider::{
    with_retry, with_timeout, ChatMessage, EnrichmentCache, Providers, RateLimiter,
};
use crate::store::SharedStore;

/// Concurrent enrichment tasks per batch.
pub const ENRICH_BATCH: usize = 10;

/// Rows per persistence batch.
const PERSIST_BATCH: usize = 100;

/// Result blob of an index job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexOutcome {
    /// Repository indexed.
    pub repo_id: Uuid,
    /// Commit actually checked out.
    pub commit_sha: String,
    /// Files with at least one live chunk.
    pub files_indexed: usize,
    /// Live chunks in the code map after this pass.
    pub total_chunks: usize,
    /// Chunks written by this pass.
    pub chunks_written: usize,
    /// Delta classification of this pass.
    pub delta: DeltaSummary,
}

/// Worker executing index jobs.
pub struct IndexerWorker {
    store: SharedStore,
    chunker: Chunker,
    providers: Providers,
    tokens: TokenCache,
    cache: Arc<EnrichmentCache>,
    embed_limiter: Arc<RateLimiter>,
    llm_limiter: Arc<RateLimiter>,
    prompts: PromptSet,
    config: Config,
    timeouts: Timeouts,
}

impl IndexerWorker {
    /// Creates a worker over the shared store and collaborator bundle.
    #[must_use]
    pub fn new(
        store: SharedStore,
        providers: Providers,
        cache: Arc<EnrichmentCache>,
        embed_limiter: Arc<RateLimiter>,
        llm_limiter: Arc<RateLimiter>,
        prompts: PromptSet,
        config: Config,
    ) -> Self {
        let chunker = Chunker::new(config.min_chunk_tokens, config.max_chunk_tokens);
        let tokens = TokenCache::new(Arc::clone(&providers.tokens));
        Self {
            store,
            chunker,
            providers,
            tokens,
            cache,
            embed_limiter,
            llm_limiter,
            prompts,
            config,
            timeouts: Timeouts::default(),
        }
    }

    /// Runs one index job to completion.
    ///
    /// # Errors
    ///
    /// Returns a typed error classified for queue retry; partial chunk
    /// failures never fail the job.
    pub async fn run(&self, payload: &IndexJobPayload) -> Result<IndexOutcome> {
        let repo = {
            let store = self.store.lock().await;
            store
                .get_repo(payload.repo_id)?
                .ok_or(StorageError::RepoNotFound {
                    repo_id: payload.repo_id.to_string(),
                })?
        };
        tracing::info!(repo = %repo.full_name, phase = "resolving_token", "index job started");

        let credential = self.tokens.credential(repo.installation_id).await?;

        std::fs::create_dir_all(&self.config.temp_clone_path)?;
        let workdir = tempfile::Builder::new()
            .prefix("regscan-")
            .tempdir_in(&self.config.temp_clone_path)?;
        let dest = workdir.path().join(repo.name());

        tracing::info!(repo = %repo.full_name, phase = "cloning");
        let commit_sha = self
            .providers
            .repos
            .clone_repo(
                &repo.full_name,
                &credential,
                payload.commit_sha.as_deref(),
                &dest,
            )
            .await?;

        tracing::info!(repo = %repo.full_name, phase = "walking", commit = %commit_sha);
        let files: Vec<PathBuf> = if let Some(changed) = &payload.changed_files {
            changed.iter().map(PathBuf::from).collect()
        } else {
            walk_source_files(&dest, self.config.max_file_size_bytes())?
        };

        tracing::info!(repo = %repo.full_name, phase = "chunking", files = files.len());
        let chunked = self.chunk_files(&repo, &dest, files).await?;

        // Classify every re-chunked file against its prior stored set
        let mut fresh: Vec<CodeChunk> = Vec::new();
        let mut removed_rows: Vec<CodeChunk> = Vec::new();
        let mut delta = DeltaSummary::default();
        for (rel, mut chunks) in chunked {
            let prior = {
                let store = self.store.lock().await;
                store.chunks_for_file(repo.repo_id, &rel)?
            };
            let live_prior: Vec<CodeChunk> = prior
                .into_iter()
                .filter(|c| c.delta_type != DeltaType::Removed)
                .collect();
            let (summary, removed) = classify_file_chunks(&live_prior, &mut chunks);
            delta.merge(&summary);
            fresh.extend(chunks);
            removed_rows.extend(removed);
        }

        tracing::info!(repo = %repo.full_name, phase = "enriching", chunks = fresh.len());
        self.enrich_chunks(&mut fresh).await;

        tracing::info!(repo = %repo.full_name, phase = "persisting");
        let chunks_written = fresh.len();
        {
            let mut store = self.store.lock().await;
            for batch in fresh.chunks(PERSIST_BATCH) {
                store.upsert_chunks(batch)?;
            }
            if payload.changed_files.is_some() {
                // Delta pass: record disappearance, prune only on full passes
                if !removed_rows.is_empty() {
                    store.upsert_chunks(&removed_rows)?;
                }
            } else {
                let retained: HashSet<String> =
                    fresh.iter().map(|c| c.chunk_hash.clone()).collect();
                let pruned = store.prune_removed(repo.repo_id, &retained)?;
                if pruned > 0 {
                    tracing::info!(repo = %repo.full_name, pruned, "pruned stale chunks");
                }
            }
        }

        tracing::info!(repo = %repo.full_name, phase = "finalizing");
        let (files_indexed, total_chunks) = {
            let mut store = self.store.lock().await;
            let live: Vec<CodeChunk> = store
                .chunks_for_repo(repo.repo_id)?
                .into_iter()
                .filter(|c| c.delta_type != DeltaType::Removed)
                .collect();
            let paths: HashSet<&str> = live.iter().map(|c| c.file_path.as_str()).collect();
            let counts = (paths.len(), live.len());
            store.update_repo_sync(repo.repo_id, &commit_sha, counts.0, counts.1)?;
            counts
        };

        tracing::info!(
            repo = %repo.full_name,
            phase = "done",
            files_indexed,
            total_chunks,
            added = delta.added,
            modified = delta.modified,
            unchanged = delta.unchanged,
            removed = delta.removed,
        );
        Ok(IndexOutcome {
            repo_id: repo.repo_id,
            commit_sha,
            files_indexed,
            total_chunks,
            chunks_written,
            delta,
        })
    }

    /// Reads and chunks files on the blocking pool, in parallel.
    ///
    /// Unreadable or unchunkable files are logged and skipped; a file
    /// listed in a delta payload but absent from the working tree
    /// yields an empty chunk set, so its prior chunks classify as
    /// removed.
    async fn chunk_files(
        &self,
        repo: &Repo,
        dest: &std::path::Path,
        files: Vec<PathBuf>,
    ) -> Result<Vec<(String, Vec<CodeChunk>)>> {
        let chunker = self.chunker.clone();
        let repo_id = repo.repo_id;
        let root = dest.to_path_buf();

        tokio::task::spawn_blocking(move || {
            files
                .par_iter()
                .filter_map(|rel| {
                    let rel_str = rel.to_string_lossy().replace('\\', "/");
                    let full = root.join(rel);
                    if !full.exists() {
                        return Some((rel_str, Vec::new()));
                    }
                    let content = match std::fs::read_to_string(&full) {
                        Ok(content) => content,
                        Err(e) => {
                            tracing::warn!(file = %rel_str, error = %e, "unreadable file skipped");
                            return None;
                        }
                    };
                    match chunker.chunk_file(repo_id, &rel_str, &content) {
                        Ok(chunks) => Some((rel_str, chunks)),
                        Err(e) => {
                            tracing::warn!(file = %rel_str, error = %e, "chunking failed, file skipped");
                            None
                        }
                    }
                })
                .collect()
        })
        .await
        .map_err(|e| {
            Error::Provider(ProviderError::Upstream {
                operation: "chunking",
                reason: e.to_string(),
            })
        })
    }

    /// Enriches chunks with embeddings and summaries.
    ///
    /// Issues up to [`ENRICH_BATCH`] concurrent chunk tasks; within a
    /// task the embedding and summary calls run in parallel. Provider
    /// failures leave the field `None` and never abort the batch.
    async fn enrich_chunks(&self, chunks: &mut [CodeChunk]) {
        for batch in chunks.chunks_mut(ENRICH_BATCH) {
            futures_util::future::join_all(batch.iter_mut().map(|c| self.enrich_chunk(c))).await;
        }
    }

    async fn enrich_chunk(&self, chunk: &mut CodeChunk) {
        let text = chunk.chunk_text.clone();
        let language = chunk.language.clone();
        let file_path = chunk.file_path.clone();
        let chunk_hash = chunk.chunk_hash.clone();
        let need_embed = chunk.embedding.is_none();
        let need_summary = chunk.nl_summary.is_none();

        let (embedding, summary) = tokio::join!(
            self.embed_text(&text, need_embed),
            self.summarize(&language, &file_path, &chunk_hash, &text, need_summary),
        );
        if embedding.is_some() {
            chunk.embedding = embedding;
        }
        if summary.is_some() {
            chunk.nl_summary = summary;
        }
    }

    async fn embed_text(&self, text: &str, needed: bool) -> Option<Vec<f32>> {
        if !needed {
            return None;
        }
        if let Some(hit) = self.cache.get_embedding(text) {
            return Some(hit);
        }
        self.embed_limiter.acquire().await;
        let result = with_retry("embed", || {
            with_timeout(
                "embed",
                self.timeouts.provider,
                self.providers.embeddings.embed(text),
            )
        })
        .await;
        match result {
            Ok(vector) => {
                self.cache.put_embedding(text, vector.clone());
                Some(vector)
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, chunk left pending");
                None
            }
        }
    }

    async fn summarize(
        &self,
        language: &str,
        file_path: &str,
        chunk_hash: &str,
        text: &str,
        needed: bool,
    ) -> Option<String> {
        if !needed {
            return None;
        }
        if let Some(hit) = self.cache.get_summary(chunk_hash) {
            return Some(hit);
        }
        self.llm_limiter.acquire().await;
        let messages = [
            ChatMessage::system(self.prompts.summary.clone()),
            ChatMessage::user(build_summary_prompt(language, file_path, text)),
        ];
        let result = with_retry("summarize", || {
            with_timeout(
                "complete",
                self.timeouts.provider,
                self.providers.llm.complete(&messages, 0.1, 300),
            )
        })
        .await;
        match result {
            Ok(summary) => {
                self.cache.put_summary(chunk_hash, summary.clone());
                Some(summary)
            }
            Err(e) => {
                tracing::warn!(error = %e, "summary failed, chunk left pending");
                None
            }
        }
    }
}
