//! Repository records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::now_ts;

/// A tracked source-code repository.
///
/// Created by a webhook or API call, mutated by the indexer on each
/// successful run, and deleted only when its installation is removed.
/// The chunk counters mirror the number of live [`super::CodeChunk`]s
/// owned by this repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    /// Opaque repository identifier.
    pub repo_id: Uuid,

    /// Externally assigned GitHub repository ID.
    pub github_id: i64,

    /// Externally assigned installation ID (0 for token-based access).
    pub installation_id: i64,

    /// Repository full name, `owner/name`.
    pub full_name: String,

    /// Default branch indexed on full passes.
    pub default_branch: String,

    /// Commit SHA of the last successful index pass.
    ///
    /// A failed index job leaves this unchanged.
    pub last_commit_sha: Option<String>,

    /// Number of files processed in the last successful pass.
    pub indexed_file_count: usize,

    /// Number of live chunks in the code map.
    pub total_chunks: usize,

    /// Unix timestamp of record creation.
    pub created_at: i64,

    /// Unix timestamp of the last successful index pass.
    pub last_synced_at: Option<i64>,
}

impl Repo {
    /// Creates a new unindexed repository record.
    #[must_use]
    pub fn new(
        github_id: i64,
        installation_id: i64,
        full_name: impl Into<String>,
        default_branch: impl Into<String>,
    ) -> Self {
        Self {
            repo_id: Uuid::new_v4(),
            github_id,
            installation_id,
            full_name: full_name.into(),
            default_branch: default_branch.into(),
            last_commit_sha: None,
            indexed_file_count: 0,
            total_chunks: 0,
            created_at: now_ts(),
            last_synced_at: None,
        }
    }

    /// Repository owner (the part before the slash).
    #[must_use]
    pub fn owner(&self) -> &str {
        self.full_name.split('/').next().unwrap_or(&self.full_name)
    }

    /// Repository name (the part after the slash).
    #[must_use]
    pub fn name(&self) -> &str {
        self.full_name
            .split('/')
            .nth(1)
            .unwrap_or(&self.full_name)
    }
}
