//! `SQLite` store implementation.
//!
//! Persists the code map, regulation chunks, audit cases, findings, and
//! case logs with transaction management. Embeddings live in BLOB
//! columns; nearest-neighbor retrieval decodes candidates and ranks by
//! cosine distance in process.

// SQLite stores all integers as i64. These casts are intentional and safe
// because we only store non-negative values that fit in usize.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::model::{
    now_ts, AuditStep, Case, CaseStatus, CodeChunk, DeltaType, Finding, FindingStatus, LogEntry,
    RegulationChunk, Repo, Severity, UserDecision, Verdict,
};
use crate::store::schema::{
    CHECK_SCHEMA_SQL, CURRENT_SCHEMA_VERSION, GET_VERSION_SQL, SCHEMA_SQL, SET_VERSION_SQL,
};
use crate::store::vector::{cosine_distance, decode_embedding, encode_embedding};

/// Default database filename.
pub const DEFAULT_DB_PATH: &str = "regscan.db";

/// A chunk returned from similarity search with its distance.
#[derive(Debug, Clone)]
pub struct SimilarChunk {
    /// The matched chunk.
    pub chunk: CodeChunk,
    /// Cosine distance to the query (lower is closer).
    pub distance: f32,
}

impl SimilarChunk {
    /// Similarity of the match: `1 - distance`.
    #[must_use]
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

/// Store statistics for diagnostics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStats {
    /// Number of tracked repositories.
    pub repo_count: usize,
    /// Total code-map chunks.
    pub chunk_count: usize,
    /// Total regulation chunks.
    pub regulation_chunk_count: usize,
    /// Total jobs (all statuses).
    pub job_count: usize,
    /// Total cases.
    pub case_count: usize,
    /// Total findings.
    pub finding_count: usize,
}

/// SQLite-backed persistence for the whole engine.
///
/// # Examples
///
/// ```no_run
/// use regscan_rs::store::SqliteStore;
///
/// let mut store = SqliteStore::open("regscan.db").unwrap();
/// store.init().unwrap();
/// ```
pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

/// Converts any boxable error into a rusqlite conversion failure, for
/// use inside row-mapping closures.
fn conv_err<E: std::error::Error + Send + Sync + 'static>(e: E) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
}

/// Conversion failure from a plain message.
fn parse_err(msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, msg.into())
}

fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(conv_err)
}

fn get_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(conv_err)
}

fn get_opt_json(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str(&s).map_err(conv_err))
        .transpose()
}

fn get_embedding(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Vec<f32>>> {
    let blob: Option<Vec<u8>> = row.get(idx)?;
    blob.map(|b| decode_embedding(&b).map_err(|e| parse_err(e.to_string())))
        .transpose()
}

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<CodeChunk> {
    let delta_raw: String = row.get(17)?;
    Ok(CodeChunk {
        chunk_id: get_uuid(row, 0)?,
        repo_id: get_uuid(row, 1)?,
        file_path: row.get(2)?,
        language: row.get(3)?,
        start_line: row.get::<_, i64>(4)? as usize,
        end_line: row.get::<_, i64>(5)? as usize,
        chunk_text: row.get(6)?,
        ast_node_type: row.get(7)?,
        file_hash: row.get(8)?,
        chunk_hash: row.get(9)?,
        embedding: get_embedding(row, 10)?,
        nl_summary: row.get(11)?,
        call_links: get_json(row, 12)?,
        variables: get_json(row, 13)?,
        config_keys: get_json(row, 14)?,
        semantic_tags: get_json(row, 15)?,
        previous_hash: row.get(16)?,
        delta_type: DeltaType::parse(&delta_raw)
            .ok_or_else(|| parse_err(format!("unknown delta_type: {delta_raw}")))?,
    })
}

const CHUNK_COLUMNS: &str = "chunk_id, repo_id, file_path, language, start_line, end_line, \
     chunk_text, ast_node_type, file_hash, chunk_hash, embedding, nl_summary, \
     call_links, variables, config_keys, semantic_tags, previous_hash, delta_type";

fn row_to_case(row: &Row<'_>) -> rusqlite::Result<Case> {
    let status_raw: String = row.get(3)?;
    let current_raw: Option<String> = row.get(4)?;
    let decision_raw: Option<String> = row.get(14)?;
    let steps_completed: Vec<AuditStep> = get_json(row, 5)?;
    let steps_pending: Vec<AuditStep> = get_json(row, 6)?;

    Ok(Case {
        case_id: get_uuid(row, 0)?,
        repo_id: get_uuid(row, 1)?,
        regulation_ids: get_json(row, 2)?,
        status: CaseStatus::parse(&status_raw)
            .ok_or_else(|| parse_err(format!("unknown case status: {status_raw}")))?,
        current_step: current_raw
            .map(|s| {
                AuditStep::parse(&s).ok_or_else(|| parse_err(format!("unknown step: {s}")))
            })
            .transpose()?,
        steps_completed,
        steps_pending,
        planner_result: get_opt_json(row, 7)?,
        navigator_result: get_opt_json(row, 8)?,
        investigator_result: get_opt_json(row, 9)?,
        judge_result: get_opt_json(row, 10)?,
        remediator_result: get_opt_json(row, 11)?,
        requires_approval: row.get::<_, i64>(12)? != 0,
        user_decision: decision_raw
            .map(|s| {
                UserDecision::parse(&s)
                    .ok_or_else(|| parse_err(format!("unknown decision: {s}")))
            })
            .transpose()?,
        jira_ticket_ids: get_json(row, 13)?,
        error_message: row.get(15)?,
        cancel_requested: row.get::<_, i64>(16)? != 0,
        started_at: row.get(17)?,
        updated_at: row.get(18)?,
        completed_at: row.get(19)?,
    })
}

const CASE_COLUMNS: &str = "case_id, repo_id, regulation_ids, status, current_step, \
     steps_completed, steps_pending, planner_result, navigator_result, investigator_result, \
     judge_result, remediator_result, requires_approval, jira_ticket_ids, user_decision, \
     error_message, cancel_requested, started_at, updated_at, completed_at";

fn row_to_finding(row: &Row<'_>) -> rusqlite::Result<Finding> {
    let verdict_raw: String = row.get(6)?;
    let severity_raw: String = row.get(7)?;
    let status_raw: String = row.get(13)?;
    Ok(Finding {
        finding_id: get_uuid(row, 0)?,
        case_id: get_uuid(row, 1)?,
        rule_id: row.get(2)?,
        file_path: row.get(3)?,
        start_line: row.get::<_, i64>(4)? as usize,
        end_line: row.get::<_, i64>(5)? as usize,
        verdict: Verdict::parse(&verdict_raw)
            .ok_or_else(|| parse_err(format!("unknown verdict: {verdict_raw}")))?,
        severity: Severity::parse(&severity_raw)
            .ok_or_else(|| parse_err(format!("unknown severity: {severity_raw}")))?,
        severity_score: row.get::<_, f64>(8)? as f32,
        confidence: row.get::<_, f64>(9)? as f32,
        evidence: row.get(10)?,
        reasoning: row.get(11)?,
        remediation: row.get(12)?,
        status: FindingStatus::parse(&status_raw)
            .ok_or_else(|| parse_err(format!("unknown finding status: {status_raw}")))?,
        reviewer_note: row.get(14)?,
        reviewed_at: row.get(15)?,
        ticket_id: row.get(16)?,
        created_at: row.get(17)?,
    })
}

const FINDING_COLUMNS: &str = "finding_id, case_id, rule_id, file_path, start_line, end_line, \
     verdict, severity, severity_score, confidence, evidence, reasoning, remediation, status, \
     reviewer_note, reviewed_at, ticket_id, created_at";

impl SqliteStore {
    /// Opens or creates the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Database(e.to_string()))?;
            }
        }

        let conn = Connection::open(&path).map_err(StorageError::from)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StorageError::from)?;
        let _: String = conn
            .query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))
            .map_err(StorageError::from)?;

        Ok(Self {
            conn,
            path: Some(path),
        })
    }

    /// Creates an in-memory database, for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StorageError::from)?;
        Ok(Self { conn, path: None })
    }

    /// Returns the database path (`None` for in-memory).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Borrow of the underlying connection for sibling modules.
    pub(crate) const fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Mutable borrow of the underlying connection for sibling modules.
    pub(crate) const fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Initializes the schema; idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if schema creation or migration fails.
    pub fn init(&mut self) -> Result<()> {
        let is_init: i64 = self
            .conn
            .query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))
            .map_err(StorageError::from)?;

        if is_init == 0 {
            self.conn
                .execute_batch(SCHEMA_SQL)
                .map_err(StorageError::from)?;
            self.set_schema_version(CURRENT_SCHEMA_VERSION)?;
        } else if let Some(current) = self.schema_version()? {
            if current < CURRENT_SCHEMA_VERSION {
                for migration in crate::store::schema::get_migrations_from(current) {
                    self.conn
                        .execute_batch(migration.sql)
                        .map_err(|e| StorageError::Database(e.to_string()))?;
                }
                self.set_schema_version(CURRENT_SCHEMA_VERSION)?;
            }
        }
        Ok(())
    }

    /// Checks whether the schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the check cannot be performed.
    pub fn is_initialized(&self) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(CHECK_SCHEMA_SQL, [], |row| row.get(0))
            .map_err(StorageError::from)?;
        Ok(count > 0)
    }

    fn schema_version(&self) -> Result<Option<u32>> {
        let version: Option<String> = self
            .conn
            .query_row(GET_VERSION_SQL, [], |row| row.get(0))
            .optional()
            .map_err(StorageError::from)?;
        Ok(version.and_then(|v| v.parse().ok()))
    }

    fn set_schema_version(&self, version: u32) -> Result<()> {
        self.conn
            .execute(SET_VERSION_SQL, params![version.to_string()])
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Gathers table counts for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns an error if a count query fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let count = |table: &str| -> Result<usize> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .map_err(StorageError::from)?;
            Ok(n as usize)
        };
        Ok(StoreStats {
            repo_count: count("repos")?,
            chunk_count: count("code_map")?,
            regulation_chunk_count: count("regulation_chunks")?,
            job_count: count("jobs")?,
            case_count: count("cases")?,
            finding_count: count("findings")?,
        })
    }

    // ==================== Repositories ====================

    /// Inserts a repository record.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert_repo(&mut self, repo: &Repo) -> Result<()> {
        self.conn
            .execute(
                r"INSERT INTO repos (
                    repo_id, github_id, installation_id, full_name, default_branch,
                    last_commit_sha, indexed_file_count, total_chunks, created_at, last_synced_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    repo.repo_id.to_string(),
                    repo.github_id,
                    repo.installation_id,
                    repo.full_name,
                    repo.default_branch,
                    repo.last_commit_sha,
                    repo.indexed_file_count as i64,
                    repo.total_chunks as i64,
                    repo.created_at,
                    repo.last_synced_at,
                ],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Fetches a repository by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_repo(&self, repo_id: Uuid) -> Result<Option<Repo>> {
        self.conn
            .query_row(
                r"SELECT repo_id, github_id, installation_id, full_name, default_branch,
                         last_commit_sha, indexed_file_count, total_chunks, created_at,
                         last_synced_at
                  FROM repos WHERE repo_id = ?",
                params![repo_id.to_string()],
                |row| {
                    Ok(Repo {
                        repo_id: get_uuid(row, 0)?,
                        github_id: row.get(1)?,
                        installation_id: row.get(2)?,
                        full_name: row.get(3)?,
                        default_branch: row.get(4)?,
                        last_commit_sha: row.get(5)?,
                        indexed_file_count: row.get::<_, i64>(6)? as usize,
                        total_chunks: row.get::<_, i64>(7)? as usize,
                        created_at: row.get(8)?,
                        last_synced_at: row.get(9)?,
                    })
                },
            )
            .optional()
            .map_err(StorageError::from)
            .map_err(Into::into)
    }

    /// Records a successful index pass: commit SHA and counters.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::RepoNotFound`] for an unknown repository.
    pub fn update_repo_sync(
        &mut self,
        repo_id: Uuid,
        commit_sha: &str,
        file_count: usize,
        chunk_count: usize,
    ) -> Result<()> {
        let updated = self
            .conn
            .execute(
                r"UPDATE repos SET
                    last_commit_sha = ?, indexed_file_count = ?, total_chunks = ?,
                    last_synced_at = ?
                  WHERE repo_id = ?",
                params![
                    commit_sha,
                    file_count as i64,
                    chunk_count as i64,
                    now_ts(),
                    repo_id.to_string(),
                ],
            )
            .map_err(StorageError::from)?;
        if updated == 0 {
            return Err(StorageError::RepoNotFound {
                repo_id: repo_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Deletes a repository and its code map (installation removal).
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete_repo(&mut self, repo_id: Uuid) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM repos WHERE repo_id = ?",
                params![repo_id.to_string()],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    // ==================== Code map ====================

    /// Upserts a batch of chunks atomically.
    ///
    /// The natural key is `(repo_id, chunk_hash)`; existing rows keep
    /// their `chunk_id` and refresh embedding, summary, and enrichment
    /// fields. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails; no partial batch is
    /// ever visible.
    pub fn upsert_chunks(&mut self, chunks: &[CodeChunk]) -> Result<usize> {
        let now = now_ts();
        let tx = self.conn.transaction().map_err(StorageError::from)?;
        {
            let mut stmt = tx
                .prepare(
                    r"INSERT INTO code_map (
                        chunk_id, repo_id, file_path, language, start_line, end_line,
                        chunk_text, ast_node_type, file_hash, chunk_hash, embedding,
                        nl_summary, call_links, variables, config_keys, semantic_tags,
                        previous_hash, delta_type, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT (repo_id, chunk_hash) DO UPDATE SET
                        embedding = excluded.embedding,
                        nl_summary = excluded.nl_summary,
                        call_links = excluded.call_links,
                        variables = excluded.variables,
                        config_keys = excluded.config_keys,
                        semantic_tags = excluded.semantic_tags,
                        previous_hash = excluded.previous_hash,
                        delta_type = excluded.delta_type,
                        updated_at = excluded.updated_at",
                )
                .map_err(StorageError::from)?;

            for chunk in chunks {
                stmt.execute(params![
                    chunk.chunk_id.to_string(),
                    chunk.repo_id.to_string(),
                    chunk.file_path,
                    chunk.language,
                    chunk.start_line as i64,
                    chunk.end_line as i64,
                    chunk.chunk_text,
                    chunk.ast_node_type,
                    chunk.file_hash,
                    chunk.chunk_hash,
                    chunk.embedding.as_deref().map(encode_embedding),
                    chunk.nl_summary,
                    serde_json::to_string(&chunk.call_links).map_err(StorageError::from)?,
                    serde_json::to_string(&chunk.variables).map_err(StorageError::from)?,
                    serde_json::to_string(&chunk.config_keys).map_err(StorageError::from)?,
                    serde_json::to_string(&chunk.semantic_tags).map_err(StorageError::from)?,
                    chunk.previous_hash,
                    chunk.delta_type.as_str(),
                    now,
                    now,
                ])
                .map_err(StorageError::from)?;
            }
        }
        tx.commit().map_err(StorageError::from)?;
        Ok(chunks.len())
    }

    /// All chunks for a repository, ordered by `(file_path, start_line)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn chunks_for_repo(&self, repo_id: Uuid) -> Result<Vec<CodeChunk>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {CHUNK_COLUMNS} FROM code_map WHERE repo_id = ? \
                 ORDER BY file_path, start_line"
            ))
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map(params![repo_id.to_string()], row_to_chunk)
            .map_err(StorageError::from)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)
            .map_err(Into::into)
    }

    /// Chunks of one file within a repository.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn chunks_for_file(&self, repo_id: Uuid, file_path: &str) -> Result<Vec<CodeChunk>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {CHUNK_COLUMNS} FROM code_map \
                 WHERE repo_id = ? AND file_path = ? ORDER BY start_line"
            ))
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map(params![repo_id.to_string(), file_path], row_to_chunk)
            .map_err(StorageError::from)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)
            .map_err(Into::into)
    }

    /// Fetches a single chunk by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_chunk(&self, chunk_id: Uuid) -> Result<Option<CodeChunk>> {
        self.conn
            .query_row(
                &format!("SELECT {CHUNK_COLUMNS} FROM code_map WHERE chunk_id = ?"),
                params![chunk_id.to_string()],
                row_to_chunk,
            )
            .optional()
            .map_err(StorageError::from)
            .map_err(Into::into)
    }

    /// Nearest-neighbor search over stored embeddings.
    ///
    /// Returns up to `k` rows by ascending cosine distance, ties broken
    /// by `(file_path, start_line)`. Rows with no embedding never match.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan fails or a blob is corrupt.
    pub fn search_similar(
        &self,
        query_embedding: &[f32],
        repo_id: Option<Uuid>,
        k: usize,
    ) -> Result<Vec<SimilarChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM code_map \
             WHERE embedding IS NOT NULL{}",
            if repo_id.is_some() {
                " AND repo_id = ?"
            } else {
                ""
            }
        );
        let mut stmt = self.conn.prepare(&sql).map_err(StorageError::from)?;

        let mapped: Vec<CodeChunk> = if let Some(id) = repo_id {
            let rows = stmt
                .query_map(params![id.to_string()], row_to_chunk)
                .map_err(StorageError::from)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StorageError::from)?
        } else {
            let rows = stmt
                .query_map([], row_to_chunk)
                .map_err(StorageError::from)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StorageError::from)?
        };

        let mut scored: Vec<SimilarChunk> = mapped
            .into_iter()
            .filter_map(|chunk| {
                let embedding = chunk.embedding.as_deref()?;
                let distance = cosine_distance(query_embedding, embedding);
                Some(SimilarChunk { chunk, distance })
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
                .then_with(|| a.chunk.start_line.cmp(&b.chunk.start_line))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Deletes chunks for a repo whose hash is not in `retained_hashes`.
    ///
    /// Invoked only after a full successful index pass. Returns the
    /// number of pruned rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn prune_removed(
        &mut self,
        repo_id: Uuid,
        retained_hashes: &HashSet<String>,
    ) -> Result<usize> {
        let tx = self.conn.transaction().map_err(StorageError::from)?;
        let stale: Vec<String> = {
            let mut stmt = tx
                .prepare("SELECT chunk_hash FROM code_map WHERE repo_id = ?")
                .map_err(StorageError::from)?;
            let rows = stmt
                .query_map(params![repo_id.to_string()], |row| row.get::<_, String>(0))
                .map_err(StorageError::from)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(StorageError::from)?
                .into_iter()
                .filter(|h| !retained_hashes.contains(h))
                .collect()
        };
        {
            let mut del = tx
                .prepare("DELETE FROM code_map WHERE repo_id = ? AND chunk_hash = ?")
                .map_err(StorageError::from)?;
            for hash in &stale {
                del.execute(params![repo_id.to_string(), hash])
                    .map_err(StorageError::from)?;
            }
        }
        tx.commit().map_err(StorageError::from)?;
        Ok(stale.len())
    }

    // ==================== Regulation chunks ====================

    /// Upserts regulation chunks (keyed by `(rule_id, chunk_index)`).
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub fn upsert_regulation_chunks(&mut self, chunks: &[RegulationChunk]) -> Result<usize> {
        let now = now_ts();
        let tx = self.conn.transaction().map_err(StorageError::from)?;
        {
            let mut stmt = tx
                .prepare(
                    r"INSERT INTO regulation_chunks (
                        chunk_id, rule_id, rule_section, chunk_text, chunk_index,
                        chunk_hash, embedding, metadata, created_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT (rule_id, chunk_index) DO UPDATE SET
                        chunk_text = excluded.chunk_text,
                        chunk_hash = excluded.chunk_hash,
                        embedding = excluded.embedding,
                        metadata = excluded.metadata",
                )
                .map_err(StorageError::from)?;
            for chunk in chunks {
                stmt.execute(params![
                    chunk.chunk_id.to_string(),
                    chunk.rule_id,
                    chunk.rule_section,
                    chunk.chunk_text,
                    chunk.chunk_index as i64,
                    chunk.chunk_hash,
                    chunk.embedding.as_deref().map(encode_embedding),
                    serde_json::to_string(&chunk.metadata).map_err(StorageError::from)?,
                    now,
                ])
                .map_err(StorageError::from)?;
            }
        }
        tx.commit().map_err(StorageError::from)?;
        Ok(chunks.len())
    }

    /// Regulation chunks of a rule, in `chunk_index` order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn regulation_chunks_for_rule(&self, rule_id: &str) -> Result<Vec<RegulationChunk>> {
        let mut stmt = self
            .conn
            .prepare(
                r"SELECT chunk_id, rule_id, rule_section, chunk_text, chunk_index,
                         chunk_hash, embedding, metadata
                  FROM regulation_chunks WHERE rule_id = ? ORDER BY chunk_index",
            )
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map(params![rule_id], |row| {
                Ok(RegulationChunk {
                    chunk_id: get_uuid(row, 0)?,
                    rule_id: row.get(1)?,
                    rule_section: row.get(2)?,
                    chunk_text: row.get(3)?,
                    chunk_index: row.get::<_, i64>(4)? as usize,
                    chunk_hash: row.get(5)?,
                    embedding: get_embedding(row, 6)?,
                    metadata: get_json(row, 7)?,
                })
            })
            .map_err(StorageError::from)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)
            .map_err(Into::into)
    }

    // ==================== Cases ====================

    /// Inserts a new case.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert_case(&mut self, case: &Case) -> Result<()> {
        self.conn
            .execute(
                r"INSERT INTO cases (
                    case_id, repo_id, regulation_ids, status, current_step,
                    steps_completed, steps_pending, planner_result, navigator_result,
                    investigator_result, judge_result, remediator_result,
                    requires_approval, user_decision, jira_ticket_ids, error_message,
                    cancel_requested, started_at, updated_at, completed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params_from_iter(case_params(case)?),
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Fetches a case by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_case(&self, case_id: Uuid) -> Result<Option<Case>> {
        self.conn
            .query_row(
                &format!("SELECT {CASE_COLUMNS} FROM cases WHERE case_id = ?"),
                params![case_id.to_string()],
                row_to_case,
            )
            .optional()
            .map_err(StorageError::from)
            .map_err(Into::into)
    }

    /// Writes the full case row in one atomic update.
    ///
    /// Refuses to mutate a case whose stored status is terminal.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Terminal`] for terminal cases and
    /// [`StorageError::CaseNotFound`] for unknown ones.
    pub fn update_case(&mut self, case: &Case) -> Result<()> {
        self.guard_not_terminal(case.case_id)?;
        let updated = self
            .conn
            .execute(
                r"UPDATE cases SET
                    repo_id = ?2, regulation_ids = ?3, status = ?4, current_step = ?5,
                    steps_completed = ?6, steps_pending = ?7, planner_result = ?8,
                    navigator_result = ?9, investigator_result = ?10, judge_result = ?11,
                    remediator_result = ?12, requires_approval = ?13, user_decision = ?14,
                    jira_ticket_ids = ?15, error_message = ?16,
                    cancel_requested = MAX(cancel_requested, ?17),
                    started_at = ?18, updated_at = ?19, completed_at = ?20
                  WHERE case_id = ?1",
                rusqlite::params_from_iter(case_params(case)?),
            )
            .map_err(StorageError::from)?;
        if updated == 0 {
            return Err(StorageError::CaseNotFound {
                case_id: case.case_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Atomically replaces a case's findings and writes the case row.
    ///
    /// Used by the Judge step so a crash can never leave a partially
    /// written output blob: re-execution replaces, never appends.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Self::update_case`].
    pub fn update_case_with_findings(&mut self, case: &Case, findings: &[Finding]) -> Result<()> {
        self.guard_not_terminal(case.case_id)?;
        let tx = self.conn.transaction().map_err(StorageError::from)?;
        tx.execute(
            "DELETE FROM findings WHERE case_id = ?",
            params![case.case_id.to_string()],
        )
        .map_err(StorageError::from)?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO findings ({FINDING_COLUMNS}) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ))
                .map_err(StorageError::from)?;
            for finding in findings {
                stmt.execute(params![
                    finding.finding_id.to_string(),
                    finding.case_id.to_string(),
                    finding.rule_id,
                    finding.file_path,
                    finding.start_line as i64,
                    finding.end_line as i64,
                    finding.verdict.as_str(),
                    finding.severity.as_str(),
                    f64::from(finding.severity_score),
                    f64::from(finding.confidence),
                    finding.evidence,
                    finding.reasoning,
                    finding.remediation,
                    finding.status.as_str(),
                    finding.reviewer_note,
                    finding.reviewed_at,
                    finding.ticket_id,
                    finding.created_at,
                ])
                .map_err(StorageError::from)?;
            }
        }
        let updated = tx
            .execute(
                r"UPDATE cases SET
                    repo_id = ?2, regulation_ids = ?3, status = ?4, current_step = ?5,
                    steps_completed = ?6, steps_pending = ?7, planner_result = ?8,
                    navigator_result = ?9, investigator_result = ?10, judge_result = ?11,
                    remediator_result = ?12, requires_approval = ?13, user_decision = ?14,
                    jira_ticket_ids = ?15, error_message = ?16,
                    cancel_requested = MAX(cancel_requested, ?17),
                    started_at = ?18, updated_at = ?19, completed_at = ?20
                  WHERE case_id = ?1",
                rusqlite::params_from_iter(case_params(case)?),
            )
            .map_err(StorageError::from)?;
        if updated == 0 {
            return Err(StorageError::CaseNotFound {
                case_id: case.case_id.to_string(),
            }
            .into());
        }
        tx.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn guard_not_terminal(&self, case_id: Uuid) -> Result<()> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM cases WHERE case_id = ?",
                params![case_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;
        if let Some(raw) = status {
            if CaseStatus::parse(&raw).is_some_and(CaseStatus::is_terminal) {
                return Err(StorageError::Terminal {
                    entity: format!("case {case_id}"),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Sets the cooperative cancel flag; a no-op on terminal cases.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CaseNotFound`] for unknown cases.
    pub fn request_cancel(&mut self, case_id: Uuid) -> Result<()> {
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM cases WHERE case_id = ?",
                params![case_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;
        if exists.is_none() {
            return Err(StorageError::CaseNotFound {
                case_id: case_id.to_string(),
            }
            .into());
        }
        self.conn
            .execute(
                r"UPDATE cases SET cancel_requested = 1, updated_at = ?
                  WHERE case_id = ? AND status NOT IN ('completed', 'failed')",
                params![now_ts(), case_id.to_string()],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    // ==================== Findings ====================

    /// Findings of a case, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn findings_for_case(&self, case_id: Uuid) -> Result<Vec<Finding>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {FINDING_COLUMNS} FROM findings WHERE case_id = ? ORDER BY rowid"
            ))
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map(params![case_id.to_string()], row_to_finding)
            .map_err(StorageError::from)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)
            .map_err(Into::into)
    }

    /// Fetches a finding by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_finding(&self, finding_id: Uuid) -> Result<Option<Finding>> {
        self.conn
            .query_row(
                &format!("SELECT {FINDING_COLUMNS} FROM findings WHERE finding_id = ?"),
                params![finding_id.to_string()],
                row_to_finding,
            )
            .optional()
            .map_err(StorageError::from)
            .map_err(Into::into)
    }

    /// Records a ticket against a finding, first writer wins.
    ///
    /// Returns the winning ticket ID: the stored one when a ticket was
    /// already recorded, otherwise `ticket_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::FindingNotFound`] for unknown findings.
    pub fn record_ticket(&mut self, finding_id: Uuid, ticket_id: &str) -> Result<String> {
        let tx = self.conn.transaction().map_err(StorageError::from)?;
        let existing: Option<Option<String>> = tx
            .query_row(
                "SELECT ticket_id FROM findings WHERE finding_id = ?",
                params![finding_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::from)?;
        let Some(stored) = existing else {
            return Err(StorageError::FindingNotFound {
                finding_id: finding_id.to_string(),
            }
            .into());
        };
        if let Some(winner) = stored {
            return Ok(winner);
        }
        tx.execute(
            "UPDATE findings SET ticket_id = ? WHERE finding_id = ?",
            params![ticket_id, finding_id.to_string()],
        )
        .map_err(StorageError::from)?;
        tx.commit().map_err(StorageError::from)?;
        Ok(ticket_id.to_string())
    }

    /// Records a reviewer decision on a finding.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::FindingNotFound`] for unknown findings.
    pub fn review_finding(
        &mut self,
        finding_id: Uuid,
        status: FindingStatus,
        note: Option<&str>,
    ) -> Result<()> {
        let updated = self
            .conn
            .execute(
                r"UPDATE findings SET status = ?, reviewer_note = ?, reviewed_at = ?
                  WHERE finding_id = ?",
                params![status.as_str(), note, now_ts(), finding_id.to_string()],
            )
            .map_err(StorageError::from)?;
        if updated == 0 {
            return Err(StorageError::FindingNotFound {
                finding_id: finding_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    // ==================== Case logs ====================

    /// Appends one entry to a case's log stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails; callers treat log failures
    /// as advisory.
    pub fn append_log(&mut self, case_id: Uuid, entry: &LogEntry) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO case_logs (case_id, agent, message, timestamp) VALUES (?, ?, ?, ?)",
                params![
                    case_id.to_string(),
                    entry.agent,
                    entry.message,
                    entry.timestamp
                ],
            )
            .map_err(StorageError::from)?;
        Ok(())
    }

    /// Reads a case's log entries from `from_index` onward.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn read_logs(&self, case_id: Uuid, from_index: usize) -> Result<Vec<LogEntry>> {
        let mut stmt = self
            .conn
            .prepare(
                r"SELECT agent, message, timestamp FROM case_logs
                  WHERE case_id = ? ORDER BY id LIMIT -1 OFFSET ?",
            )
            .map_err(StorageError::from)?;
        let rows = stmt
            .query_map(params![case_id.to_string(), from_index as i64], |row| {
                Ok(LogEntry {
                    agent: row.get(0)?,
                    message: row.get(1)?,
                    timestamp: row.get(2)?,
                })
            })
            .map_err(StorageError::from)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StorageError::from)
            .map_err(Into::into)
    }

    /// Deletes logs of terminal cases older than `ttl_secs` past their
    /// completion. Returns the number of purged entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn purge_expired_logs(&mut self, ttl_secs: i64) -> Result<usize> {
        let purged = self
            .conn
            .execute(
                r"DELETE FROM case_logs WHERE case_id IN (
                    SELECT case_id FROM cases
                    WHERE status IN ('completed', 'failed')
                      AND completed_at IS NOT NULL
                      AND completed_at + ? < ?
                  )",
                params![ttl_secs, now_ts()],
            )
            .map_err(StorageError::from)?;
        Ok(purged)
    }
}

/// Builds the positional parameter vector shared by case insert/update.
fn case_params(case: &Case) -> Result<Vec<rusqlite::types::Value>> {
    use rusqlite::types::Value as V;

    let text = |s: String| V::Text(s);
    let opt_text = |o: Option<String>| o.map_or(V::Null, V::Text);

    Ok(vec![
        text(case.case_id.to_string()),
        text(case.repo_id.to_string()),
        text(serde_json::to_string(&case.regulation_ids).map_err(StorageError::from)?),
        text(case.status.as_str().to_string()),
        opt_text(case.current_step.map(|s| s.as_str().to_string())),
        text(serde_json::to_string(&case.steps_completed).map_err(StorageError::from)?),
        text(serde_json::to_string(&case.steps_pending).map_err(StorageError::from)?),
        opt_text(opt_json(case.planner_result.as_ref())?),
        opt_text(opt_json(case.navigator_result.as_ref())?),
        opt_text(opt_json(case.investigator_result.as_ref())?),
        opt_text(opt_json(case.judge_result.as_ref())?),
        opt_text(opt_json(case.remediator_result.as_ref())?),
        V::Integer(i64::from(case.requires_approval)),
        opt_text(case.user_decision.map(|d| d.as_str().to_string())),
        text(serde_json::to_string(&case.jira_ticket_ids).map_err(StorageError::from)?),
        opt_text(case.error_message.clone()),
        V::Integer(i64::from(case.cancel_requested)),
        V::Integer(case.started_at),
        V::Integer(case.updated_at),
        case.completed_at.map_or(V::Null, V::Integer),
    ])
}

fn opt_json(value: Option<&serde_json::Value>) -> Result<Option<String>> {
    value
        .map(|v| serde_json::to_string(v).map_err(StorageError::from))
        .transpose()
        .map_err(Into::into)
}
