//! Database schema definitions.
//!
//! Contains SQL schema and migration logic for the engine's `SQLite`
//! database: the code map, regulation chunks, the job queue, audit
//! cases, findings, and case logs.

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// SQL schema for initial database setup.
pub const SCHEMA_SQL: &str = r"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Tracked repositories
CREATE TABLE IF NOT EXISTS repos (
    repo_id TEXT PRIMARY KEY,
    github_id INTEGER NOT NULL,
    installation_id INTEGER NOT NULL,
    full_name TEXT NOT NULL,
    default_branch TEXT NOT NULL,
    last_commit_sha TEXT,
    indexed_file_count INTEGER NOT NULL DEFAULT 0,
    total_chunks INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    last_synced_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_repos_full_name ON repos(full_name);

-- The code map: embedded semantic chunks per repository
CREATE TABLE IF NOT EXISTS code_map (
    chunk_id TEXT PRIMARY KEY,
    repo_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    language TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    chunk_text TEXT NOT NULL,
    ast_node_type TEXT,
    file_hash TEXT NOT NULL,
    chunk_hash TEXT NOT NULL,
    embedding BLOB,  -- f32 array, little-endian
    nl_summary TEXT,
    call_links TEXT NOT NULL DEFAULT '[]',      -- JSON array
    variables TEXT NOT NULL DEFAULT '{}',       -- JSON object
    config_keys TEXT NOT NULL DEFAULT '{}',     -- JSON object
    semantic_tags TEXT NOT NULL DEFAULT '[]',   -- JSON array
    previous_hash TEXT,
    delta_type TEXT NOT NULL DEFAULT 'added',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (repo_id, chunk_hash),
    FOREIGN KEY (repo_id) REFERENCES repos(repo_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_code_map_repo ON code_map(repo_id);
CREATE INDEX IF NOT EXISTS idx_code_map_file ON code_map(repo_id, file_path);

-- Pre-chunked regulation text (supplied by the ingestion collaborator)
CREATE TABLE IF NOT EXISTS regulation_chunks (
    chunk_id TEXT PRIMARY KEY,
    rule_id TEXT NOT NULL,
    rule_section TEXT,
    chunk_text TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    chunk_hash TEXT NOT NULL,
    embedding BLOB,
    metadata TEXT NOT NULL DEFAULT 'null',
    created_at INTEGER NOT NULL,
    UNIQUE (rule_id, chunk_index)
);

CREATE INDEX IF NOT EXISTS idx_regulation_rule ON regulation_chunks(rule_id);

-- Background job queue
CREATE TABLE IF NOT EXISTS jobs (
    job_id TEXT PRIMARY KEY,
    job_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    retries INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    timeout_secs INTEGER NOT NULL,
    available_at INTEGER NOT NULL,
    lease_expires_at INTEGER,
    worker_id TEXT,
    result TEXT,
    error TEXT,
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    completed_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_jobs_lease ON jobs(status, available_at);

-- Audit cases (durable workflow state)
CREATE TABLE IF NOT EXISTS cases (
    case_id TEXT PRIMARY KEY,
    repo_id TEXT NOT NULL,
    regulation_ids TEXT NOT NULL,      -- JSON array
    status TEXT NOT NULL DEFAULT 'pending',
    current_step TEXT,
    steps_completed TEXT NOT NULL DEFAULT '[]',
    steps_pending TEXT NOT NULL,
    planner_result TEXT,
    navigator_result TEXT,
    investigator_result TEXT,
    judge_result TEXT,
    remediator_result TEXT,
    requires_approval INTEGER NOT NULL DEFAULT 0,
    user_decision TEXT,
    jira_ticket_ids TEXT NOT NULL DEFAULT '[]',
    error_message TEXT,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    started_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    completed_at INTEGER,
    FOREIGN KEY (repo_id) REFERENCES repos(repo_id)
);

-- Findings owned by cases
CREATE TABLE IF NOT EXISTS findings (
    finding_id TEXT PRIMARY KEY,
    case_id TEXT NOT NULL,
    rule_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    verdict TEXT NOT NULL,
    severity TEXT NOT NULL,
    severity_score REAL NOT NULL,
    confidence REAL NOT NULL,
    evidence TEXT NOT NULL DEFAULT '',
    reasoning TEXT NOT NULL DEFAULT '',
    remediation TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    reviewer_note TEXT,
    reviewed_at INTEGER,
    ticket_id TEXT,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (case_id) REFERENCES cases(case_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_findings_case ON findings(case_id);

-- Append-only per-case agent log stream
CREATE TABLE IF NOT EXISTS case_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    case_id TEXT NOT NULL,
    agent TEXT NOT NULL,
    message TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_case_logs_case ON case_logs(case_id, id);
";

/// SQL to check if schema is initialized.
pub const CHECK_SCHEMA_SQL: &str = r"
SELECT COUNT(*) FROM sqlite_master
WHERE type='table' AND name='schema_info';
";

/// SQL to get schema version.
pub const GET_VERSION_SQL: &str = r"
SELECT value FROM schema_info WHERE key = 'version';
";

/// SQL to set schema version.
pub const SET_VERSION_SQL: &str = r"
INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?);
";

/// Migrations from older schema versions.
pub struct Migration {
    /// Version this migration upgrades from.
    pub from_version: u32,
    /// Version this migration upgrades to.
    pub to_version: u32,
    /// SQL statements to execute.
    pub sql: &'static str,
}

/// Available migrations.
pub const MIGRATIONS: &[Migration] = &[];

/// Gets migrations needed to upgrade from a version.
#[must_use]
pub fn get_migrations_from(current_version: u32) -> Vec<&'static Migration> {
    MIGRATIONS
        .iter()
        .filter(|m| m.from_version >= current_version && m.to_version <= CURRENT_SCHEMA_VERSION)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_version() {
        const _: () = assert!(CURRENT_SCHEMA_VERSION >= 1);
    }

    #[test]
    fn test_schema_sql_covers_all_tables() {
        for table in [
            "repos",
            "code_map",
            "regulation_chunks",
            "jobs",
            "cases",
            "findings",
            "case_logs",
        ] {
            assert!(
                SCHEMA_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
                "schema missing table {table}"
            );
        }
    }

    #[test]
    fn test_code_map_natural_key() {
        assert!(SCHEMA_SQL.contains("UNIQUE (repo_id, chunk_hash)"));
    }

    #[test]
    fn test_get_migrations_from() {
        assert!(get_migrations_from(CURRENT_SCHEMA_VERSION).is_empty());
    }
}
