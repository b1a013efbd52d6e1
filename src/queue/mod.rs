//! Background job queue.
//!
//! At-least-once delivery over the shared store: `enqueue` → `lease` →
//! `complete`/`fail`, with lease expiry reclaim and exponential retry
//! backoff (base 2 s, factor 2, cap 10 s). Results are retained 24 h,
//! failures 7 d. Workers make their side effects idempotent on natural
//! keys, so a re-leased job is safe to re-run.

pub mod worker;

pub use worker::{JobHandler, WorkerPool};

use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{QueueError, Result, StorageError};
use crate::model::{now_ts, Job, JobStatus, JobType};
use crate::provider::retry::backoff_delay;
use crate::store::{SharedStore, SqliteStore};

/// How long completed-job results are retained, in seconds.
pub const RESULT_TTL_SECS: i64 = 86_400;

/// How long failed jobs are retained, in seconds.
pub const FAILURE_TTL_SECS: i64 = 604_800;

/// Handle to the job queue.
#[derive(Clone)]
pub struct JobQueue {
    store: SharedStore,
}

impl JobQueue {
    /// Creates a queue over the shared store.
    #[must_use]
    pub const fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Enqueues a job and returns its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn enqueue(
        &self,
        job_type: JobType,
        payload: Value,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Uuid> {
        let job = Job::new(job_type, payload, timeout_secs, max_retries);
        let store = self.store.lock().await;
        insert_job(&store, &job)?;
        tracing::info!(job_id = %job.job_id, job_type = job_type.as_str(), "job enqueued");
        Ok(job.job_id)
    }

    /// Atomically takes the next available job of the given types.
    ///
    /// A job is available when it is queued with its backoff elapsed, or
    /// running with an expired lease (the previous worker is presumed
    /// lost). Returns `None` when nothing is available.
    ///
    /// # Errors
    ///
    /// Returns an error if the take fails.
    pub async fn lease(&self, worker_id: &str, types: &[JobType]) -> Result<Option<Job>> {
        let mut store = self.store.lock().await;
        lease_job(&mut store, worker_id, types)
    }

    /// Completes a job with its result blob.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AlreadyTerminal`] for terminal jobs and
    /// [`QueueError::JobNotFound`] for unknown ones.
    pub async fn complete(&self, job_id: Uuid, result: Value) -> Result<()> {
        let store = self.store.lock().await;
        let job = get_job(&store, job_id)?.ok_or(QueueError::JobNotFound {
            job_id: job_id.to_string(),
        })?;
        if job.status.is_terminal() {
            return Err(QueueError::AlreadyTerminal {
                job_id: job_id.to_string(),
                status: job.status.as_str().to_string(),
            }
            .into());
        }
        store
            .conn()
            .execute(
                r"UPDATE jobs SET status = 'completed', result = ?, error = NULL,
                    lease_expires_at = NULL, worker_id = NULL, completed_at = ?
                  WHERE job_id = ?",
                params![
                    serde_json::to_string(&result).map_err(StorageError::from)?,
                    now_ts(),
                    job_id.to_string()
                ],
            )
            .map_err(StorageError::from)?;
        tracing::info!(job_id = %job_id, "job completed");
        Ok(())
    }

    /// Fails a job.
    ///
    /// Retryable failures requeue with backoff while `retries <
    /// max_retries`; anything else (or an exhausted budget) is terminal.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::AlreadyTerminal`] for terminal jobs and
    /// [`QueueError::JobNotFound`] for unknown ones.
    pub async fn fail(&self, job_id: Uuid, error: &str, retryable: bool) -> Result<()> {
        let store = self.store.lock().await;
        let job = get_job(&store, job_id)?.ok_or(QueueError::JobNotFound {
            job_id: job_id.to_string(),
        })?;
        if job.status.is_terminal() {
            return Err(QueueError::AlreadyTerminal {
                job_id: job_id.to_string(),
                status: job.status.as_str().to_string(),
            }
            .into());
        }

        if retryable && job.retries < job.max_retries {
            let attempt = job.retries + 1;
            let delay = backoff_delay(attempt);
            store
                .conn()
                .execute(
                    r"UPDATE jobs SET status = 'queued', retries = ?, error = ?,
                        available_at = ?, lease_expires_at = NULL, worker_id = NULL
                      WHERE job_id = ?",
                    params![
                        attempt,
                        error,
                        now_ts() + delay.as_secs() as i64,
                        job_id.to_string()
                    ],
                )
                .map_err(StorageError::from)?;
            tracing::warn!(job_id = %job_id, attempt, error, "job requeued");
        } else {
            store
                .conn()
                .execute(
                    r"UPDATE jobs SET status = 'failed', error = ?,
                        lease_expires_at = NULL, worker_id = NULL, completed_at = ?
                      WHERE job_id = ?",
                    params![error, now_ts(), job_id.to_string()],
                )
                .map_err(StorageError::from)?;
            tracing::error!(job_id = %job_id, error, "job failed terminally");
        }
        Ok(())
    }

    /// Fetches a job's current state.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::JobNotFound`] for unknown jobs.
    pub async fn status(&self, job_id: Uuid) -> Result<Job> {
        let store = self.store.lock().await;
        get_job(&store, job_id)?
            .ok_or(QueueError::JobNotFound {
                job_id: job_id.to_string(),
            })
            .map_err(Into::into)
    }

    /// Deletes terminal jobs past their retention TTLs.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn purge_expired(&self) -> Result<usize> {
        let store = self.store.lock().await;
        let now = now_ts();
        let purged = store
            .conn()
            .execute(
                r"DELETE FROM jobs WHERE
                    (status = 'completed' AND completed_at IS NOT NULL AND completed_at + ? < ?)
                 OR (status = 'failed' AND completed_at IS NOT NULL AND completed_at + ? < ?)",
                params![RESULT_TTL_SECS, now, FAILURE_TTL_SECS, now],
            )
            .map_err(StorageError::from)?;
        Ok(purged)
    }
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let conv = |m: String| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, m.into())
    };
    let id_raw: String = row.get(0)?;
    let type_raw: String = row.get(1)?;
    let payload_raw: String = row.get(2)?;
    let status_raw: String = row.get(3)?;
    let result_raw: Option<String> = row.get(10)?;

    Ok(Job {
        job_id: id_raw
            .parse()
            .map_err(|e: uuid::Error| conv(e.to_string()))?,
        job_type: JobType::parse(&type_raw)
            .ok_or_else(|| conv(format!("unknown job type: {type_raw}")))?,
        payload: serde_json::from_str(&payload_raw).map_err(|e| conv(e.to_string()))?,
        status: JobStatus::parse(&status_raw)
            .ok_or_else(|| conv(format!("unknown job status: {status_raw}")))?,
        retries: row.get(4)?,
        max_retries: row.get(5)?,
        timeout_secs: row.get::<_, i64>(6)?.max(0) as u64,
        available_at: row.get(7)?,
        lease_expires_at: row.get(8)?,
        worker_id: row.get(9)?,
        result: result_raw
            .map(|s| serde_json::from_str(&s).map_err(|e| conv(e.to_string())))
            .transpose()?,
        error: row.get(11)?,
        created_at: row.get(12)?,
        started_at: row.get(13)?,
        completed_at: row.get(14)?,
    })
}

const JOB_COLUMNS: &str = "job_id, job_type, payload, status, retries, max_retries, \
     timeout_secs, available_at, lease_expires_at, worker_id, result, error, \
     created_at, started_at, completed_at";

fn insert_job(store: &SqliteStore, job: &Job) -> Result<()> {
    store
        .conn()
        .execute(
            &format!(
                "INSERT INTO jobs ({JOB_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                job.job_id.to_string(),
                job.job_type.as_str(),
                serde_json::to_string(&job.payload).map_err(StorageError::from)?,
                job.status.as_str(),
                job.retries,
                job.max_retries,
                job.timeout_secs as i64,
                job.available_at,
                job.lease_expires_at,
                job.worker_id,
                job.result
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .map_err(StorageError::from)?,
                job.error,
                job.created_at,
                job.started_at,
                job.completed_at,
            ],
        )
        .map_err(StorageError::from)?;
    Ok(())
}

fn get_job(store: &SqliteStore, job_id: Uuid) -> Result<Option<Job>> {
    store
        .conn()
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?"),
            params![job_id.to_string()],
            row_to_job,
        )
        .optional()
        .map_err(StorageError::from)
        .map_err(Into::into)
}

fn lease_job(store: &mut SqliteStore, worker_id: &str, types: &[JobType]) -> Result<Option<Job>> {
    let now = now_ts();
    let type_filter = if types.is_empty() {
        String::new()
    } else {
        let list = types
            .iter()
            .map(|t| format!("'{}'", t.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        format!(" AND job_type IN ({list})")
    };

    let tx = store.conn_mut().transaction().map_err(StorageError::from)?;
    let candidate: Option<Job> = tx
        .query_row(
            &format!(
                "SELECT {JOB_COLUMNS} FROM jobs
                 WHERE ((status = 'queued' AND available_at <= ?1)
                     OR (status = 'running' AND lease_expires_at IS NOT NULL
                         AND lease_expires_at < ?1)){type_filter}
                 ORDER BY created_at
                 LIMIT 1"
            ),
            params![now],
            row_to_job,
        )
        .optional()
        .map_err(StorageError::from)?;

    let Some(mut job) = candidate else {
        return Ok(None);
    };

    let lease_expires = now + job.timeout_secs as i64;
    tx.execute(
        r"UPDATE jobs SET status = 'running', worker_id = ?, lease_expires_at = ?,
            started_at = COALESCE(started_at, ?)
          WHERE job_id = ?",
        params![worker_id, lease_expires, now, job.job_id.to_string()],
    )
    .map_err(StorageError::from)?;
    tx.commit().map_err(StorageError::from)?;

    job.status = JobStatus::Running;
    job.worker_id = Some(worker_id.to_string());
    job.lease_expires_at = Some(lease_expires);
    job.started_at = Some(job.started_at.unwrap_or(now));
    tracing::debug!(job_id = %job.job_id, worker_id, "job leased");
    Ok(Some(job))
}
