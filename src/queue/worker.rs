//! Background worker pool.
//!
//! A pool of tokio tasks, each owning one leased job at a time. Jobs
//! dispatch through a [`JobHandler`]; transient failures go back to the
//! queue for retry, anything else fails terminally. Shutdown is
//! cooperative: workers finish their current job and exit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use super::JobQueue;
use crate::error::{ErrorClass, Result};
use crate::model::{Job, JobType};

/// Executes one leased job to completion.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs the job and returns its result blob.
    ///
    /// # Errors
    ///
    /// Returns an error classified for retry policy: transient errors
    /// requeue, everything else fails the job terminally.
    async fn handle(&self, job: &Job) -> Result<Value>;
}

/// Pool of background workers draining the queue.
pub struct WorkerPool {
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    worker_count: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    /// Creates a pool with the given parallelism.
    #[must_use]
    pub fn new(queue: JobQueue, handler: Arc<dyn JobHandler>, worker_count: usize) -> Self {
        Self {
            queue,
            handler,
            worker_count: worker_count.max(1),
            poll_interval: Duration::from_millis(500),
        }
    }

    /// Overrides the idle poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Runs the pool until `shutdown` flips to `true`.
    ///
    /// Every worker drains one job at a time; a maintenance task purges
    /// expired job results on a fixed cadence. Returns once all workers
    /// have exited.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker task panics.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut handles = Vec::with_capacity(self.worker_count + 1);

        for i in 0..self.worker_count {
            let queue = self.queue.clone();
            let handler = Arc::clone(&self.handler);
            let mut stop = shutdown.clone();
            let poll = self.poll_interval;
            let worker_id = format!("worker-{i}");

            handles.push(tokio::spawn(async move {
                tracing::info!(%worker_id, "worker started");
                loop {
                    if *stop.borrow() {
                        break;
                    }
                    match queue.lease(&worker_id, &[JobType::Index, JobType::Audit]).await {
                        Ok(Some(job)) => {
                            run_one(&queue, handler.as_ref(), &worker_id, &job).await;
                        }
                        Ok(None) => {
                            // Idle: wait for work or shutdown
                            tokio::select! {
                                _ = tokio::time::sleep(poll) => {}
                                _ = stop.changed() => {}
                            }
                        }
                        Err(e) => {
                            tracing::error!(%worker_id, error = %e, "lease failed");
                            tokio::time::sleep(poll).await;
                        }
                    }
                }
                tracing::info!(%worker_id, "worker stopped");
            }));
        }

        // Maintenance: purge expired results on a slow cadence
        {
            let queue = self.queue.clone();
            let mut stop = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(60)) => {
                            if let Err(e) = queue.purge_expired().await {
                                tracing::warn!(error = %e, "job purge failed");
                            }
                        }
                        _ = stop.changed() => {}
                    }
                    if *stop.borrow() {
                        break;
                    }
                }
            }));
        }

        for handle in handles {
            handle.await.map_err(|e| {
                crate::error::Error::Config {
                    message: format!("worker task panicked: {e}"),
                }
            })?;
        }
        Ok(())
    }
}

/// Runs a single job and records its outcome on the queue.
async fn run_one(queue: &JobQueue, handler: &dyn JobHandler, worker_id: &str, job: &Job) {
    tracing::info!(worker_id, job_id = %job.job_id, job_type = job.job_type.as_str(), "job started");
    match handler.handle(job).await {
        Ok(result) => {
            if let Err(e) = queue.complete(job.job_id, result).await {
                tracing::error!(job_id = %job.job_id, error = %e, "complete failed");
            }
        }
        Err(err) => {
            let retryable = err.class() == ErrorClass::Transient;
            tracing::warn!(job_id = %job.job_id, error = %err, retryable, "job errored");
            if let Err(e) = queue.fail(job.job_id, &err.to_string(), retryable).await {
                tracing::error!(job_id = %job.job_id, error = %e, "fail recording failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ProviderError};
    use crate::model::JobStatus;
    use crate::store::{shared, SqliteStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedHandler {
        calls: AtomicU32,
        fail_first: bool,
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        async fn handle(&self, _job: &Job) -> Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(Error::Provider(ProviderError::Upstream {
                    operation: "embed",
                    reason: "503".into(),
                }));
            }
            Ok(json!({"ok": true}))
        }
    }

    fn test_queue() -> JobQueue {
        let mut store = SqliteStore::in_memory().unwrap();
        store.init().unwrap();
        JobQueue::new(shared(store))
    }

    #[tokio::test]
    async fn test_pool_drains_and_shuts_down() {
        let queue = test_queue();
        let job_id = queue.enqueue(JobType::Index, json!({}), 60, 0).await.unwrap();

        let handler = Arc::new(ScriptedHandler {
            calls: AtomicU32::new(0),
            fail_first: false,
        });
        let pool = WorkerPool::new(queue.clone(), handler.clone(), 2)
            .with_poll_interval(Duration::from_millis(10));

        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(async move { pool.run(rx).await });

        // Wait for the job to finish, then stop the pool
        for _ in 0..100 {
            if queue.status(job_id).await.unwrap().status == JobStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        run.await.unwrap().unwrap();

        let job = queue.status(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"ok": true})));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_requeues() {
        let queue = test_queue();
        let job_id = queue.enqueue(JobType::Index, json!({}), 60, 3).await.unwrap();

        let handler = Arc::new(ScriptedHandler {
            calls: AtomicU32::new(0),
            fail_first: true,
        });
        let leased = queue.lease("w0", &[]).await.unwrap().unwrap();
        run_one(&queue, handler.as_ref(), "w0", &leased).await;

        let job = queue.status(job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.retries, 1);
    }
}
