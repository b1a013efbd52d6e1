//! Transport-neutral core API.
//!
//! [`Service`] is the dependency bundle for the whole engine: it owns
//! the shared store, the queue, the indexer, and the orchestrator, and
//! exposes the operations an HTTP layer would map endpoints onto.
//! Construction happens once at the process entry point; no component
//! reaches for a global.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::audit::{Orchestrator, RemediationTask};
use crate::config::Config;
use crate::error::{Error, QueueError, Result, StorageError};
use crate::index::IndexerWorker;
use crate::model::{
    AuditJobPayload, Case, FindingStatus, IndexJobPayload, Job, JobType, LogEntry, Repo,
    UserDecision,
};
use crate::prompts::PromptSet;
use crate::provider::{EnrichmentCache, Providers, RateLimiter};
use crate::queue::{JobHandler, JobQueue};
use crate::store::SharedStore;

/// The engine's service facade and dependency bundle.
pub struct Service {
    config: Config,
    store: SharedStore,
    queue: JobQueue,
    indexer: IndexerWorker,
    orchestrator: Orchestrator,
}

impl Service {
    /// Wires up the engine over a store and collaborator bundle.
    #[must_use]
    pub fn new(config: Config, store: SharedStore, providers: Providers) -> Self {
        let prompts = PromptSet::load(None);
        Self::with_prompts(config, store, providers, prompts)
    }

    /// Wires up the engine with an explicit prompt set.
    #[must_use]
    pub fn with_prompts(
        config: Config,
        store: SharedStore,
        providers: Providers,
        prompts: PromptSet,
    ) -> Self {
        let cache = Arc::new(EnrichmentCache::new(
            std::time::Duration::from_secs(config.cache_ttl_embeddings_secs),
            std::time::Duration::from_secs(config.cache_ttl_summary_secs),
        ));
        let embed_limiter = Arc::new(RateLimiter::per_minute(config.rate_limit_embeddings));
        let llm_limiter = Arc::new(RateLimiter::per_minute(config.rate_limit_llm));

        let queue = JobQueue::new(Arc::clone(&store));
        let indexer = IndexerWorker::new(
            Arc::clone(&store),
            providers.clone(),
            Arc::clone(&cache),
            Arc::clone(&embed_limiter),
            Arc::clone(&llm_limiter),
            prompts.clone(),
            config.clone(),
        );
        let orchestrator = Orchestrator::new(
            Arc::clone(&store),
            providers,
            cache,
            embed_limiter,
            llm_limiter,
            prompts,
            config.clone(),
        );

        Self {
            config,
            store,
            queue,
            indexer,
            orchestrator,
        }
    }

    /// The underlying queue, for wiring the worker pool.
    #[must_use]
    pub const fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Registers a repository (webhook installation or API call).
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn register_repo(&self, repo: &Repo) -> Result<()> {
        let mut store = self.store.lock().await;
        store.insert_repo(repo)
    }

    /// Enqueues an index job for a repository.
    ///
    /// `changed_files` switches the job into delta mode; `commit_sha`
    /// pins the checkout.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::RepoNotFound`] for unknown repositories.
    pub async fn request_index(
        &self,
        repo_id: Uuid,
        commit_sha: Option<String>,
        changed_files: Option<Vec<String>>,
    ) -> Result<Uuid> {
        {
            let store = self.store.lock().await;
            store.get_repo(repo_id)?.ok_or(StorageError::RepoNotFound {
                repo_id: repo_id.to_string(),
            })?;
        }
        let payload = IndexJobPayload {
            repo_id,
            commit_sha,
            changed_files,
        };
        self.queue
            .enqueue(
                JobType::Index,
                serde_json::to_value(&payload)?,
                self.config.job_timeout_secs,
                self.config.max_job_retries,
            )
            .await
    }

    /// Creates an audit case and enqueues its job.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown repositories or an empty
    /// regulation set.
    pub async fn start_audit(&self, repo_id: Uuid, regulation_ids: Vec<String>) -> Result<Uuid> {
        if regulation_ids.is_empty() {
            return Err(Error::invalid_input("regulation_ids must not be empty"));
        }
        let case = {
            let mut store = self.store.lock().await;
            store.get_repo(repo_id)?.ok_or(StorageError::RepoNotFound {
                repo_id: repo_id.to_string(),
            })?;
            let case = Case::new(repo_id, regulation_ids);
            store.insert_case(&case)?;
            case
        };

        let payload = AuditJobPayload {
            case_id: case.case_id,
        };
        self.queue
            .enqueue(
                JobType::Audit,
                serde_json::to_value(&payload)?,
                self.config.job_timeout_secs,
                self.config.max_job_retries,
            )
            .await?;
        Ok(case.case_id)
    }

    /// Full state of a case.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CaseNotFound`] for unknown cases.
    pub async fn case_state(&self, case_id: Uuid) -> Result<Case> {
        let store = self.store.lock().await;
        store.get_case(case_id)?.ok_or_else(|| {
            StorageError::CaseNotFound {
                case_id: case_id.to_string(),
            }
            .into()
        })
    }

    /// Applies the human decision to a paused case.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::resume`].
    pub async fn resume(
        &self,
        case_id: Uuid,
        decision: UserDecision,
        edited_tasks: Option<Vec<RemediationTask>>,
    ) -> Result<Case> {
        self.orchestrator.resume(case_id, decision, edited_tasks).await
    }

    /// Reads a case's agent log from `from_index` onward.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub async fn case_logs(&self, case_id: Uuid, from_index: usize) -> Result<Vec<LogEntry>> {
        let store = self.store.lock().await;
        store.read_logs(case_id, from_index)
    }

    /// Current state of a job.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::JobNotFound`] for unknown jobs.
    pub async fn job_status(&self, job_id: Uuid) -> Result<Job> {
        self.queue.status(job_id).await
    }

    /// Requests cooperative cancellation of a case.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CaseNotFound`] for unknown cases.
    pub async fn cancel_case(&self, case_id: Uuid) -> Result<()> {
        let mut store = self.store.lock().await;
        store.request_cancel(case_id)
    }

    /// Records a reviewer decision on a finding.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::FindingNotFound`] for unknown findings.
    pub async fn review_finding(
        &self,
        finding_id: Uuid,
        status: FindingStatus,
        note: Option<&str>,
    ) -> Result<()> {
        let mut store = self.store.lock().await;
        store.review_finding(finding_id, status, note)
    }
}

#[async_trait]
impl JobHandler for Service {
    async fn handle(&self, job: &Job) -> Result<Value> {
        match job.job_type {
            JobType::Index => {
                let payload: IndexJobPayload =
                    serde_json::from_value(job.payload.clone()).map_err(|e| {
                        Error::Queue(QueueError::InvalidPayload(e.to_string()))
                    })?;
                let outcome = self.indexer.run(&payload).await?;
                Ok(serde_json::to_value(outcome)?)
            }
            JobType::Audit => {
                let payload: AuditJobPayload =
                    serde_json::from_value(job.payload.clone()).map_err(|e| {
                        Error::Queue(QueueError::InvalidPayload(e.to_string()))
                    })?;
                self.orchestrator.run_case(payload.case_id).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::{
        AccessToken, ChatMessage, EmbeddingProvider, LlmProvider, RepoSource, TicketingSystem,
        TokenSource,
    };
    use crate::store::{shared, SqliteStore};
    use std::path::Path;

    struct NullEmbed;
    #[async_trait]
    impl EmbeddingProvider for NullEmbed {
        fn dimensions(&self) -> usize {
            4
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; 4])
        }
    }

    struct NullLlm;
    #[async_trait]
    impl LlmProvider for NullLlm {
        fn name(&self) -> &'static str {
            "null"
        }
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String> {
            Ok(String::new())
        }
    }

    struct NullTickets;
    #[async_trait]
    impl TicketingSystem for NullTickets {
        async fn create_issue(
            &self,
            _project: &str,
            _title: &str,
            _body: &str,
            _priority: &str,
        ) -> Result<String> {
            Ok("COMP-0".into())
        }
    }

    struct NullRepoSource;
    #[async_trait]
    impl RepoSource for NullRepoSource {
        async fn clone_repo(
            &self,
            _full_name: &str,
            _credential: &str,
            _commit_sha: Option<&str>,
            _dest: &Path,
        ) -> Result<String> {
            Err(Error::Provider(ProviderError::Git {
                action: "clone",
                detail: "not wired in unit tests".into(),
            }))
        }
    }

    struct NullTokens;
    #[async_trait]
    impl TokenSource for NullTokens {
        async fn mint(&self, _installation_id: i64) -> Result<AccessToken> {
            Ok(AccessToken {
                secret: "t".into(),
                expires_at: i64::MAX,
            })
        }
    }

    fn null_providers() -> Providers {
        Providers {
            embeddings: Arc::new(NullEmbed),
            llm: Arc::new(NullLlm),
            tickets: Arc::new(NullTickets),
            repos: Arc::new(NullRepoSource),
            tokens: Arc::new(NullTokens),
        }
    }

    fn test_service() -> (Service, Repo) {
        let mut store = SqliteStore::in_memory().unwrap();
        store.init().unwrap();
        let repo = Repo::new(1, 1, "acme/pay", "main");
        store.insert_repo(&repo).unwrap();
        let config = Config {
            embedding_dimension: 4,
            ..Config::default()
        };
        (
            Service::with_prompts(config, shared(store), null_providers(), PromptSet::defaults()),
            repo,
        )
    }

    #[tokio::test]
    async fn test_request_index_enqueues_job() {
        let (service, repo) = test_service();
        let job_id = service
            .request_index(repo.repo_id, None, None)
            .await
            .unwrap();
        let job = service.job_status(job_id).await.unwrap();
        assert_eq!(job.job_type, JobType::Index);
        assert_eq!(job.status, crate::model::JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_request_index_unknown_repo() {
        let (service, _) = test_service();
        assert!(service
            .request_index(Uuid::new_v4(), None, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_start_audit_creates_case_and_job() {
        let (service, repo) = test_service();
        let case_id = service
            .start_audit(repo.repo_id, vec!["RBI-1".into()])
            .await
            .unwrap();
        let case = service.case_state(case_id).await.unwrap();
        assert_eq!(case.repo_id, repo.repo_id);
        assert_eq!(case.status, crate::model::CaseStatus::Pending);
        assert_eq!(case.steps_pending.len(), 5);
    }

    #[tokio::test]
    async fn test_start_audit_rejects_empty_rules() {
        let (service, repo) = test_service();
        let err = service.start_audit(repo.repo_id, vec![]).await.unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::InputInvalid);
    }

    #[tokio::test]
    async fn test_handle_rejects_malformed_payload() {
        let (service, _) = test_service();
        let job = Job::new(JobType::Index, serde_json::json!({"nope": 1}), 60, 0);
        let err = service.handle(&job).await.unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::InputInvalid);
    }

    #[tokio::test]
    async fn test_cancel_case() {
        let (service, repo) = test_service();
        let case_id = service
            .start_audit(repo.repo_id, vec!["RBI-1".into()])
            .await
            .unwrap();
        service.cancel_case(case_id).await.unwrap();
        assert!(service.case_state(case_id).await.unwrap().cancel_requested);
    }
}
