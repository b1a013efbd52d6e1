//! The staged audit orchestrator.
//!
//! Drives a case through the five-agent workflow (Planner → Navigator →
//! Investigator → Judge → Remediator) with durable per-step commits:
//! after each step the case row — `steps_completed`, `current_step`,
//! and the step's result blob — is written in one transaction, so a
//! crashed worker resumes from the last completed step and never
//! recomputes persisted outputs. The Remediator pauses the case at
//! `waiting_approval`; `resume` applies the human decision.
//!
//! Cancellation is cooperative: the flag is observed at step
//! boundaries, since an issued LLM call cannot be recalled.

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use super::agents::{
    aggregate_verdict, parse_plan, ControlStatus, InvestigationItem, InvestigatorResult,
    NavigationEntry, NavigatorHit, NavigatorResult, PlanEntry, PlannerResult,
};
use super::logstream::CaseLogger;
use super::remediate::{build_tasks, RemediationTask, Remediator, RemediatorResult};
use crate::adjudicate::Adjudicator;
use crate::config::{Config, Timeouts};
use crate::error::{AuditError, Error, ErrorClass, Result, StorageError};
use crate::model::{
    now_ts, AuditStep, Case, CaseStatus, Finding, FindingStatus, UserDecision, Verdict,
};
use crate::prompts::{build_planner_prompt, build_scan_summary_prompt, FindingLine, PromptSet};
use crate::provider::{
    with_retry, with_timeout, ChatMessage, EnrichmentCache, Providers, RateLimiter,
};
use crate::retrieve::{gate_by_similarity, Retriever};
use crate::store::SharedStore;

/// Cap on adjudicated hits per case.
pub const MAX_INVESTIGATIONS: usize = 10;

/// The staged audit orchestrator.
pub struct Orchestrator {
    store: SharedStore,
    providers: Providers,
    retriever: Retriever,
    adjudicator: Adjudicator,
    remediator: Remediator,
    cache: Arc<EnrichmentCache>,
    embed_limiter: Arc<RateLimiter>,
    llm_limiter: Arc<RateLimiter>,
    prompts: PromptSet,
    config: Config,
    timeouts: Timeouts,
}

impl Orchestrator {
    /// Creates an orchestrator over the shared store and collaborators.
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
        let retriever = Retriever::new(Arc::clone(&store));
        let adjudicator = Adjudicator::new(
            Arc::clone(&providers.llm),
            Arc::clone(&llm_limiter),
            prompts.clone(),
        );
        let remediator = Remediator::new(Arc::clone(&store), Arc::clone(&providers.tickets));
        Self {
            store,
            providers,
            retriever,
            adjudicator,
            remediator,
            cache,
            embed_limiter,
            llm_limiter,
            prompts,
            config,
            timeouts: Timeouts::default(),
        }
    }

    async fn load_case(&self, case_id: Uuid) -> Result<Case> {
        let store = self.store.lock().await;
        store.get_case(case_id)?.ok_or_else(|| {
            StorageError::CaseNotFound {
                case_id: case_id.to_string(),
            }
            .into()
        })
    }

    async fn save_case(&self, case: &Case) -> Result<()> {
        let mut store = self.store.lock().await;
        store.update_case(case)
    }

    /// Runs a case until the HITL pause, a terminal state, or a
    /// transient error that queue retry will resume.
    ///
    /// # Errors
    ///
    /// Transient errors propagate for retry; input-invalid and fatal
    /// errors fail the case first, then propagate terminally.
    pub async fn run_case(&self, case_id: Uuid) -> Result<Value> {
        let mut case = self.load_case(case_id).await?;

        match case.status {
            CaseStatus::Pending | CaseStatus::Paused => {
                case.status = CaseStatus::Running;
                case.updated_at = now_ts();
                self.save_case(&case).await?;
            }
            CaseStatus::Running => {
                // Re-leased after a crash or lease expiry; continue from
                // the last committed step.
                tracing::info!(case_id = %case_id, "resuming case from persisted state");
            }
            CaseStatus::WaitingApproval | CaseStatus::Completed | CaseStatus::Failed => {
                return Ok(json!({
                    "case_id": case.case_id,
                    "status": case.status.as_str(),
                }));
            }
        }

        let logger = CaseLogger::new(Arc::clone(&self.store), case_id);

        while let Some(step) = case.next_step() {
            // Cancellation is observed only here: the running step
            // completes because provider calls are not cancellable.
            case = self.load_case(case_id).await?;
            if case.cancel_requested {
                logger.log("orchestrator", "cancellation observed").await;
                return self.fail_case(case, AuditError::Cancelled.into()).await;
            }

            if case.current_step != Some(step) {
                case.claim_step(step);
                self.save_case(&case).await?;
            }

            let outcome = self.execute_step(&mut case, step, &logger).await;
            if let Err(err) = outcome {
                if err.class() == ErrorClass::Transient {
                    // Leave the claimed step in place; queue retry
                    // re-executes it.
                    tracing::warn!(case_id = %case_id, step = step.as_str(), error = %err, "step hit transient error");
                    return Err(err);
                }
                logger
                    .log(step.as_str(), format!("step failed: {err}"))
                    .await;
                return self.fail_case(case, err).await;
            }

            if case.status == CaseStatus::WaitingApproval {
                break;
            }
        }

        Ok(json!({
            "case_id": case.case_id,
            "status": case.status.as_str(),
        }))
    }

    async fn fail_case(&self, mut case: Case, err: Error) -> Result<Value> {
        case.status = CaseStatus::Failed;
        case.error_message = Some(err.to_string());
        case.current_step = None;
        case.completed_at = Some(now_ts());
        case.updated_at = now_ts();
        if let Err(save_err) = self.save_case(&case).await {
            tracing::error!(case_id = %case.case_id, error = %save_err, "failed to persist case failure");
        }
        Err(err)
    }

    async fn execute_step(
        &self,
        case: &mut Case,
        step: AuditStep,
        logger: &CaseLogger,
    ) -> Result<()> {
        tracing::info!(case_id = %case.case_id, step = step.as_str(), "step started");
        match step {
            AuditStep::Planner => self.step_planner(case, logger).await,
            AuditStep::Navigator => self.step_navigator(case, logger).await,
            AuditStep::Investigator => self.step_investigator(case, logger).await,
            AuditStep::Judge => self.step_judge(case, logger).await,
            AuditStep::Remediator => self.step_remediator(case, logger).await,
        }
    }

    // ==================== Planner ====================

    async fn step_planner(&self, case: &mut Case, logger: &CaseLogger) -> Result<()> {
        logger.log("planner", "Reading rule intent").await;

        // Collect regulation chunks for every requested rule, in order
        let mut chunks = Vec::new();
        for rule_id in &case.regulation_ids {
            let rule_chunks = {
                let store = self.store.lock().await;
                store.regulation_chunks_for_rule(rule_id)?
            };
            if rule_chunks.is_empty() {
                return Err(AuditError::MissingRegulation {
                    rule_id: rule_id.clone(),
                }
                .into());
            }
            chunks.extend(rule_chunks);
        }

        logger
            .log("planner", "Extracting compliance conditions")
            .await;
        let plans = futures_util::future::join_all(
            chunks.iter().map(|chunk| self.plan_one(chunk)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<PlanEntry>>>()?;

        let task_count: usize = plans.iter().map(|p| p.tasks.len()).sum();
        logger
            .log("planner", format!("Generated {task_count} engineering tasks"))
            .await;

        let result = PlannerResult { plans };
        case.mark_step_complete(AuditStep::Planner, serde_json::to_value(&result)?);
        self.save_case(case).await
    }

    async fn plan_one(&self, chunk: &crate::model::RegulationChunk) -> Result<PlanEntry> {
        self.llm_limiter.acquire().await;
        let messages = [
            ChatMessage::system(self.prompts.planner.clone()),
            ChatMessage::user(build_planner_prompt(
                &chunk.rule_id,
                chunk.rule_section.as_deref(),
                &chunk.chunk_text,
            )),
        ];
        let response = with_retry("plan", || {
            with_timeout(
                "complete",
                self.timeouts.provider,
                self.providers.llm.complete(&messages, 0.1, 800),
            )
        })
        .await?;
        Ok(parse_plan(
            &chunk.rule_id,
            chunk.rule_section.as_deref(),
            &chunk.chunk_text,
            &response,
        ))
    }

    // ==================== Navigator ====================

    async fn step_navigator(&self, case: &mut Case, logger: &CaseLogger) -> Result<()> {
        let planner: PlannerResult = read_blob(case, AuditStep::Planner)?;
        logger
            .log("navigator", "Searching repository for relevant logic")
            .await;

        let tasks: Vec<(String, String, String)> = planner
            .plans
            .iter()
            .flat_map(|plan| {
                plan.tasks
                    .iter()
                    .map(|task| (plan.rule_id.clone(), plan.rule_text.clone(), task.clone()))
            })
            .collect();

        let searched = futures_util::future::join_all(
            tasks
                .iter()
                .map(|(_, _, task)| self.navigate_task(case.repo_id, task)),
        )
        .await;

        let mut entries = Vec::new();
        let mut unmatched = Vec::new();
        for ((rule_id, rule_text, task), hits) in tasks.into_iter().zip(searched) {
            let hits = hits?;
            if hits.is_empty() {
                unmatched.push(task);
            } else {
                entries.push(NavigationEntry {
                    rule_id,
                    rule_text,
                    task,
                    hits,
                });
            }
        }

        let result = NavigatorResult {
            entries,
            unmatched_tasks: unmatched,
        };
        logger
            .log(
                "navigator",
                format!("Mapped to {} code locations", result.hit_count()),
            )
            .await;

        case.mark_step_complete(AuditStep::Navigator, serde_json::to_value(&result)?);
        self.save_case(case).await
    }

    async fn navigate_task(&self, repo_id: Uuid, task: &str) -> Result<Vec<NavigatorHit>> {
        let embedding = match self.embed_text(task).await {
            Ok(embedding) => embedding,
            Err(err) if err.class() == ErrorClass::Transient => return Err(err),
            Err(err) => {
                tracing::warn!(task, error = %err, "task embedding failed, task unmatched");
                return Ok(Vec::new());
            }
        };
        let hits = self
            .retriever
            .retrieve(&embedding, repo_id, self.config.top_k)
            .await?;
        let gated = gate_by_similarity(hits, self.config.similarity_threshold);
        Ok(gated
            .into_iter()
            .map(|hit| NavigatorHit {
                chunk_id: hit.chunk.chunk_id,
                file_path: hit.chunk.file_path.clone(),
                start_line: hit.chunk.start_line,
                end_line: hit.chunk.end_line,
                similarity: hit.similarity(),
                snippet: hit.chunk.snippet(200).to_string(),
            })
            .collect())
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.cache.get_embedding(text) {
            return Ok(hit);
        }
        self.embed_limiter.acquire().await;
        let vector = with_retry("embed", || {
            with_timeout(
                "embed",
                self.timeouts.provider,
                self.providers.embeddings.embed(text),
            )
        })
        .await?;
        self.cache.put_embedding(text, vector.clone());
        Ok(vector)
    }

    // ==================== Investigator ====================

    async fn step_investigator(&self, case: &mut Case, logger: &CaseLogger) -> Result<()> {
        let navigation: NavigatorResult = read_blob(case, AuditStep::Navigator)?;
        logger
            .log("investigator", "Reading implementation logic")
            .await;

        // Flatten hits, capped across the whole case
        let work: Vec<(String, String, NavigatorHit)> = navigation
            .entries
            .iter()
            .flat_map(|entry| {
                entry.hits.iter().map(|hit| {
                    (
                        entry.rule_id.clone(),
                        entry.rule_text.clone(),
                        hit.clone(),
                    )
                })
            })
            .take(MAX_INVESTIGATIONS)
            .collect();

        let tasks_by_hit: Vec<String> = navigation
            .entries
            .iter()
            .flat_map(|entry| entry.hits.iter().map(|_| entry.task.clone()))
            .take(MAX_INVESTIGATIONS)
            .collect();

        let adjudicated = futures_util::future::join_all(
            work.iter()
                .map(|(_, rule_text, hit)| self.investigate_hit(rule_text, hit)),
        )
        .await;

        let mut items = Vec::new();
        for (((rule_id, _, hit), task), outcome) in
            work.into_iter().zip(tasks_by_hit).zip(adjudicated)
        {
            logger
                .log("investigator", format!("Evaluating {}", hit.file_path))
                .await;
            let adjudication = outcome?;
            items.push(InvestigationItem {
                rule_id,
                task,
                file_path: hit.file_path,
                start_line: hit.start_line,
                end_line: hit.end_line,
                status: ControlStatus::from_verdict(adjudication.verdict),
                verdict: adjudication.verdict,
                severity: adjudication.severity,
                severity_score: adjudication.severity_score,
                confidence: adjudication.confidence,
                finding: adjudication.explanation,
                evidence: adjudication.evidence,
                remediation: adjudication.remediation,
            });
        }

        let result = InvestigatorResult { items };
        logger
            .log(
                "investigator",
                format!("Assessed {} code locations", result.items.len()),
            )
            .await;

        case.mark_step_complete(AuditStep::Investigator, serde_json::to_value(&result)?);
        self.save_case(case).await
    }

    async fn investigate_hit(
        &self,
        rule_text: &str,
        hit: &NavigatorHit,
    ) -> Result<crate::adjudicate::Adjudication> {
        let chunk = {
            let store = self.store.lock().await;
            store.get_chunk(hit.chunk_id)?
        };
        let Some(chunk) = chunk else {
            // Chunk vanished between navigation and investigation
            // (concurrent re-index); adjudicate the snippet we kept.
            let stub = crate::model::CodeChunk::new(
                Uuid::nil(),
                hit.file_path.clone(),
                "unknown",
                hit.start_line,
                hit.end_line,
                hit.snippet.clone(),
                String::new(),
            );
            return self.adjudicator.adjudicate(rule_text, &stub).await;
        };
        self.adjudicator.adjudicate(rule_text, &chunk).await
    }

    // ==================== Judge ====================

    async fn step_judge(&self, case: &mut Case, logger: &CaseLogger) -> Result<()> {
        let investigation: InvestigatorResult = read_blob(case, AuditStep::Investigator)?;
        logger.log("judge", "Validating reasoning").await;
        logger.log("judge", "Cross-checking evidence").await;

        let mut verdict = aggregate_verdict(&investigation.items);
        verdict.summary = self.scan_summary(&investigation.items).await;

        let findings = build_findings(case.case_id, &investigation.items);
        logger
            .log(
                "judge",
                format!(
                    "Verdict: {} ({} findings)",
                    verdict.verdict.as_str(),
                    findings.len()
                ),
            )
            .await;

        case.mark_step_complete(AuditStep::Judge, serde_json::to_value(&verdict)?);
        // Findings and the step commit land in one transaction
        let mut store = self.store.lock().await;
        store.update_case_with_findings(case, &findings)
    }

    /// Best-effort executive summary; failures yield `None`.
    async fn scan_summary(&self, items: &[InvestigationItem]) -> Option<String> {
        let actionable: Vec<&InvestigationItem> = items
            .iter()
            .filter(|i| i.status != ControlStatus::Implemented)
            .collect();
        if actionable.is_empty() {
            return None;
        }

        let count = |severity: crate::model::Severity| {
            actionable.iter().filter(|i| i.severity == severity).count()
        };
        let lines: Vec<FindingLine<'_>> = actionable
            .iter()
            .map(|i| FindingLine {
                severity: i.severity.as_str(),
                rule_id: &i.rule_id,
                location: format!("{}:{}", i.file_path, i.start_line),
            })
            .collect();
        let prompt = build_scan_summary_prompt(
            actionable.len(),
            count(crate::model::Severity::Critical),
            count(crate::model::Severity::High),
            count(crate::model::Severity::Medium),
            count(crate::model::Severity::Low),
            &lines,
        );

        self.llm_limiter.acquire().await;
        let messages = [
            ChatMessage::system(self.prompts.scan_summary.clone()),
            ChatMessage::user(prompt),
        ];
        match with_timeout(
            "complete",
            self.timeouts.provider,
            self.providers.llm.complete(&messages, 0.3, 500),
        )
        .await
        {
            Ok(summary) if !summary.trim().is_empty() => Some(summary),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "scan summary failed");
                None
            }
        }
    }

    // ==================== Remediator ====================

    async fn step_remediator(&self, case: &mut Case, logger: &CaseLogger) -> Result<()> {
        logger
            .log("remediator", "Generating remediation tasks")
            .await;

        let findings = {
            let store = self.store.lock().await;
            store.findings_for_case(case.case_id)?
        };
        let intent = read_blob::<PlannerResult>(case, AuditStep::Planner)
            .ok()
            .and_then(|p| p.plans.first().map(|plan| plan.intent.clone()))
            .unwrap_or_else(|| "Validate compliance".to_string());
        let tasks = build_tasks(&findings, &intent);

        logger
            .log(
                "remediator",
                format!("Waiting for approval ({} tasks)", tasks.len()),
            )
            .await;

        let result = RemediatorResult { tasks };
        case.mark_step_complete(AuditStep::Remediator, serde_json::to_value(&result)?);
        case.status = CaseStatus::WaitingApproval;
        case.requires_approval = true;
        self.save_case(case).await
    }

    // ==================== Resume ====================

    /// Applies the human decision to a paused case.
    ///
    /// Approval creates tickets for the stored tasks — or the
    /// reviewer-edited replacement — idempotently per finding, then
    /// completes the case. Decline completes the case with no tickets.
    /// Resuming an already-completed case is a no-op returning the
    /// stored state, so duplicate approvals are harmless.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::NotResumable`] unless the case is waiting
    /// for approval (or already completed).
    pub async fn resume(
        &self,
        case_id: Uuid,
        decision: UserDecision,
        edited_tasks: Option<Vec<RemediationTask>>,
    ) -> Result<Case> {
        let mut case = self.load_case(case_id).await?;

        if case.status == CaseStatus::Completed {
            return Ok(case);
        }
        if case.status != CaseStatus::WaitingApproval {
            return Err(AuditError::NotResumable {
                case_id: case_id.to_string(),
                status: case.status.as_str().to_string(),
            }
            .into());
        }

        let logger = CaseLogger::new(Arc::clone(&self.store), case_id);

        match decision {
            UserDecision::Approved => {
                let mut stored: RemediatorResult = read_blob(&case, AuditStep::Remediator)?;
                if let Some(edited) = edited_tasks {
                    stored.tasks = edited;
                    case.set_step_result(
                        AuditStep::Remediator,
                        serde_json::to_value(&stored)?,
                    );
                }
                logger
                    .log(
                        "remediator",
                        format!("Creating {} tickets", stored.tasks.len()),
                    )
                    .await;
                let ticket_ids = self.remediator.create_tickets(&stored.tasks).await?;
                case.jira_ticket_ids = ticket_ids;
                case.user_decision = Some(UserDecision::Approved);
            }
            UserDecision::Declined => {
                logger
                    .log("remediator", "Approval declined, no tickets created")
                    .await;
                case.user_decision = Some(UserDecision::Declined);
                case.jira_ticket_ids = Vec::new();
            }
        }

        case.status = CaseStatus::Completed;
        case.requires_approval = false;
        case.completed_at = Some(now_ts());
        case.updated_at = now_ts();
        self.save_case(&case).await?;
        Ok(case)
    }
}

/// Deserializes a step's persisted result blob.
fn read_blob<T: serde::de::DeserializeOwned>(case: &Case, step: AuditStep) -> Result<T> {
    let blob = case.step_result(step).ok_or_else(|| {
        Error::Storage(StorageError::Corrupt(format!(
            "missing {} result for case {}",
            step.as_str(),
            case.case_id
        )))
    })?;
    serde_json::from_value(blob.clone()).map_err(|e| {
        Error::Storage(StorageError::Corrupt(format!(
            "unreadable {} result: {e}",
            step.as_str()
        )))
    })
}

/// Builds persisted findings from investigator items, copying line
/// numbers verbatim and guaranteeing non-empty evidence where the
/// verdict demands it.
fn build_findings(case_id: Uuid, items: &[InvestigationItem]) -> Vec<Finding> {
    items
        .iter()
        .map(|item| {
            let mut finding = Finding::new(
                case_id,
                item.rule_id.clone(),
                item.file_path.clone(),
                item.start_line,
                item.end_line,
                item.verdict,
                item.severity,
                item.severity.clamp_score(item.severity_score),
                item.confidence.clamp(0.0, 1.0),
            );
            finding.reasoning = item.finding.clone();
            finding.remediation = item.remediation.clone();
            finding.status = FindingStatus::Pending;
            finding.evidence = item
                .evidence
                .clone()
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| {
                    if item.finding.trim().is_empty() {
                        format!("{}:{}-{}", item.file_path, item.start_line, item.end_line)
                    } else {
                        item.finding.clone()
                    }
                });
            finding
        })
        .collect()
}

/// Outcome check used by the worker: whether a verdict is actionable.
#[must_use]
pub const fn is_actionable(verdict: Verdict) -> bool {
    matches!(verdict, Verdict::NonCompliant | Verdict::Partial)
}
