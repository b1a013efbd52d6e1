//! Remediation task generation and idempotent ticket creation.
//!
//! Exactly one task is generated per actionable finding (verdict
//! `non_compliant` or `partial`). Ticket creation is at-most-once per
//! `(case_id, finding_id)`: the stored `ticket_id` mapping is checked
//! before calling the ticketing collaborator, so a re-approved case
//! returns the same ticket IDs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Finding, Verdict};
use crate::provider::{with_retry, TicketingSystem};
use crate::store::SharedStore;

/// Ticketing project used for remediation issues.
pub const TICKET_PROJECT: &str = "COMP";

/// Priority of a remediation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Missing control.
    High,
    /// Partially implemented control.
    Medium,
}

impl TaskPriority {
    /// Stable string form passed to the ticketing collaborator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
        }
    }
}

/// One proposed remediation task, shown to the reviewer at the HITL
/// gate and possibly edited before approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationTask {
    /// Finding this task remediates; the ticket natural key.
    pub finding_id: Uuid,
    /// Issue title.
    pub title: String,
    /// Issue body.
    pub description: String,
    /// File to fix.
    pub file_path: String,
    /// Rule reference.
    pub rule_id: String,
    /// Ticket priority.
    pub priority: TaskPriority,
}

/// Remediator result blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemediatorResult {
    /// Proposed tasks, in finding order.
    pub tasks: Vec<RemediationTask>,
}

/// Truncates at a char boundary for issue titles.
fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &text[..end]
}

/// Generates one task per actionable finding.
#[must_use]
pub fn build_tasks(findings: &[Finding], rule_intent: &str) -> Vec<RemediationTask> {
    findings
        .iter()
        .filter(|f| matches!(f.verdict, Verdict::NonCompliant | Verdict::Partial))
        .map(|finding| {
            let issue = if finding.reasoning.is_empty() {
                "Compliance gap"
            } else {
                finding.reasoning.as_str()
            };
            RemediationTask {
                finding_id: finding.finding_id,
                title: format!("Fix: {}", truncate(issue, 80)),
                description: format!(
                    "**Regulation**: {rule}\n**Intent**: {rule_intent}\n**Issue**: {issue}\n\
                     **File**: {file}\n**Action**: Implement missing compliance control",
                    rule = finding.rule_id,
                    file = finding.file_path,
                ),
                file_path: finding.file_path.clone(),
                rule_id: finding.rule_id.clone(),
                priority: if finding.verdict == Verdict::NonCompliant {
                    TaskPriority::High
                } else {
                    TaskPriority::Medium
                },
            }
        })
        .collect()
}

/// Creates tickets for approved tasks, at most once per finding.
pub struct Remediator {
    store: SharedStore,
    tickets: Arc<dyn TicketingSystem>,
}

impl Remediator {
    /// Creates a remediator over the store and ticketing collaborator.
    #[must_use]
    pub const fn new(store: SharedStore, tickets: Arc<dyn TicketingSystem>) -> Self {
        Self { store, tickets }
    }

    /// Creates one ticket per task, returning ticket IDs in task order.
    ///
    /// A finding that already has a recorded ticket reuses it; the
    /// collaborator is only invoked for findings with no mapping, so
    /// duplicate approvals never create duplicate tickets.
    ///
    /// # Errors
    ///
    /// Returns an error when the ticketing collaborator fails after
    /// retries or a task references an unknown finding.
    pub async fn create_tickets(&self, tasks: &[RemediationTask]) -> Result<Vec<String>> {
        let mut ticket_ids = Vec::with_capacity(tasks.len());

        for task in tasks {
            let existing = {
                let store = self.store.lock().await;
                store
                    .get_finding(task.finding_id)?
                    .and_then(|f| f.ticket_id)
            };
            if let Some(ticket_id) = existing {
                tracing::debug!(finding_id = %task.finding_id, %ticket_id, "ticket already recorded");
                ticket_ids.push(ticket_id);
                continue;
            }

            let created = with_retry("create_issue", || {
                self.tickets.create_issue(
                    TICKET_PROJECT,
                    &task.title,
                    &task.description,
                    task.priority.as_str(),
                )
            })
            .await?;

            // First writer wins under concurrent approval
            let winner = {
                let mut store = self.store.lock().await;
                store.record_ticket(task.finding_id, &created)?
            };
            tracing::info!(finding_id = %task.finding_id, ticket_id = %winner, "ticket created");
            ticket_ids.push(winner);
        }

        Ok(ticket_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Case, Repo, Severity};
    use crate::store::{shared, SqliteStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn finding(case_id: Uuid, verdict: Verdict) -> Finding {
        let mut f = Finding::new(
            case_id,
            "RBI-1",
            "src/auth.py",
            5,
            25,
            verdict,
            Severity::High,
            7.0,
            0.8,
        );
        f.evidence = "no second factor".into();
        f.reasoning = "Admin login accepts password only".into();
        f
    }

    #[test]
    fn test_build_tasks_one_per_actionable() {
        let case_id = Uuid::new_v4();
        let findings = vec![
            finding(case_id, Verdict::NonCompliant),
            finding(case_id, Verdict::Partial),
            finding(case_id, Verdict::Compliant),
            finding(case_id, Verdict::Unclear),
        ];
        let tasks = build_tasks(&findings, "MFA for admin actions");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].priority, TaskPriority::High);
        assert_eq!(tasks[1].priority, TaskPriority::Medium);
        assert!(tasks[0].title.starts_with("Fix: "));
        assert!(tasks[0].description.contains("RBI-1"));
        assert!(tasks[0].description.contains("MFA for admin actions"));
        assert!(tasks[0].description.contains("src/auth.py"));
    }

    #[test]
    fn test_build_tasks_title_capped() {
        let case_id = Uuid::new_v4();
        let mut long = finding(case_id, Verdict::NonCompliant);
        long.reasoning = "x".repeat(300);
        let tasks = build_tasks(&[long], "intent");
        assert!(tasks[0].title.len() <= "Fix: ".len() + 80);
    }

    struct CountingTickets {
        created: AtomicU32,
    }

    #[async_trait]
    impl TicketingSystem for CountingTickets {
        async fn create_issue(
            &self,
            _project: &str,
            _title: &str,
            _body: &str,
            _priority: &str,
        ) -> Result<String> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(format!("COMP-{}", n + 1))
        }
    }

    async fn seeded(findings: &[Finding], case: &Case) -> (SharedStore, Arc<CountingTickets>) {
        let mut store = SqliteStore::in_memory().unwrap();
        store.init().unwrap();
        let mut repo = Repo::new(1, 1, "acme/pay", "main");
        repo.repo_id = case.repo_id;
        store.insert_repo(&repo).unwrap();
        store.insert_case(case).unwrap();
        store.update_case_with_findings(case, findings).unwrap();
        (
            shared(store),
            Arc::new(CountingTickets {
                created: AtomicU32::new(0),
            }),
        )
    }

    #[tokio::test]
    async fn test_create_tickets_idempotent() {
        let case = Case::new(Uuid::new_v4(), vec!["RBI-1".into()]);
        let f = finding(case.case_id, Verdict::NonCompliant);
        let (store, tickets) = seeded(std::slice::from_ref(&f), &case).await;
        let remediator = Remediator::new(store, tickets.clone());

        let tasks = build_tasks(std::slice::from_ref(&f), "intent");
        let first = remediator.create_tickets(&tasks).await.unwrap();
        assert_eq!(first, vec!["COMP-1".to_string()]);

        // Second approval returns the same IDs without calling the
        // collaborator again
        let second = remediator.create_tickets(&tasks).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(tickets.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_tickets_unknown_finding() {
        let case = Case::new(Uuid::new_v4(), vec!["RBI-1".into()]);
        let f = finding(case.case_id, Verdict::NonCompliant);
        let (store, tickets) = seeded(&[], &case).await;
        let remediator = Remediator::new(store, tickets);

        let tasks = build_tasks(std::slice::from_ref(&f), "intent");
        // Task references a finding never persisted
        assert!(remediator.create_tickets(&tasks).await.is_err());
    }

    #[tokio::test]
    async fn test_create_tickets_empty() {
        let case = Case::new(Uuid::new_v4(), vec!["RBI-1".into()]);
        let (store, tickets) = seeded(&[], &case).await;
        let remediator = Remediator::new(store, tickets);
        assert!(remediator.create_tickets(&[]).await.unwrap().is_empty());
    }
}
