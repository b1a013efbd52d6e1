//! Per-case agent log stream.
//!
//! Appends progress entries for streaming UIs. The stream is advisory:
//! append failures are logged and swallowed, and losing the stream
//! never affects case correctness. Entries expire one hour after the
//! case reaches a terminal state.

use uuid::Uuid;

use crate::error::Result;
use crate::model::LogEntry;
use crate::store::SharedStore;

/// TTL for log entries after case completion, in seconds.
pub const LOG_TTL_SECS: i64 = 3600;

/// Append handle for one case's log stream.
#[derive(Clone)]
pub struct CaseLogger {
    store: SharedStore,
    case_id: Uuid,
}

impl CaseLogger {
    /// Creates a logger for the case.
    #[must_use]
    pub const fn new(store: SharedStore, case_id: Uuid) -> Self {
        Self { store, case_id }
    }

    /// Appends one entry; failures are swallowed.
    pub async fn log(&self, agent: &str, message: impl Into<String>) {
        let entry = LogEntry::new(agent, message);
        tracing::debug!(case_id = %self.case_id, agent, message = %entry.message);
        let mut store = self.store.lock().await;
        if let Err(e) = store.append_log(self.case_id, &entry) {
            tracing::warn!(case_id = %self.case_id, error = %e, "agent log append failed");
        }
    }

    /// Reads entries from `from_index` onward.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    pub async fn read(&self, from_index: usize) -> Result<Vec<LogEntry>> {
        let store = self.store.lock().await;
        store.read_logs(self.case_id, from_index)
    }
}
