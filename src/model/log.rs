//! Per-case agent log entries.

use serde::{Deserialize, Serialize};

use super::now_ts;

/// One entry in a case's append-only agent timeline.
///
/// Entries are advisory: they feed streaming UIs and their loss never
/// affects case correctness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Agent that emitted the entry.
    pub agent: String,

    /// Human-readable progress message.
    pub message: String,

    /// Unix timestamp of the append.
    pub timestamp: i64,
}

impl LogEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn new(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            message: message.into(),
            timestamp: now_ts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_new() {
        let entry = LogEntry::new("planner", "reading rule intent");
        assert_eq!(entry.agent, "planner");
        assert_eq!(entry.message, "reading rule intent");
        assert!(entry.timestamp > 0);
    }
}
