//! Append-only record of terminal per-task outcomes for one run.

use std::fmt;

use serde::Serialize;

/// Insertion-ordered lists of task names with a determined terminal outcome.
///
/// A task name appears in at most one of the two lists. Spawn-level failures
/// are deliberately recorded in neither; only classified completions count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunLedger {
    completed: Vec<String>,
    failed: Vec<String>,
}

impl RunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_completed(&mut self, name: &str) {
        self.completed.push(name.to_string());
    }

    pub fn record_failed(&mut self, name: &str) {
        self.failed.push(name.to_string());
    }

    pub fn completed(&self) -> &[String] {
        &self.completed
    }

    pub fn failed(&self) -> &[String] {
        &self.failed
    }

    /// Snapshot the ledger as a summary. Valid at any point during a run.
    pub fn summarize(&self) -> RunSummary {
        RunSummary {
            total: self.completed.len() + self.failed.len(),
            completed: self.completed.clone(),
            failed: self.failed.clone(),
        }
    }
}

/// Deterministic report over a ledger snapshot.
///
/// `total` always equals `completed.len() + failed.len()`. Serializable so a
/// dashboard can consume it; `Display` renders the operator-facing report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== SUMMARY ===")?;
        writeln!(f, "Total: {} tasks", self.total)?;
        writeln!(f, "Successful: {}", self.completed.len())?;
        writeln!(f, "Failed: {}", self.failed.len())?;
        if !self.completed.is_empty() {
            writeln!(f, "Successful tasks:")?;
            for name in &self.completed {
                writeln!(f, "  \u{2713} {name}")?;
            }
        }
        if !self.failed.is_empty() {
            writeln!(f, "Failed tasks:")?;
            for name in &self.failed {
                writeln!(f, "  \u{2717} {name}")?;
            }
        }
        Ok(())
    }
}
