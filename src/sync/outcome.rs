//! Per-batch accumulation of character sync results.

use std::collections::BTreeMap;
use std::fmt;

/// Structured result of syncing one character. Most of these are successes;
/// a character that vanished or went private is expected churn, not an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SyncStatus {
    Synced,
    NotFound,
    SkippedUnavailable,
    NoEntries,
    EquipmentUnavailable,
    TalentsUnavailable,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::NotFound => "not_found",
            SyncStatus::SkippedUnavailable => "skipped_unavailable",
            SyncStatus::NoEntries => "no_entries",
            SyncStatus::EquipmentUnavailable => "equipment_unavailable",
            SyncStatus::TalentsUnavailable => "talents_unavailable",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct Failure {
    pub character_id: i64,
    pub status: SyncStatus,
    pub error: String,
}

/// Accumulator for one batch job invocation. Never persisted.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    successes: Vec<(i64, SyncStatus)>,
    failures: Vec<Failure>,
}

impl BatchOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, character_id: i64, status: SyncStatus) {
        self.successes.push((character_id, status));
    }

    pub fn record_failure(&mut self, character_id: i64, status: SyncStatus, error: String) {
        self.failures.push(Failure {
            character_id,
            status,
            error,
        });
    }

    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Every item failed and the batch was non-empty. Partial failure is
    /// never total failure.
    pub fn total_failure(&self) -> bool {
        !self.failures.is_empty() && self.successes.is_empty()
    }

    /// Status -> count over successes and failures combined, in stable
    /// order for logging.
    pub fn counts_by_status(&self) -> BTreeMap<SyncStatus, usize> {
        let mut counts = BTreeMap::new();
        for (_, status) in &self.successes {
            *counts.entry(*status).or_insert(0) += 1;
        }
        for failure in &self.failures {
            *counts.entry(failure.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn summary(&self) -> String {
        let counts = self
            .counts_by_status()
            .into_iter()
            .map(|(status, n)| format!("{status}={n}"))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "batch finished: total={} ok={} failed={} [{counts}]",
            self.total(),
            self.successes.len(),
            self.failures.len()
        )
    }

    /// The fatal error raised when a whole batch fails: per-status counts
    /// plus up to three sample failures so logs show what went wrong
    /// without dumping fifty identical stack traces.
    pub fn total_failure_error(&self) -> anyhow::Error {
        let samples = self
            .failures
            .iter()
            .take(3)
            .map(|f| format!("{}: {}", f.character_id, f.error))
            .collect::<Vec<_>>()
            .join("; ");
        anyhow::anyhow!(
            "all {} characters in batch failed ({}); samples: {samples}",
            self.failures.len(),
            self.counts_by_status()
                .into_iter()
                .map(|(status, n)| format!("{status}={n}"))
                .collect::<Vec<_>>()
                .join(" ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_failure_requires_all_failed() {
        let mut outcome = BatchOutcome::new();
        outcome.record_failure(1, SyncStatus::EquipmentUnavailable, "502".into());
        outcome.record_failure(2, SyncStatus::TalentsUnavailable, "timeout".into());
        assert!(outcome.total_failure());

        outcome.record_success(3, SyncStatus::Synced);
        assert!(!outcome.total_failure());
    }

    #[test]
    fn test_empty_batch_is_not_total_failure() {
        assert!(!BatchOutcome::new().total_failure());
    }

    #[test]
    fn test_counts_by_status() {
        let mut outcome = BatchOutcome::new();
        outcome.record_success(1, SyncStatus::Synced);
        outcome.record_success(2, SyncStatus::Synced);
        outcome.record_success(3, SyncStatus::NotFound);
        outcome.record_failure(4, SyncStatus::EquipmentUnavailable, "x".into());

        let counts = outcome.counts_by_status();
        assert_eq!(counts[&SyncStatus::Synced], 2);
        assert_eq!(counts[&SyncStatus::NotFound], 1);
        assert_eq!(counts[&SyncStatus::EquipmentUnavailable], 1);
        assert_eq!(outcome.total(), 4);
    }

    #[test]
    fn test_total_failure_error_caps_samples() {
        let mut outcome = BatchOutcome::new();
        for id in 0..10 {
            outcome.record_failure(id, SyncStatus::EquipmentUnavailable, format!("err {id}"));
        }
        let msg = outcome.total_failure_error().to_string();
        assert!(msg.contains("all 10 characters"));
        assert!(msg.contains("err 0"));
        assert!(msg.contains("err 2"));
        assert!(!msg.contains("err 3"));
    }

    #[test]
    fn test_summary_mentions_counts() {
        let mut outcome = BatchOutcome::new();
        outcome.record_success(1, SyncStatus::Synced);
        outcome.record_failure(2, SyncStatus::TalentsUnavailable, "boom".into());
        let summary = outcome.summary();
        assert!(summary.contains("total=2"));
        assert!(summary.contains("ok=1"));
        assert!(summary.contains("failed=1"));
        assert!(summary.contains("synced=1"));
    }
}
