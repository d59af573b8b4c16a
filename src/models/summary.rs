//! Run-level summary reported alongside the classified record set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{CanonicalRecord, SourceKind, UsageVerdict};

/// Failure taxonomy surfaced to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// The source could not be used (auth, exhausted retries, quota)
    SourceUnavailable,
    /// Rate limiting persisted through every retry
    RateLimitExceeded,
    /// A single raw record could not be normalized
    ParseFailed,
    /// Full text could not be retrieved for a record
    FetchFailed,
}

/// Final state of one source's collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Not started (disabled, or no routed terms)
    #[default]
    Skipped,
    /// Every query ran to the end of its pagination or cap
    Completed,
    /// Some queries failed or the deadline cut collection short
    Partial,
    /// The source was unusable for the whole run
    Unavailable,
}

/// A recorded failure with its message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNote {
    pub kind: FailureKind,
    pub message: String,
}

/// Per-source counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub status: SourceStatus,

    /// Raw records received
    pub raw_records: usize,

    /// Records that normalized successfully and reached the merge
    pub records: usize,

    pub parse_failures: usize,

    /// Merged records this source contributed to that relevance pruning dropped
    pub pruned: usize,

    pub failures: Vec<FailureNote>,
}

impl SourceReport {
    /// Number of failures other than per-record parse drops
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    pub fn record_failure(&mut self, kind: FailureKind, message: impl Into<String>) {
        self.failures.push(FailureNote {
            kind,
            message: message.into(),
        });
    }
}

/// Full-text retrieval counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchStats {
    pub attempted: usize,
    pub fetched: usize,
    pub cache_hits: usize,
    pub failed: usize,
    /// Records left untouched because the deadline passed
    pub skipped: usize,
}

/// Outcome counts by verdict
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCounts {
    pub data_used: usize,
    pub mention_only: usize,
    pub undetermined: usize,
}

impl VerdictCounts {
    pub fn tally(records: &[CanonicalRecord]) -> Self {
        let mut counts = Self::default();
        for record in records {
            match record.usage_verdict {
                UsageVerdict::DataUsed => counts.data_used += 1,
                UsageVerdict::MentionOnly => counts.mention_only += 1,
                UsageVerdict::Undetermined => counts.undetermined += 1,
            }
        }
        counts
    }
}

/// Summary of a collection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub per_source: BTreeMap<SourceKind, SourceReport>,
    pub canonical_records: usize,
    pub verdicts: VerdictCounts,
    pub fetch: FetchStats,
    pub deadline_reached: bool,
}

impl RunSummary {
    /// Total raw records across all sources
    pub fn total_raw_records(&self) -> usize {
        self.per_source.values().map(|r| r.raw_records).sum()
    }

    /// Total failures across all sources, excluding per-record parse drops
    pub fn total_failures(&self) -> usize {
        self.per_source.values().map(SourceReport::failure_count).sum()
    }

    /// Whether any source returned less than it could have
    pub fn degraded(&self) -> bool {
        self.deadline_reached
            || self
                .per_source
                .values()
                .any(|r| matches!(r.status, SourceStatus::Partial | SourceStatus::Unavailable))
    }
}

/// The classified record set plus its run summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRun {
    pub records: Vec<CanonicalRecord>,
    pub summary: RunSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_tally() {
        let mut used = CanonicalRecord::new(SourceKind::PubMed, "a");
        used.usage_verdict = UsageVerdict::DataUsed;
        let mention = {
            let mut r = CanonicalRecord::new(SourceKind::PubMed, "b");
            r.usage_verdict = UsageVerdict::MentionOnly;
            r
        };
        let open = CanonicalRecord::new(SourceKind::OpenAlex, "c");

        let counts = VerdictCounts::tally(&[used, mention, open]);
        assert_eq!(counts.data_used, 1);
        assert_eq!(counts.mention_only, 1);
        assert_eq!(counts.undetermined, 1);
    }

    #[test]
    fn test_source_report_failures() {
        let mut report = SourceReport::default();
        assert_eq!(report.status, SourceStatus::Skipped);
        report.record_failure(FailureKind::RateLimitExceeded, "429 after 5 attempts");
        assert_eq!(report.failure_count(), 1);
    }
}
