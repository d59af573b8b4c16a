//! Core data models for search terms, records and run summaries.

mod record;
mod search;
mod summary;

pub use record::{
    CanonicalRecord, ContentHash, EvidenceMethod, RecordBuilder, SourceKind, TextOrigin,
    UsageEvidence, UsageVerdict,
};
pub use search::{RawPayload, RawRecord, SearchTerm, TermCategory};
pub use summary::{
    CollectionRun, FailureKind, FailureNote, FetchStats, RunSummary, SourceReport, SourceStatus,
    VerdictCounts,
};
