//! # Compendium Tracker
//!
//! Collects scholarly records that reference the AHRQ Compendium of U.S.
//! Health Systems from several bibliographic databases, merges them into one
//! record per work, and decides whether each work actually *uses* the dataset
//! or merely mentions it.
//!
//! ## Architecture
//!
//! - [`models`]: search terms, raw and canonical records, verdicts, run summary
//! - [`sources`]: rate-limited source clients behind the [`Source`] trait
//! - [`normalize`]: pure per-source normalization into canonical records
//! - [`relevance`]: rank & prune scoring applied to merged records
//! - [`resolver`]: order-independent identity resolution (deduplication)
//! - [`fulltext`]: open-access full-text retrieval with a content-hash cache
//! - [`classify`]: pattern pass with a statistical fallback
//! - [`orchestrator`]: the run itself, with its deadline and worker pools
//! - [`config`]: configuration loading and validation
//! - [`utils`]: HTTP client, retry and throttling

pub mod classify;
pub mod config;
pub mod error;
pub mod fulltext;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod relevance;
pub mod resolver;
pub mod sources;
pub mod utils;

// Re-export commonly used types
pub use config::{load_config, Config};
pub use error::TrackerError;
pub use models::{CanonicalRecord, CollectionRun, RunSummary, SearchTerm, UsageVerdict};
pub use orchestrator::CollectionOrchestrator;
pub use sources::{Source, SourceRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
