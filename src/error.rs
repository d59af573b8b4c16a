//! Run-level errors.
//!
//! Per-source, per-record and per-fetch failures never surface here: they are
//! contained where they happen and reported in the
//! [`RunSummary`](crate::models::RunSummary). A [`TrackerError`] means the run
//! could not start or could not be assembled.

use thiserror::Error;

use crate::classify::ClassifierError;
use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Classifier setup failed: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
