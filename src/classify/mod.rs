//! Usage classification.
//!
//! A record's verdict comes from an ordered list of stages. Each stage looks
//! at the best text available and either decides or abstains; the first
//! stage that decides wins. With the default configuration:
//!
//! 1. [`PatternStage`]: regular expressions for dataset URLs, usage verbs near
//!    "compendium" and dataset file names. A match is `DATA_USED`.
//! 2. [`StatisticalStage`]: only for full text, a probability from a
//!    [`UsageScorer`]; `DATA_USED` at or above the threshold, else `MENTION_ONLY`.
//!
//! When every stage abstains the verdict is `UNDETERMINED`.

mod patterns;
mod statistical;

pub use patterns::{default_rules, snippet_window, PatternRule, PatternStage};
pub use statistical::{Cue, CueWeightScorer, StatisticalStage, UsageScorer};

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ClassifierConfig;
use crate::models::{CanonicalRecord, TextOrigin, UsageEvidence, UsageVerdict};

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Invalid usage pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Cannot load usage model {}: {message}", path.display())]
    Model { path: PathBuf, message: String },
}

/// What one stage concluded
#[derive(Debug, Clone, PartialEq)]
pub enum StageOpinion {
    Definitive {
        verdict: UsageVerdict,
        evidence: Option<UsageEvidence>,
    },
    NoOpinion,
}

/// One step of the classification chain
pub trait ClassificationStage: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn evaluate(&self, text: &str, origin: TextOrigin) -> StageOpinion;
}

/// Final outcome for one text
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub verdict: UsageVerdict,
    pub evidence: Option<UsageEvidence>,
    /// Stage that decided, `None` when inconclusive
    pub stage: Option<String>,
}

impl Classification {
    fn inconclusive() -> Self {
        Self {
            verdict: UsageVerdict::Undetermined,
            evidence: None,
            stage: None,
        }
    }
}

/// Strict precedence chain of classification stages
#[derive(Debug)]
pub struct UsageClassifier {
    stages: Vec<Box<dyn ClassificationStage>>,
}

impl UsageClassifier {
    pub fn new(stages: Vec<Box<dyn ClassificationStage>>) -> Self {
        Self { stages }
    }

    /// Pattern pass plus, unless disabled, the cue-weight fallback
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let mut pattern = PatternStage::new(config.snippet_width);
        for (i, extra) in config.extra_patterns.iter().enumerate() {
            pattern = pattern.with_pattern(format!("extra_{}", i + 1), extra)?;
        }
        for url in config.literal_urls.iter().filter(|u| !u.trim().is_empty()) {
            pattern = pattern.with_literal_url(url)?;
        }

        let mut stages: Vec<Box<dyn ClassificationStage>> = vec![Box::new(pattern)];
        if config.statistical.enabled {
            let scorer = match &config.statistical.model_path {
                Some(path) => CueWeightScorer::from_json_file(path)?,
                None => CueWeightScorer::default(),
            };
            stages.push(Box::new(StatisticalStage::new(
                Box::new(scorer),
                config.statistical.threshold,
                config.snippet_width,
            )));
        }
        Ok(Self::new(stages))
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run the chain over one text
    pub fn classify_text(&self, text: &str, origin: TextOrigin) -> Classification {
        if text.trim().is_empty() {
            return Classification::inconclusive();
        }
        for stage in &self.stages {
            if let StageOpinion::Definitive { verdict, evidence } = stage.evaluate(text, origin) {
                return Classification {
                    verdict,
                    evidence,
                    stage: Some(stage.name().to_string()),
                };
            }
        }
        Classification::inconclusive()
    }

    /// Classify a record on its full text when given, else its abstract, else its title
    pub fn classify(&self, record: &CanonicalRecord, full_text: Option<&str>) -> Classification {
        let input = full_text
            .filter(|t| !t.trim().is_empty())
            .map(|t| (t, TextOrigin::FullText))
            .or_else(|| record.metadata_text());
        match input {
            Some((text, origin)) => self.classify_text(text, origin),
            None => Classification::inconclusive(),
        }
    }

    /// Classify and record the outcome on the record, returning its verdict
    pub fn apply(&self, record: &mut CanonicalRecord, full_text: Option<&str>) -> UsageVerdict {
        let Classification {
            verdict, evidence, ..
        } = self.classify(record, full_text);
        record.apply_verdict(verdict, evidence);
        record.usage_verdict
    }
}
