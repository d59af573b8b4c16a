//! Statistical fallback over full text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

use super::patterns::snippet_window;
use super::{ClassificationStage, ClassifierError, StageOpinion};
use crate::models::{EvidenceMethod, TextOrigin, UsageEvidence, UsageVerdict};

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)compendium").expect("static regex: mention"));

/// Estimates the probability that a document uses the dataset
pub trait UsageScorer: Send + Sync + std::fmt::Debug {
    fn score(&self, text: &str) -> f64;
}

/// A weighted cue phrase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cue {
    pub phrase: String,
    pub weight: f64,
}

fn default_window() -> usize {
    400
}

/// Logistic model over cue phrases found near mentions of the dataset
///
/// Only text within `window` bytes of a "compendium" mention is considered.
/// Each cue present there adds its weight once; the sum plus `bias` goes
/// through the logistic function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CueWeightScorer {
    pub bias: f64,
    #[serde(default = "default_window")]
    pub window: usize,
    pub cues: Vec<Cue>,
}

impl Default for CueWeightScorer {
    fn default() -> Self {
        let cue = |phrase: &str, weight: f64| Cue {
            phrase: phrase.to_string(),
            weight,
        };
        Self {
            bias: -1.5,
            window: default_window(),
            cues: vec![
                cue("data from the", 1.6),
                cue("data were obtained", 1.6),
                cue("were identified using", 1.4),
                cue("identified using", 1.2),
                cue("according to the", 1.0),
                cue("based on the", 0.8),
                cue("we defined", 1.0),
                cue("system affiliation", 1.0),
                cue("system membership", 1.0),
                cue("hospital linkage", 1.2),
                cue("were matched", 1.0),
                cue("to identify", 0.8),
                cue("we classified", 1.2),
                cue("our sample", 0.8),
                cue("see also", -2.0),
                cue("for example", -0.8),
                cue("such as the", -0.8),
                cue("is a resource", -1.2),
                cue("available at", -0.6),
                cue("future research", -1.0),
            ],
        }
    }
}

impl CueWeightScorer {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ClassifierError> {
        let model_error = |message: String| ClassifierError::Model {
            path: path.to_path_buf(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| model_error(e.to_string()))?;
        Self::from_json(&content).map_err(|e| model_error(e.to_string()))
    }

    /// Lowercased text around every mention of the dataset
    fn neighbourhoods(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        lower
            .match_indices("compendium")
            .map(|(at, m)| snippet_window(&lower, at, at + m.len(), self.window))
            .collect()
    }
}

impl UsageScorer for CueWeightScorer {
    fn score(&self, text: &str) -> f64 {
        let context = self.neighbourhoods(text).join(" ");
        let z = self.bias
            + self
                .cues
                .iter()
                .filter(|cue| !context.is_empty() && context.contains(&cue.phrase.to_lowercase()))
                .map(|cue| cue.weight)
                .sum::<f64>();
        1.0 / (1.0 + (-z).exp())
    }
}

/// Resolves full-text cases the pattern pass leaves open
#[derive(Debug)]
pub struct StatisticalStage {
    scorer: Box<dyn UsageScorer>,
    threshold: f64,
    snippet_width: usize,
}

impl StatisticalStage {
    pub fn new(scorer: Box<dyn UsageScorer>, threshold: f64, snippet_width: usize) -> Self {
        Self {
            scorer,
            threshold,
            snippet_width,
        }
    }
}

impl ClassificationStage for StatisticalStage {
    fn name(&self) -> &str {
        "statistical"
    }

    fn evaluate(&self, text: &str, origin: TextOrigin) -> StageOpinion {
        if origin != TextOrigin::FullText {
            return StageOpinion::NoOpinion;
        }

        let score = self.scorer.score(text);
        tracing::debug!(score, threshold = self.threshold, "statistical usage score");
        if score < self.threshold {
            return StageOpinion::Definitive {
                verdict: UsageVerdict::MentionOnly,
                evidence: None,
            };
        }

        let (position, end) = MENTION
            .find(text)
            .map(|m| (m.start(), m.end()))
            .unwrap_or((0, 0));
        StageOpinion::Definitive {
            verdict: UsageVerdict::DataUsed,
            evidence: Some(UsageEvidence {
                method: EvidenceMethod::Statistical { score },
                snippet: snippet_window(text, position, end, self.snippet_width),
                position,
                origin,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Fixed(f64);

    impl UsageScorer for Fixed {
        fn score(&self, _text: &str) -> f64 {
            self.0
        }
    }

    #[test]
    fn test_cue_scorer_separates_usage_from_mentions() {
        let scorer = CueWeightScorer::default();
        let usage = scorer.score(
            "Hospital system affiliation was identified using data from the AHRQ Compendium.",
        );
        let mention = scorer.score("For related resources, see also the AHRQ Compendium.");
        let absent = scorer.score("Nothing relevant in this document.");

        assert!(usage > 0.6, "usage scored {}", usage);
        assert!(mention < 0.6, "mention scored {}", mention);
        assert!((absent - 1.0 / (1.0 + 1.5f64.exp())).abs() < 1e-9);
    }

    #[test]
    fn test_model_from_json() {
        let scorer = CueWeightScorer::from_json(
            r#"{"bias": 0.0, "cues": [{"phrase": "Linked", "weight": 10.0}]}"#,
        )
        .unwrap();
        assert_eq!(scorer.window, 400);
        assert!(scorer.score("records were linked to the compendium") > 0.99);

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            CueWeightScorer::from_json_file(&missing),
            Err(ClassifierError::Model { .. })
        ));
    }

    #[test]
    fn test_stage_only_runs_on_full_text() {
        let stage = StatisticalStage::new(Box::new(Fixed(0.9)), 0.6, 160);
        assert!(matches!(
            stage.evaluate("the compendium", TextOrigin::Abstract),
            StageOpinion::NoOpinion
        ));

        let StageOpinion::Definitive { verdict, evidence } =
            stage.evaluate("we relied heavily on the compendium", TextOrigin::FullText)
        else {
            panic!("expected a definitive opinion");
        };
        assert_eq!(verdict, UsageVerdict::DataUsed);
        let evidence = evidence.unwrap();
        assert_eq!(evidence.method, EvidenceMethod::Statistical { score: 0.9 });
        assert_eq!(evidence.position, 25);
    }

    #[test]
    fn test_below_threshold_is_mention_only() {
        let stage = StatisticalStage::new(Box::new(Fixed(0.59)), 0.6, 160);
        assert!(matches!(
            stage.evaluate("see also the compendium", TextOrigin::FullText),
            StageOpinion::Definitive {
                verdict: UsageVerdict::MentionOnly,
                evidence: None
            }
        ));
    }
}
