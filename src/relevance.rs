//! Rank & prune scoring for merged records.
//!
//! Sources return plenty of noise for a phrase like "compendium" (chemical
//! compendia, pharmacopoeias, non-US health systems). Each record gets an
//! additive score from positive and negative signals over its lowercased
//! title and abstract; records under the configured threshold are dropped.
//! Scoring runs after identity resolution, so a work is judged on the
//! richest metadata any source supplied.

use crate::config::{RelevanceConfig, RelevanceWeights};
use crate::models::CanonicalRecord;

/// Titles with fewer words than this get the `short_title` weight
const SHORT_TITLE_WORDS: usize = 5;

/// Score of one record plus the signals that fired, for auditing
#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceScore {
    pub score: f64,
    pub signals: Vec<&'static str>,
}

impl RelevanceScore {
    fn add(&mut self, signal: &'static str, weight: f64) {
        self.score += weight;
        self.signals.push(signal);
    }
}

/// Additive multi-signal relevance scorer
#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    enabled: bool,
    threshold: f64,
    weights: RelevanceWeights,
    canonical_terms: Vec<String>,
    seed_authors: Vec<String>,
    seed_pmids: Vec<String>,
    integration_terms: Vec<String>,
    scope_terms: Vec<String>,
    journal_whitelist: Vec<String>,
    neg_geography: Vec<String>,
    neg_domain: Vec<String>,
    old_before_year: i32,
}

fn lowered(terms: &[String]) -> Vec<String> {
    terms
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

fn any_in(terms: &[String], text: &str) -> bool {
    terms.iter().any(|term| text.contains(term.as_str()))
}

impl RelevanceScorer {
    pub fn new(config: &RelevanceConfig) -> Self {
        Self {
            enabled: config.enabled,
            threshold: config.threshold,
            weights: config.weights.clone(),
            canonical_terms: lowered(&config.canonical_terms),
            seed_authors: lowered(&config.seed_authors),
            seed_pmids: config
                .seed_pmids
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            integration_terms: lowered(&config.integration_terms),
            scope_terms: lowered(&config.scope_terms),
            journal_whitelist: lowered(&config.journal_whitelist),
            neg_geography: lowered(&config.neg_geography),
            neg_domain: lowered(&config.neg_domain),
            old_before_year: config.old_before_year,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Score a record without modifying it
    pub fn score(&self, record: &CanonicalRecord) -> RelevanceScore {
        let w = &self.weights;
        let text = format!(
            "{} {}",
            record.title,
            record.abstract_text.as_deref().unwrap_or_default()
        )
        .to_lowercase();

        let mut result = RelevanceScore {
            score: 0.0,
            signals: Vec::new(),
        };

        // Every record was returned by a search
        result.add("keyword_hit", w.keyword_hit);

        if any_in(&self.canonical_terms, &text) {
            result.add("canonical_term", w.canonical_term);
        }
        if self.cites_seed(record) || self.has_seed_author(record) {
            result.add("dataset_author_seed", w.dataset_author_seed);
        }
        if any_in(&self.integration_terms, &text) {
            result.add("integration_term", w.integration_term);
        }
        if any_in(&self.scope_terms, &text) {
            result.add("scope_term", w.scope_term);
        }
        if let Some(journal) = record.journal.as_deref() {
            let journal = journal.trim().to_lowercase();
            if self.journal_whitelist.iter().any(|j| *j == journal) {
                result.add("journal_whitelist", w.journal_whitelist);
            }
        }

        if any_in(&self.neg_geography, &text) {
            result.add("neg_geography", w.neg_geography);
        }
        if any_in(&self.neg_domain, &text) {
            result.add("neg_domain", w.neg_domain);
        }
        if record.title.split_whitespace().count() < SHORT_TITLE_WORDS {
            result.add("short_title", w.short_title);
        }
        if record.year.is_some_and(|year| year < self.old_before_year) {
            result.add("old_paper", w.old_paper);
        }

        result
    }

    /// Score `record` in place and report whether it survives the threshold
    ///
    /// A disabled scorer keeps everything and leaves the score unset.
    pub fn assess(&self, record: &mut CanonicalRecord) -> bool {
        if !self.enabled {
            return true;
        }
        let RelevanceScore { score, signals } = self.score(record);
        record.relevance_score = Some(score);
        let keep = score >= self.threshold;
        if !keep {
            tracing::debug!(
                title = %record.title,
                score,
                signals = ?signals,
                "record pruned as irrelevant"
            );
        }
        keep
    }

    /// Reached through a citation of a seed paper, or is a seed paper itself
    fn cites_seed(&self, record: &CanonicalRecord) -> bool {
        self.seed_pmids.iter().any(|seed| {
            record.pmid.as_deref() == Some(seed.as_str())
                || record
                    .matched_keywords
                    .iter()
                    .any(|k| k.strip_prefix("Citation to PMID:") == Some(seed.as_str()))
        })
    }

    fn has_seed_author(&self, record: &CanonicalRecord) -> bool {
        if record.authors.is_empty() {
            return false;
        }
        let authors = record.authors.join("; ").to_lowercase();
        any_in(&self.seed_authors, &authors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordBuilder, SourceKind};

    fn scorer() -> RelevanceScorer {
        RelevanceScorer::new(&RelevanceConfig::default())
    }

    #[test]
    fn test_relevant_record_scores_high() {
        let record = RecordBuilder::new(
            SourceKind::PubMed,
            "Vertical integration of physician practices into US health systems",
        )
        .abstract_text(Some(
            "We linked Medicare claims to the AHRQ Compendium of U.S. Health Systems.".to_string(),
        ))
        .journal(Some("Health Affairs".to_string()))
        .year(Some(2021))
        .build();

        let result = scorer().score(&record);
        assert_eq!(
            result.signals,
            vec![
                "keyword_hit",
                "canonical_term",
                "integration_term",
                "scope_term",
                "journal_whitelist"
            ]
        );
        assert!((result.score - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_off_topic_record_pruned() {
        let mut record = RecordBuilder::new(
            SourceKind::OpenAlex,
            "Imidazoline receptor binding in a mouse model",
        )
        .abstract_text(Some("A compendium of chemical ligands from China.".to_string()))
        .year(Some(2003))
        .build();

        // 0.5 - 1.0 - 1.0 - 0.5
        let scorer = scorer();
        assert!(!scorer.assess(&mut record));
        assert_eq!(record.relevance_score, Some(-2.0));
    }

    #[test]
    fn test_seed_citation_and_author() {
        let cited = RecordBuilder::new(SourceKind::ICite, "Hospital prices after acquisitions")
            .keyword("Citation to PMID:30674227")
            .build();
        assert!(scorer()
            .score(&cited)
            .signals
            .contains(&"dataset_author_seed"));

        let authored = RecordBuilder::new(SourceKind::PubMed, "Something about health policy today")
            .authors(vec!["Genevieve Kanter".to_string(), "Eric Shortell".to_string()])
            .build();
        assert!(scorer()
            .score(&authored)
            .signals
            .contains(&"dataset_author_seed"));
    }

    #[test]
    fn test_threshold_keeps_neutral_records() {
        let mut record = RecordBuilder::new(SourceKind::PubMed, "Notes").build();
        // keyword hit only, short title weighs nothing
        assert!(scorer().assess(&mut record));
        assert_eq!(record.relevance_score, Some(0.5));
    }

    #[test]
    fn test_disabled_scorer_keeps_everything() {
        let config = RelevanceConfig {
            enabled: false,
            ..RelevanceConfig::default()
        };
        let mut record = RecordBuilder::new(SourceKind::PubMed, "Pharmacokinetics in China").build();
        assert!(RelevanceScorer::new(&config).assess(&mut record));
        assert_eq!(record.relevance_score, None);
    }
}
