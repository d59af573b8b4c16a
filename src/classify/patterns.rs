//! Deterministic pattern pass.

use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

use super::{ClassificationStage, ClassifierError, StageOpinion};
use crate::models::{EvidenceMethod, TextOrigin, UsageEvidence, UsageVerdict};

static URL_EMBED: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"ahrq\.gov/(?:data/)?chsp")
        .case_insensitive(true)
        .build()
        .expect("static regex: url_embed")
});

static VERB_PROXIMITY: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(
        r"\b(?:used|using|use|leveraged|merged|linked|combined|drew\s+on|relied\s+on|obtained|derived)\b(?:\W+\w+){0,5}?\W+compendium\b|\bcompendium\b(?:\W+\w+){0,6}?\W+(?:was|were)\s+(?:used|leveraged|merged|linked|combined|obtained)\b",
    )
    .case_insensitive(true)
    .build()
    .expect("static regex: verb_proximity")
});

static DATASET_BRIEF_FILE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(
        r"chsp[-_](?:compendium|hospital[-_]linkage|system[-_]list|brief)[\w-]*\.(?:csv|xlsx?|pdf)",
    )
    .case_insensitive(true)
    .build()
    .expect("static regex: dataset_brief_file")
});

/// One named usage pattern
#[derive(Debug, Clone)]
pub struct PatternRule {
    name: String,
    regex: Regex,
}

impl PatternRule {
    /// Compile `pattern` case-insensitively
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, ClassifierError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| ClassifierError::InvalidPattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            name: name.into(),
            regex,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Built-in rules, in tie-break order
pub fn default_rules() -> Vec<PatternRule> {
    [
        ("url_embed", &*URL_EMBED),
        ("verb_proximity", &*VERB_PROXIMITY),
        ("dataset_brief_file", &*DATASET_BRIEF_FILE),
    ]
    .into_iter()
    .map(|(name, regex)| PatternRule {
        name: name.to_string(),
        regex: regex.clone(),
    })
    .collect()
}

/// Any rule match means the dataset was used
#[derive(Debug, Clone)]
pub struct PatternStage {
    rules: Vec<PatternRule>,
    snippet_width: usize,
}

impl PatternStage {
    pub fn new(snippet_width: usize) -> Self {
        Self {
            rules: default_rules(),
            snippet_width,
        }
    }

    pub fn with_rule(mut self, rule: PatternRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Add a configured regular expression
    pub fn with_pattern(self, name: impl Into<String>, pattern: &str) -> Result<Self, ClassifierError> {
        Ok(self.with_rule(PatternRule::new(name, pattern)?))
    }

    /// Add a URL that counts as usage wherever it appears verbatim
    pub fn with_literal_url(self, url: &str) -> Result<Self, ClassifierError> {
        let url = url.trim();
        self.with_pattern(format!("literal_url:{}", url), &regex::escape(url))
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    /// Earliest match in the text; equal positions go to the earlier rule
    pub fn first_match<'t>(&self, text: &'t str) -> Option<(&PatternRule, regex::Match<'t>)> {
        self.rules
            .iter()
            .filter_map(|rule| rule.regex.find(text).map(|m| (rule, m)))
            .min_by_key(|(_, m)| m.start())
    }
}

impl ClassificationStage for PatternStage {
    fn name(&self) -> &str {
        "pattern"
    }

    fn evaluate(&self, text: &str, origin: TextOrigin) -> StageOpinion {
        match self.first_match(text) {
            Some((rule, m)) => StageOpinion::Definitive {
                verdict: UsageVerdict::DataUsed,
                evidence: Some(UsageEvidence {
                    method: EvidenceMethod::Pattern {
                        rule: rule.name.clone(),
                    },
                    snippet: snippet_window(text, m.start(), m.end(), self.snippet_width),
                    position: m.start(),
                    origin,
                }),
            },
            None => StageOpinion::NoOpinion,
        }
    }
}

/// A window of about `width` bytes centered on `start..end`, whitespace collapsed
///
/// The window is shifted inward at the text bounds and widened to the nearest
/// char boundaries, so it never splits a character.
pub fn snippet_window(text: &str, start: usize, end: usize, width: usize) -> String {
    let end = end.min(text.len());
    let start = start.min(end);
    let width = width.max(end - start);
    let slack = width - (end - start);

    let mut lo = start.saturating_sub(slack / 2);
    let mut hi = (lo + width).min(text.len());
    if hi - lo < width {
        lo = hi.saturating_sub(width);
    }
    while !text.is_char_boundary(lo) {
        lo -= 1;
    }
    while !text.is_char_boundary(hi) {
        hi += 1;
    }

    text[lo..hi].split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_for(text: &str) -> Option<String> {
        PatternStage::new(160)
            .first_match(text)
            .map(|(rule, _)| rule.name().to_string())
    }

    #[test]
    fn test_default_rules() {
        assert_eq!(
            rule_for("Files are at https://www.ahrq.gov/chsp/data-resources/compendium.html"),
            Some("url_embed".to_string())
        );
        assert_eq!(
            rule_for("We linked claims to the 2018 AHRQ Compendium of U.S. Health Systems."),
            Some("verb_proximity".to_string())
        );
        assert_eq!(
            rule_for("The Compendium of U.S. Health Systems was used to assign affiliation."),
            Some("verb_proximity".to_string())
        );
        assert_eq!(
            rule_for("see chsp-hospital-linkage-2018.csv for details"),
            Some("dataset_brief_file".to_string())
        );
        assert_eq!(rule_for("see also the AHRQ Compendium"), None);
        // Too far apart
        assert_eq!(
            rule_for("we used a long list of many other different data sources alongside the compendium"),
            None
        );
    }

    #[test]
    fn test_earliest_match_wins() {
        let text = "We relied on chsp_compendium_2016.xlsx and later visited ahrq.gov/chsp.";
        let stage = PatternStage::new(40);
        let (rule, m) = stage.first_match(text).unwrap();
        // verb_proximity needs "compendium" as a word; the file name is first
        assert_eq!(rule.name(), "dataset_brief_file");
        assert_eq!(m.start(), text.find("chsp_").unwrap());
    }

    #[test]
    fn test_scenario_snippet_centered() {
        let padding = "Background text about hospital markets. ".repeat(10);
        let text = format!(
            "{}Here, researchers used the AHRQ Compendium to classify hospitals. {}",
            padding, padding
        );
        let opinion = PatternStage::new(160).evaluate(&text, TextOrigin::FullText);

        let StageOpinion::Definitive { verdict, evidence } = opinion else {
            panic!("expected a definitive opinion");
        };
        assert_eq!(verdict, UsageVerdict::DataUsed);
        let evidence = evidence.unwrap();
        assert!(evidence.snippet.contains("used the AHRQ Compendium"));
        assert!(evidence.snippet.len() <= 160);
        assert_eq!(evidence.position, text.find("used the").unwrap());

        // Roughly equal context on both sides
        let at = evidence.snippet.find("used the AHRQ Compendium").unwrap();
        let after = evidence.snippet.len() - at - "used the AHRQ Compendium".len();
        assert!(at.abs_diff(after) <= 4);
    }

    #[test]
    fn test_snippet_window_bounds() {
        assert_eq!(snippet_window("short text", 0, 5, 160), "short text");
        let text = "é".repeat(100);
        let snippet = snippet_window(&text, 101, 103, 11);
        assert!(snippet.chars().all(|c| c == 'é'));
        assert_eq!(snippet_window("a   b\n\nc", 0, 1, 100), "a b c");
        // At the start, the window extends to the right
        assert_eq!(snippet_window("0123456789", 0, 1, 4), "0123");
        assert_eq!(snippet_window("0123456789", 9, 10, 4), "6789");
    }

    #[test]
    fn test_configured_patterns() {
        let stage = PatternStage::new(80)
            .with_literal_url("https://example.org/data?x=1")
            .unwrap();
        assert_eq!(
            stage
                .first_match("downloaded from https://example.org/data?x=1 in 2020")
                .map(|(rule, _)| rule.name().to_string()),
            Some("literal_url:https://example.org/data?x=1".to_string())
        );
        assert!(PatternStage::new(80).with_pattern("broken", "(unclosed").is_err());
    }
}
