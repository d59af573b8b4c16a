//! Search term and raw record models.

use serde::{Deserialize, Serialize};

use super::SourceKind;

/// How a search term should be routed to sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermCategory {
    /// Free-text phrase, e.g. "AHRQ Compendium of U.S. Health Systems"
    Phrase,
    /// A dataset URL that only shows up inside full text
    Url,
    /// A dataset file name such as `chsp-compendium-2018.csv`
    Filename,
    /// Grant or contract acknowledgement wording
    Funding,
    /// Boolean combination of phrases, e.g. `"health system" AND compendium`
    Combination,
}

impl TermCategory {
    /// Infer the category of an unlabelled term
    pub fn infer(text: &str) -> Self {
        let lower = text.trim().to_lowercase();
        if lower.starts_with("http://")
            || lower.starts_with("https://")
            || lower.starts_with("www.")
            || lower.contains(".gov/")
        {
            TermCategory::Url
        } else if [".csv", ".xlsx", ".xls", ".pdf", ".zip"]
            .iter()
            .any(|ext| lower.ends_with(ext))
        {
            TermCategory::Filename
        } else if text.contains(" AND ") || text.contains(" OR ") {
            TermCategory::Combination
        } else if lower.contains("hhsa") || lower.contains("grant") || lower.contains("contract no") {
            TermCategory::Funding
        } else {
            TermCategory::Phrase
        }
    }

    /// Terms that only appear in document bodies
    pub fn needs_full_text_search(&self) -> bool {
        matches!(self, TermCategory::Url | TermCategory::Filename)
    }
}

/// One query term supplied to a collection run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchTerm {
    pub text: String,
    pub category: TermCategory,
}

impl SearchTerm {
    /// Create a term, inferring its category from the text
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into().trim().to_string();
        let category = TermCategory::infer(&text);
        Self { text, category }
    }

    /// Create a term with an explicit category
    pub fn with_category(text: impl Into<String>, category: TermCategory) -> Self {
        Self {
            text: text.into().trim().to_string(),
            category,
        }
    }
}

impl std::fmt::Display for SearchTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// Source payload, opaque to everything but the normalizer
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// One JSON object as returned by a REST API
    Json(serde_json::Value),
    /// One XML element (e.g. a single `<PubmedArticle>`)
    Xml(String),
}

/// A candidate record as returned by one source for one query
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub source: SourceKind,

    /// The keyword the record was found with
    pub matched_term: String,

    pub payload: RawPayload,
}

impl RawRecord {
    pub fn json(source: SourceKind, matched_term: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            source,
            matched_term: matched_term.into(),
            payload: RawPayload::Json(value),
        }
    }

    pub fn xml(source: SourceKind, matched_term: impl Into<String>, xml: impl Into<String>) -> Self {
        Self {
            source,
            matched_term: matched_term.into(),
            payload: RawPayload::Xml(xml.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_category_inference() {
        assert_eq!(
            TermCategory::infer("https://www.ahrq.gov/chsp/data-resources/compendium.html"),
            TermCategory::Url
        );
        assert_eq!(
            TermCategory::infer("ahrq.gov/chsp/compendium"),
            TermCategory::Url
        );
        assert_eq!(
            TermCategory::infer("chsp-compendium-2018.csv"),
            TermCategory::Filename
        );
        assert_eq!(
            TermCategory::infer("HHSA290201600001C"),
            TermCategory::Funding
        );
        assert_eq!(
            TermCategory::infer("AHRQ Compendium of U.S. Health Systems"),
            TermCategory::Phrase
        );
        assert_eq!(
            TermCategory::infer("\"health system\" AND compendium"),
            TermCategory::Combination
        );
    }

    #[test]
    fn test_search_term_trims() {
        let term = SearchTerm::new("  AHRQ Compendium ");
        assert_eq!(term.text, "AHRQ Compendium");
        assert_eq!(term.category, TermCategory::Phrase);
        assert!(!term.category.needs_full_text_search());
        assert!(TermCategory::Url.needs_full_text_search());
    }
}
