//! Canonical record model: one real-world scholarly work after normalization and merge.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::normalize::normalize_title;

/// The bibliographic source a record was collected from
///
/// Variant order doubles as merge precedence: when two equally rich records
/// disagree, the one from the earlier source wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    PubMed,
    OpenAlex,
    SemanticScholar,
    ICite,
}

impl SourceKind {
    /// Every source, in precedence order
    pub const ALL: [SourceKind; 4] = [
        SourceKind::PubMed,
        SourceKind::OpenAlex,
        SourceKind::SemanticScholar,
        SourceKind::ICite,
    ];

    /// Returns the display name of the source
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::PubMed => "PubMed",
            SourceKind::OpenAlex => "OpenAlex",
            SourceKind::SemanticScholar => "Semantic Scholar",
            SourceKind::ICite => "NIH iCite",
        }
    }

    /// Returns the source identifier (used in configuration and logs)
    pub fn id(&self) -> &'static str {
        match self {
            SourceKind::PubMed => "pubmed",
            SourceKind::OpenAlex => "openalex",
            SourceKind::SemanticScholar => "semantic_scholar",
            SourceKind::ICite => "icite",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Outcome of usage classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsageVerdict {
    /// No stage could reach a decision; surfaced for manual review
    #[default]
    Undetermined,
    MentionOnly,
    DataUsed,
}

impl UsageVerdict {
    fn rank(self) -> u8 {
        match self {
            UsageVerdict::Undetermined => 0,
            UsageVerdict::MentionOnly => 1,
            UsageVerdict::DataUsed => 2,
        }
    }

    /// The more decisive of two verdicts (`DataUsed` > `MentionOnly` > `Undetermined`)
    pub fn strongest(self, other: UsageVerdict) -> UsageVerdict {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    pub fn is_determined(&self) -> bool {
        !matches!(self, UsageVerdict::Undetermined)
    }
}

impl std::fmt::Display for UsageVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            UsageVerdict::Undetermined => "UNDETERMINED",
            UsageVerdict::MentionOnly => "MENTION_ONLY",
            UsageVerdict::DataUsed => "DATA_USED",
        };
        f.write_str(label)
    }
}

/// SHA-256 digest rendered as 64 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash extracted plain text
    pub fn of_text(text: &str) -> Self {
        Self::of_bytes(text.as_bytes())
    }

    /// Hash an arbitrary byte payload (e.g. a downloaded document body)
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Accept a previously rendered digest, rejecting anything that is not 64 hex chars
    pub fn parse(hex: &str) -> Option<Self> {
        let hex = hex.trim().to_ascii_lowercase();
        if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(Self(hex))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which text a classification decision was made on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextOrigin {
    FullText,
    Abstract,
    Title,
}

/// How a verdict was reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum EvidenceMethod {
    /// A deterministic pattern rule fired
    Pattern { rule: String },
    /// The statistical fallback produced a usage probability
    Statistical { score: f64 },
}

/// Audit trail attached to a classified record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvidence {
    pub method: EvidenceMethod,

    /// Text window around the match (empty for statistical decisions)
    pub snippet: String,

    /// Character offset of the match within the classified text
    pub position: usize,

    pub origin: TextOrigin,
}

/// The unit of truth after normalization and merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Lower-cased DOI without URL prefix
    pub doi: Option<String>,

    pub pmid: Option<String>,

    pub title: String,

    /// Case-folded, punctuation-stripped, whitespace-collapsed title
    pub normalized_title: String,

    pub year: Option<i32>,

    /// Provenance; grows on merge, never shrinks
    pub sources: BTreeSet<SourceKind>,

    pub matched_keywords: BTreeSet<String>,

    /// Open-access full-text location hint
    pub oa_url: Option<String>,

    pub full_text_hash: Option<ContentHash>,

    pub usage_verdict: UsageVerdict,

    pub evidence_snippet: Option<String>,

    pub evidence: Option<UsageEvidence>,

    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,

    pub authors: Vec<String>,

    pub journal: Option<String>,

    /// Landing page URL
    pub url: Option<String>,

    pub cited_by_count: Option<u32>,

    /// Rank & prune score, when scoring ran
    pub relevance_score: Option<f64>,
}

impl CanonicalRecord {
    /// Create a single-provenance record with the required fields
    pub fn new(source: SourceKind, title: impl Into<String>) -> Self {
        let title = title.into().trim().to_string();
        Self {
            normalized_title: normalize_title(&title),
            title,
            doi: None,
            pmid: None,
            year: None,
            sources: BTreeSet::from([source]),
            matched_keywords: BTreeSet::new(),
            oa_url: None,
            full_text_hash: None,
            usage_verdict: UsageVerdict::Undetermined,
            evidence_snippet: None,
            evidence: None,
            abstract_text: None,
            authors: Vec::new(),
            journal: None,
            url: None,
            cited_by_count: None,
            relevance_score: None,
        }
    }

    /// Number of populated descriptive fields; the richer record wins a merge
    pub fn richness(&self) -> usize {
        [
            self.doi.is_some(),
            self.pmid.is_some(),
            !self.title.is_empty(),
            self.year.is_some(),
            self.abstract_text.is_some(),
            !self.authors.is_empty(),
            self.journal.is_some(),
            self.url.is_some(),
            self.oa_url.is_some(),
            self.cited_by_count.is_some(),
        ]
        .iter()
        .filter(|populated| **populated)
        .count()
    }

    /// Best metadata text available for classification without full text
    pub fn metadata_text(&self) -> Option<(&str, TextOrigin)> {
        if let Some(abstract_text) = self.abstract_text.as_deref().filter(|a| !a.trim().is_empty()) {
            return Some((abstract_text, TextOrigin::Abstract));
        }
        if self.title.trim().is_empty() {
            None
        } else {
            Some((self.title.as_str(), TextOrigin::Title))
        }
    }

    /// Record a classification outcome, keeping the more decisive verdict
    pub fn apply_verdict(&mut self, verdict: UsageVerdict, evidence: Option<UsageEvidence>) {
        let current = self.usage_verdict;
        if verdict.strongest(current) == current && current.is_determined() {
            return;
        }
        self.usage_verdict = verdict.strongest(current);
        if let Some(evidence) = evidence {
            self.evidence_snippet = Some(evidence.snippet.clone()).filter(|s| !s.is_empty());
            self.evidence = Some(evidence);
        }
    }

    /// Stable ordering key for output and comparisons
    pub fn sort_key(&self) -> (Option<&str>, &str, Option<i32>, Option<&str>) {
        (
            self.doi.as_deref(),
            self.normalized_title.as_str(),
            self.year,
            self.pmid.as_deref(),
        )
    }
}

/// Builder for constructing CanonicalRecord objects
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    record: CanonicalRecord,
}

impl RecordBuilder {
    pub fn new(source: SourceKind, title: impl Into<String>) -> Self {
        Self {
            record: CanonicalRecord::new(source, title),
        }
    }

    pub fn doi(mut self, doi: Option<String>) -> Self {
        self.record.doi = doi;
        self
    }

    pub fn pmid(mut self, pmid: Option<String>) -> Self {
        self.record.pmid = pmid;
        self
    }

    pub fn year(mut self, year: Option<i32>) -> Self {
        self.record.year = year;
        self
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        let keyword = keyword.into();
        if !keyword.trim().is_empty() {
            self.record.matched_keywords.insert(keyword);
        }
        self
    }

    pub fn oa_url(mut self, url: Option<String>) -> Self {
        self.record.oa_url = url.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn abstract_text(mut self, text: Option<String>) -> Self {
        self.record.abstract_text = text.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.record.authors = authors
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        self
    }

    pub fn journal(mut self, journal: Option<String>) -> Self {
        self.record.journal = journal.filter(|j| !j.trim().is_empty());
        self
    }

    pub fn url(mut self, url: Option<String>) -> Self {
        self.record.url = url.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn cited_by_count(mut self, count: Option<u32>) -> Self {
        self.record.cited_by_count = count;
        self
    }

    pub fn build(self) -> CanonicalRecord {
        self.record
    }
}
