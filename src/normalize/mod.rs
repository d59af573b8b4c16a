//! Record normalization: source payloads into canonical, single-provenance records.
//!
//! Every source gets exactly one normalization function in its own submodule;
//! source-specific field access never leaves that function. Everything here is
//! pure: no I/O, no clocks, no shared state.

mod icite;
mod openalex;
mod pubmed;
mod semantic;

use crate::models::{CanonicalRecord, RawPayload, RawRecord, SourceKind};

/// Why a raw record could not be normalized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// The payload did not match the source's documented schema
    #[error("{kind} payload could not be parsed: {message}")]
    Parse { kind: SourceKind, message: String },

    /// The payload format does not belong to this source (e.g. XML given to a JSON source)
    #[error("{kind} expected a {expected} payload")]
    UnexpectedPayload {
        kind: SourceKind,
        expected: &'static str,
    },

    /// Neither a title nor an identifier was present
    #[error("{kind} record has no title, DOI or PMID")]
    MissingIdentity { kind: SourceKind },
}

/// Normalize one raw record into an unmerged canonical record
pub fn normalize(raw: &RawRecord) -> Result<CanonicalRecord, NormalizeError> {
    let record = match raw.source {
        SourceKind::PubMed => pubmed::normalize(expect_xml(raw)?, &raw.matched_term)?,
        SourceKind::OpenAlex => openalex::normalize(expect_json(raw)?, &raw.matched_term)?,
        SourceKind::SemanticScholar => semantic::normalize(expect_json(raw)?, &raw.matched_term)?,
        SourceKind::ICite => icite::normalize(expect_json(raw)?, &raw.matched_term)?,
    };

    if record.title.is_empty() && record.doi.is_none() && record.pmid.is_none() {
        return Err(NormalizeError::MissingIdentity { kind: raw.source });
    }

    Ok(record)
}

fn expect_json(raw: &RawRecord) -> Result<&serde_json::Value, NormalizeError> {
    match &raw.payload {
        RawPayload::Json(value) => Ok(value),
        RawPayload::Xml(_) => Err(NormalizeError::UnexpectedPayload {
            kind: raw.source,
            expected: "JSON",
        }),
    }
}

fn expect_xml(raw: &RawRecord) -> Result<&str, NormalizeError> {
    match &raw.payload {
        RawPayload::Xml(xml) => Ok(xml),
        RawPayload::Json(_) => Err(NormalizeError::UnexpectedPayload {
            kind: raw.source,
            expected: "XML",
        }),
    }
}

const DOI_PREFIXES: [&str; 7] = [
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi.org/",
    "dx.doi.org/",
    "doi:",
];

/// Canonicalize a DOI: lower-case, URL prefix stripped, must look like `10.x/y`
pub fn normalize_doi(raw: &str) -> Option<String> {
    let mut doi = raw.trim().to_lowercase();
    for prefix in DOI_PREFIXES {
        if let Some(rest) = doi.strip_prefix(prefix) {
            doi = rest.trim().to_string();
            break;
        }
    }

    if doi.contains('%') {
        if let Ok(decoded) = urlencoding::decode(&doi) {
            doi = decoded.into_owned();
        }
    }

    let doi = doi.trim_end_matches(['.', ',', ';']).to_string();
    if doi.starts_with("10.") && doi.contains('/') && !doi.contains(char::is_whitespace) {
        Some(doi)
    } else {
        None
    }
}

/// Extract a PMID from a bare number, `PMID:` label or PubMed URL
pub fn normalize_pmid(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let candidate = trimmed.rsplit('/').next().unwrap_or(trimmed);
    let candidate = candidate
        .trim()
        .trim_start_matches("PMID:")
        .trim_start_matches("pmid:")
        .trim();

    if !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_digit()) {
        Some(candidate.trim_start_matches('0').to_string()).filter(|p| !p.is_empty())
    } else {
        None
    }
}

/// Case-fold, strip punctuation and collapse whitespace
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

const YEAR_RANGE: std::ops::RangeInclusive<i64> = 1800..=2100;

/// Accept an integer year only when it is plausible
pub fn year_from_int(year: i64) -> Option<i32> {
    if YEAR_RANGE.contains(&year) {
        i32::try_from(year).ok()
    } else {
        None
    }
}

/// Parse a year from free text
///
/// The first run of digits must be a plausible 4-digit year
/// (`"2019 Jan-Feb"`, `"2019-05-01"`). Anything else, including
/// `"in press"`, yields `None` rather than a guess.
pub fn parse_year(raw: &str) -> Option<i32> {
    let digits: String = raw
        .trim()
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();

    if digits.len() != 4 {
        return None;
    }
    digits.parse::<i64>().ok().and_then(year_from_int)
}

/// Year from a JSON value that may be a number or a string
pub(crate) fn year_from_json(value: &serde_json::Value) -> Option<i32> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().and_then(year_from_int),
        serde_json::Value::String(s) => parse_year(s),
        _ => None,
    }
}

/// Collapse runs of whitespace in free text (titles, abstracts)
pub(crate) fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
