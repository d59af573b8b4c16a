//! NIH iCite publication objects into canonical records.

use serde::Deserialize;

use super::{clean_text, normalize_doi, normalize_pmid, year_from_json, NormalizeError};
use crate::models::{CanonicalRecord, RecordBuilder, SourceKind};

#[derive(Debug, Deserialize)]
struct ICitePub {
    #[serde(default)]
    pmid: serde_json::Value,
    doi: Option<String>,
    title: Option<String>,
    #[serde(default)]
    year: serde_json::Value,
    journal: Option<String>,
    /// A comma-separated string in most responses, a list in newer ones
    #[serde(default)]
    authors: serde_json::Value,
    citation_count: Option<u32>,
}

fn author_list(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) => s.split(',').map(|a| a.trim().to_string()).collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Object(obj) => obj
                    .get("fullName")
                    .or_else(|| obj.get("name"))
                    .and_then(|n| n.as_str())
                    .map(str::to_string),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub(super) fn normalize(
    value: &serde_json::Value,
    matched_term: &str,
) -> Result<CanonicalRecord, NormalizeError> {
    let publication = ICitePub::deserialize(value).map_err(|e| NormalizeError::Parse {
        kind: SourceKind::ICite,
        message: format!("JSON: {}", e),
    })?;

    let pmid = match &publication.pmid {
        serde_json::Value::Number(n) => n.as_u64().map(|n| n.to_string()),
        serde_json::Value::String(s) => normalize_pmid(s),
        _ => None,
    };
    let url = pmid
        .as_ref()
        .map(|p| format!("https://pubmed.ncbi.nlm.nih.gov/{}/", p));

    Ok(RecordBuilder::new(
        SourceKind::ICite,
        publication.title.as_deref().map(clean_text).unwrap_or_default(),
    )
    .doi(publication.doi.as_deref().and_then(normalize_doi))
    .pmid(pmid)
    .year(year_from_json(&publication.year))
    .keyword(matched_term)
    .authors(author_list(&publication.authors))
    .journal(publication.journal)
    .url(url)
    .cited_by_count(publication.citation_count)
    .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_icite_pub() {
        let publication = json!({
            "pmid": 33445566,
            "doi": "10.1377/hlthaff.2020.01234",
            "title": "Vertical Integration and Physician Prices",
            "authors": "Jane Doe, John Roe",
            "year": 2021,
            "journal": "Health Aff (Millwood)",
            "citation_count": 7,
            "cited_by": [1, 2]
        });

        let record = normalize(&publication, "Citation to PMID:30674227").unwrap();
        assert_eq!(record.pmid.as_deref(), Some("33445566"));
        assert_eq!(record.doi.as_deref(), Some("10.1377/hlthaff.2020.01234"));
        assert_eq!(record.authors, vec!["Jane Doe", "John Roe"]);
        assert_eq!(record.year, Some(2021));
        assert!(record.matched_keywords.contains("Citation to PMID:30674227"));
    }
}
