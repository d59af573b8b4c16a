//! Semantic Scholar Graph API paper objects into canonical records.

use serde::Deserialize;

use super::{clean_text, normalize_doi, normalize_pmid, year_from_json, NormalizeError};
use crate::models::{CanonicalRecord, RecordBuilder, SourceKind};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    paper_id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    year: serde_json::Value,
    url: Option<String>,
    venue: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    external_ids: Option<ExternalIds>,
    open_access_pdf: Option<OpenAccessPdf>,
    citation_count: Option<u32>,
    #[serde(default)]
    authors: Vec<S2Author>,
}

#[derive(Debug, Deserialize)]
struct ExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(rename = "PubMed")]
    pubmed: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAccessPdf {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S2Author {
    name: Option<String>,
}

pub(super) fn normalize(
    value: &serde_json::Value,
    matched_term: &str,
) -> Result<CanonicalRecord, NormalizeError> {
    let paper = S2Paper::deserialize(value).map_err(|e| NormalizeError::Parse {
        kind: SourceKind::SemanticScholar,
        message: format!("JSON: {}", e),
    })?;

    let ids = paper.external_ids.as_ref();
    let url = paper.url.clone().or_else(|| {
        paper
            .paper_id
            .as_ref()
            .map(|id| format!("https://www.semanticscholar.org/paper/{}", id))
    });

    Ok(
        RecordBuilder::new(
            SourceKind::SemanticScholar,
            paper.title.as_deref().map(clean_text).unwrap_or_default(),
        )
        .doi(ids.and_then(|i| i.doi.as_deref()).and_then(normalize_doi))
        .pmid(ids.and_then(|i| i.pubmed.as_deref()).and_then(normalize_pmid))
        .year(year_from_json(&paper.year))
        .keyword(matched_term)
        .abstract_text(paper.abstract_text.as_deref().map(clean_text))
        .authors(paper.authors.into_iter().filter_map(|a| a.name).collect())
        .journal(paper.venue)
        .url(url)
        .oa_url(paper.open_access_pdf.and_then(|pdf| pdf.url))
        .cited_by_count(paper.citation_count)
        .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_semantic_paper() {
        let paper = json!({
            "paperId": "649def34f8be52c8b66281af98ae884c09aef38b",
            "title": "Health System Consolidation Trends",
            "year": 2024,
            "externalIds": {"DOI": "10.1001/EXAMPLE.2024.1", "PubMed": "31234567"},
            "venue": "JAMA",
            "abstract": null,
            "openAccessPdf": {"url": "https://example.org/s2.pdf", "status": "GREEN"},
            "citationCount": 3,
            "authors": [{"authorId": "1", "name": "B. Author"}]
        });

        let record = normalize(&paper, "Compendium of US Health Systems").unwrap();
        assert_eq!(record.doi.as_deref(), Some("10.1001/example.2024.1"));
        assert_eq!(record.pmid.as_deref(), Some("31234567"));
        assert_eq!(record.year, Some(2024));
        assert_eq!(record.abstract_text, None);
        assert_eq!(record.oa_url.as_deref(), Some("https://example.org/s2.pdf"));
        assert_eq!(
            record.url.as_deref(),
            Some("https://www.semanticscholar.org/paper/649def34f8be52c8b66281af98ae884c09aef38b")
        );
    }
}
