//! OpenAlex `Work` objects into canonical records.

use serde::Deserialize;
use std::collections::HashMap;

use super::{clean_text, normalize_doi, normalize_pmid, year_from_json, NormalizeError};
use crate::models::{CanonicalRecord, RecordBuilder, SourceKind};

#[derive(Debug, Deserialize)]
struct Work {
    id: Option<String>,
    doi: Option<String>,
    title: Option<String>,
    display_name: Option<String>,
    #[serde(default)]
    publication_year: serde_json::Value,
    ids: Option<WorkIds>,
    open_access: Option<OpenAccess>,
    primary_location: Option<Location>,
    best_oa_location: Option<Location>,
    #[serde(default)]
    authorships: Vec<Authorship>,
    cited_by_count: Option<u32>,
    abstract_inverted_index: Option<HashMap<String, Vec<usize>>>,
}

#[derive(Debug, Deserialize)]
struct WorkIds {
    pmid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAccess {
    oa_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Location {
    landing_page_url: Option<String>,
    pdf_url: Option<String>,
    source: Option<LocationSource>,
}

#[derive(Debug, Deserialize)]
struct LocationSource {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Authorship {
    author: Option<AuthorRef>,
}

#[derive(Debug, Deserialize)]
struct AuthorRef {
    display_name: Option<String>,
}

/// OpenAlex ships abstracts as word → positions; rebuild the running text
fn rebuild_abstract(index: &HashMap<String, Vec<usize>>) -> Option<String> {
    let mut positioned: Vec<(usize, &str)> = index
        .iter()
        .flat_map(|(word, positions)| positions.iter().map(move |p| (*p, word.as_str())))
        .collect();
    if positioned.is_empty() {
        return None;
    }
    positioned.sort_unstable();
    Some(
        positioned
            .into_iter()
            .map(|(_, word)| word)
            .collect::<Vec<_>>()
            .join(" "),
    )
}

pub(super) fn normalize(
    value: &serde_json::Value,
    matched_term: &str,
) -> Result<CanonicalRecord, NormalizeError> {
    let work = Work::deserialize(value).map_err(|e| NormalizeError::Parse {
        kind: SourceKind::OpenAlex,
        message: format!("JSON: {}", e),
    })?;

    let title = work
        .title
        .as_deref()
        .or(work.display_name.as_deref())
        .map(clean_text)
        .unwrap_or_default();

    let pmid = work
        .ids
        .as_ref()
        .and_then(|ids| ids.pmid.as_deref())
        .and_then(normalize_pmid);

    let oa_url = work
        .best_oa_location
        .as_ref()
        .and_then(|loc| loc.pdf_url.clone())
        .or_else(|| work.open_access.as_ref().and_then(|oa| oa.oa_url.clone()));

    let primary = work.primary_location.as_ref();
    let journal = primary
        .and_then(|loc| loc.source.as_ref())
        .and_then(|s| s.display_name.clone());
    let url = primary
        .and_then(|loc| loc.landing_page_url.clone())
        .or_else(|| work.id.clone());

    let authors = work
        .authorships
        .iter()
        .filter_map(|a| a.author.as_ref().and_then(|au| au.display_name.clone()))
        .collect();

    Ok(RecordBuilder::new(SourceKind::OpenAlex, title)
        .doi(work.doi.as_deref().and_then(normalize_doi))
        .pmid(pmid)
        .year(year_from_json(&work.publication_year))
        .keyword(matched_term)
        .abstract_text(work.abstract_inverted_index.as_ref().and_then(rebuild_abstract))
        .authors(authors)
        .journal(journal)
        .url(url)
        .oa_url(oa_url)
        .cited_by_count(work.cited_by_count)
        .build())
}
