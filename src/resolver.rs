//! Identity resolution: merging normalized records that describe the same work.
//!
//! Records are ingested one at a time, in whatever order the sources deliver
//! them, and grouped by identity:
//!
//! 1. records with a DOI are grouped by exact DOI;
//! 2. records without a DOI are grouped by normalized title, split by year
//!    (a record without a year joins the earliest-year group of its title);
//!    such a group joins a DOI group when one of that group's members carries
//!    the same normalized title and the years are compatible (smallest DOI
//!    wins when several qualify);
//! 3. untitled records without a DOI are grouped by PMID.
//!
//! Groups are only folded into [`CanonicalRecord`]s at [`IdentityResolver::materialize`],
//! and members are folded in a canonical order (richest first, then source
//! precedence, then title), never arrival order. The materialized set is
//! therefore identical for every permutation of the same input.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::models::{CanonicalRecord, ContentHash, SourceKind};

/// Titles under one DOI scoring below this similarity are logged as suspicious
const DIVERGENT_TITLE_SIMILARITY: f64 = 0.8;

/// How an ingested record related to what was already known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First sighting of this identity
    Created,
    /// Joined an existing record with the same DOI
    MergedByDoi,
    /// Joined an existing record with the same normalized title and a compatible year
    MergedByTitle,
    /// Joined an existing untitled record with the same PMID
    MergedByPmid,
}

/// Single-writer store of every record seen in a run
#[derive(Debug, Default)]
pub struct IdentityResolver {
    by_doi: BTreeMap<String, Vec<CanonicalRecord>>,
    by_title: BTreeMap<String, Vec<CanonicalRecord>>,
    by_pmid: BTreeMap<String, Vec<CanonicalRecord>>,
    orphans: Vec<CanonicalRecord>,
    /// normalized title -> DOIs of records carrying it
    title_aliases: HashMap<String, BTreeSet<String>>,
    ingested: usize,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one normalized, single-provenance record
    pub fn ingest(&mut self, record: CanonicalRecord) -> MergeOutcome {
        self.ingested += 1;

        if let Some(doi) = record.doi.clone() {
            let outcome = match self.by_doi.get(&doi).and_then(|members| members.first()) {
                Some(existing) => {
                    warn_if_divergent(&doi, existing, &record);
                    MergeOutcome::MergedByDoi
                }
                None => MergeOutcome::Created,
            };
            if !record.normalized_title.is_empty() {
                self.title_aliases
                    .entry(record.normalized_title.clone())
                    .or_default()
                    .insert(doi.clone());
            }
            self.by_doi.entry(doi).or_default().push(record);
            return outcome;
        }

        if !record.normalized_title.is_empty() {
            let title = record.normalized_title.clone();
            let joins_doi = self.title_aliases.contains_key(&title);
            let joins_title = self.by_title.get(&title).is_some_and(|members| {
                members
                    .iter()
                    .any(|m| years_compatible(m.year, record.year))
            });
            self.by_title.entry(title).or_default().push(record);
            return if joins_doi || joins_title {
                MergeOutcome::MergedByTitle
            } else {
                MergeOutcome::Created
            };
        }

        match record.pmid.clone() {
            Some(pmid) => {
                let members = self.by_pmid.entry(pmid).or_default();
                let outcome = if members.is_empty() {
                    MergeOutcome::Created
                } else {
                    MergeOutcome::MergedByPmid
                };
                members.push(record);
                outcome
            }
            None => {
                self.orphans.push(record);
                MergeOutcome::Created
            }
        }
    }

    /// Number of records ingested so far
    pub fn ingested(&self) -> usize {
        self.ingested
    }

    pub fn is_empty(&self) -> bool {
        self.ingested == 0
    }

    /// Fold every identity group into one canonical record, sorted by [`CanonicalRecord::sort_key`]
    pub fn materialize(&self) -> Vec<CanonicalRecord> {
        let mut doi_groups: BTreeMap<&str, Vec<&CanonicalRecord>> = self
            .by_doi
            .iter()
            .map(|(doi, members)| (doi.as_str(), members.iter().collect()))
            .collect();
        let doi_years: HashMap<&str, Option<i32>> = self
            .by_doi
            .iter()
            .map(|(doi, members)| (doi.as_str(), folded_year(members.iter())))
            .collect();

        let mut standalone: Vec<Vec<&CanonicalRecord>> = Vec::new();

        for (title, members) in &self.by_title {
            for (year, group) in year_groups(members) {
                let target = self.title_aliases.get(title).and_then(|dois| {
                    dois.iter().find(|doi| {
                        years_compatible(year, doi_years.get(doi.as_str()).copied().flatten())
                    })
                });
                match target.and_then(|doi| doi_groups.get_mut(doi.as_str())) {
                    Some(doi_group) => doi_group.extend(group),
                    None => standalone.push(group),
                }
            }
        }
        standalone.extend(self.by_pmid.values().map(|members| members.iter().collect()));
        standalone.extend(self.orphans.iter().map(|orphan| vec![orphan]));

        let mut records: Vec<CanonicalRecord> = doi_groups
            .into_values()
            .chain(standalone)
            .filter_map(merge_records)
            .collect();
        records.sort_by(|a, b| {
            a.sort_key()
                .cmp(&b.sort_key())
                .then_with(|| fold_key(a).cmp(&fold_key(b)))
        });
        records
    }

    /// Consume the resolver, returning the canonical set
    pub fn into_records(self) -> Vec<CanonicalRecord> {
        self.materialize()
    }
}

/// Resolve a batch of normalized records in one go
pub fn resolve<I>(records: I) -> Vec<CanonicalRecord>
where
    I: IntoIterator<Item = CanonicalRecord>,
{
    let mut resolver = IdentityResolver::new();
    for record in records {
        resolver.ingest(record);
    }
    resolver.into_records()
}

/// Fold records describing one work into a single record
///
/// Members are ordered canonically first, so the result does not depend on
/// the order they are given in. Scalars keep the first non-empty value in that
/// order, provenance and keywords are unioned, and the most decisive verdict
/// (with its evidence) wins.
pub fn merge_records<'a, I>(members: I) -> Option<CanonicalRecord>
where
    I: IntoIterator<Item = &'a CanonicalRecord>,
{
    let mut ordered: Vec<&CanonicalRecord> = members.into_iter().collect();
    ordered.sort_by(|a, b| compare_canonical(a, b));

    let (first, rest) = ordered.split_first()?;
    let mut merged = (*first).clone();
    for member in rest {
        absorb(&mut merged, member);
    }
    Some(merged)
}

fn absorb(target: &mut CanonicalRecord, other: &CanonicalRecord) {
    fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
        if slot.is_none() {
            slot.clone_from(value);
        }
    }

    if target.title.is_empty() && !other.title.is_empty() {
        target.title.clone_from(&other.title);
        target.normalized_title.clone_from(&other.normalized_title);
    }
    fill(&mut target.doi, &other.doi);
    fill(&mut target.pmid, &other.pmid);
    fill(&mut target.year, &other.year);
    fill(&mut target.oa_url, &other.oa_url);
    fill(&mut target.full_text_hash, &other.full_text_hash);
    fill(&mut target.abstract_text, &other.abstract_text);
    fill(&mut target.journal, &other.journal);
    fill(&mut target.url, &other.url);
    if target.authors.is_empty() {
        target.authors.clone_from(&other.authors);
    }

    target.sources.extend(other.sources.iter().copied());
    target
        .matched_keywords
        .extend(other.matched_keywords.iter().cloned());
    target.cited_by_count = target.cited_by_count.max(other.cited_by_count);
    target.relevance_score = match (target.relevance_score, other.relevance_score) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };

    if other.usage_verdict.strongest(target.usage_verdict) != target.usage_verdict {
        target.usage_verdict = other.usage_verdict;
        target.evidence.clone_from(&other.evidence);
        target.evidence_snippet.clone_from(&other.evidence_snippet);
    }
}

type FoldKey<'a> = (
    (Reverse<usize>, Option<SourceKind>, &'a str),
    (Option<&'a str>, Option<&'a str>, Option<i32>),
    (Option<&'a str>, Option<&'a str>, Option<&'a str>, Option<&'a str>),
    (&'a [String], Option<u32>, Option<&'a str>, Option<&'a ContentHash>),
);

/// Total order used for folding: richness, source precedence, title, then every other scalar
fn fold_key(record: &CanonicalRecord) -> FoldKey<'_> {
    (
        (
            Reverse(record.richness()),
            record.sources.first().copied(),
            record.title.as_str(),
        ),
        (record.doi.as_deref(), record.pmid.as_deref(), record.year),
        (
            record.abstract_text.as_deref(),
            record.journal.as_deref(),
            record.url.as_deref(),
            record.oa_url.as_deref(),
        ),
        (
            record.authors.as_slice(),
            record.cited_by_count,
            record.evidence_snippet.as_deref(),
            record.full_text_hash.as_ref(),
        ),
    )
}

fn compare_canonical(a: &CanonicalRecord, b: &CanonicalRecord) -> Ordering {
    fold_key(a).cmp(&fold_key(b))
}

/// Year of a group once folded: the first present year in canonical order
fn folded_year<'a, I>(members: I) -> Option<i32>
where
    I: Iterator<Item = &'a CanonicalRecord>,
{
    let mut ordered: Vec<&CanonicalRecord> = members.collect();
    ordered.sort_by(|a, b| compare_canonical(a, b));
    ordered.iter().find_map(|m| m.year)
}

/// Years match when equal or when either is unknown
fn years_compatible(a: Option<i32>, b: Option<i32>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Split same-title records by year; yearless records join the earliest year
fn year_groups(members: &[CanonicalRecord]) -> Vec<(Option<i32>, Vec<&CanonicalRecord>)> {
    let mut by_year: BTreeMap<i32, Vec<&CanonicalRecord>> = BTreeMap::new();
    let mut yearless = Vec::new();
    for member in members {
        match member.year {
            Some(year) => by_year.entry(year).or_default().push(member),
            None => yearless.push(member),
        }
    }

    match by_year.values_mut().next() {
        Some(earliest) => earliest.extend(yearless),
        None => return vec![(None, yearless)],
    }
    by_year
        .into_iter()
        .map(|(year, group)| (Some(year), group))
        .collect()
}

fn warn_if_divergent(doi: &str, existing: &CanonicalRecord, incoming: &CanonicalRecord) {
    if existing.normalized_title.is_empty() || incoming.normalized_title.is_empty() {
        return;
    }
    let similarity = strsim::jaro_winkler(&existing.normalized_title, &incoming.normalized_title);
    if similarity < DIVERGENT_TITLE_SIMILARITY {
        tracing::warn!(
            doi,
            similarity,
            existing = %existing.title,
            incoming = %incoming.title,
            "merging records with divergent titles under one DOI"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EvidenceMethod, RecordBuilder, TextOrigin, UsageEvidence, UsageVerdict};

    fn record(source: SourceKind, title: &str, doi: Option<&str>, year: Option<i32>) -> CanonicalRecord {
        RecordBuilder::new(source, title)
            .doi(doi.map(str::to_string))
            .year(year)
            .keyword(format!("{} term", source.id()))
            .build()
    }

    #[test]
    fn test_same_doi_different_titles_merge() {
        let mut resolver = IdentityResolver::new();
        let a = record(
            SourceKind::PubMed,
            "Health System Consolidation",
            Some("10.1001/example.2024.1"),
            Some(2024),
        );
        let b = record(
            SourceKind::OpenAlex,
            "Health System Consolidation Trends",
            Some("10.1001/example.2024.1"),
            Some(2024),
        );

        assert_eq!(resolver.ingest(a), MergeOutcome::Created);
        assert_eq!(resolver.ingest(b), MergeOutcome::MergedByDoi);

        let records = resolver.materialize();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].sources,
            BTreeSet::from([SourceKind::PubMed, SourceKind::OpenAlex])
        );
        assert_eq!(records[0].matched_keywords.len(), 2);
        // Equal richness: PubMed precedes OpenAlex
        assert_eq!(records[0].title, "Health System Consolidation");
    }

    #[test]
    fn test_different_dois_never_merge() {
        let records = resolve(vec![
            record(SourceKind::PubMed, "Same Title", Some("10.1/a"), Some(2020)),
            record(SourceKind::OpenAlex, "Same Title", Some("10.1/b"), Some(2020)),
        ]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].doi.as_deref(), Some("10.1/a"));
    }

    #[test]
    fn test_doi_less_record_joins_doi_group_by_title() {
        let mut resolver = IdentityResolver::new();
        resolver.ingest(record(
            SourceKind::OpenAlex,
            "Hospital Mergers and Prices",
            Some("10.1/m"),
            Some(2021),
        ));
        let outcome = resolver.ingest(record(
            SourceKind::SemanticScholar,
            "Hospital mergers and prices.",
            None,
            None,
        ));
        assert_eq!(outcome, MergeOutcome::MergedByTitle);

        let records = resolver.materialize();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].doi.as_deref(), Some("10.1/m"));
        assert!(records[0].sources.contains(&SourceKind::SemanticScholar));
    }

    #[test]
    fn test_title_match_requires_compatible_year() {
        let records = resolve(vec![
            record(SourceKind::PubMed, "Annual Report", None, Some(2019)),
            record(SourceKind::OpenAlex, "Annual Report", None, Some(2020)),
            record(SourceKind::ICite, "Annual Report", None, None),
        ]);

        assert_eq!(records.len(), 2);
        // The yearless record joins the earliest year
        let earliest = records.iter().find(|r| r.year == Some(2019)).unwrap();
        assert!(earliest.sources.contains(&SourceKind::ICite));
        let later = records.iter().find(|r| r.year == Some(2020)).unwrap();
        assert_eq!(later.sources, BTreeSet::from([SourceKind::OpenAlex]));
    }

    #[test]
    fn test_yearless_title_group_joins_smallest_doi() {
        let records = resolve(vec![
            record(SourceKind::OpenAlex, "Shared Title", Some("10.9/z"), Some(2020)),
            record(SourceKind::PubMed, "Shared Title", Some("10.1/a"), Some(2018)),
            record(SourceKind::ICite, "Shared Title", None, None),
        ]);

        assert_eq!(records.len(), 2);
        let a = records.iter().find(|r| r.doi.as_deref() == Some("10.1/a")).unwrap();
        assert!(a.sources.contains(&SourceKind::ICite));
    }

    #[test]
    fn test_empty_titles_group_by_pmid() {
        let untitled = |source| {
            RecordBuilder::new(source, "")
                .pmid(Some("30674227".to_string()))
                .build()
        };
        let mut resolver = IdentityResolver::new();
        assert_eq!(resolver.ingest(untitled(SourceKind::ICite)), MergeOutcome::Created);
        assert_eq!(
            resolver.ingest(untitled(SourceKind::PubMed)),
            MergeOutcome::MergedByPmid
        );
        assert_eq!(resolver.materialize().len(), 1);
    }

    #[test]
    fn test_richer_record_wins_scalars() {
        let sparse = record(SourceKind::PubMed, "Short", Some("10.1/x"), None);
        let rich = RecordBuilder::new(SourceKind::ICite, "Full Title")
            .doi(Some("10.1/x".to_string()))
            .pmid(Some("123".to_string()))
            .year(Some(2022))
            .journal(Some("Health Affairs".to_string()))
            .build();

        let merged = merge_records([&sparse, &rich]).unwrap();
        assert_eq!(merged.title, "Full Title");
        assert_eq!(merged.normalized_title, "full title");
        assert_eq!(merged.year, Some(2022));
        assert_eq!(merged.pmid.as_deref(), Some("123"));
        assert_eq!(merge_records([&rich, &sparse]), Some(merged));
    }

    #[test]
    fn test_merge_keeps_strongest_verdict() {
        let mut used = record(SourceKind::OpenAlex, "T", Some("10.1/v"), None);
        used.apply_verdict(
            UsageVerdict::DataUsed,
            Some(UsageEvidence {
                method: EvidenceMethod::Pattern {
                    rule: "url_embed".to_string(),
                },
                snippet: "ahrq.gov/chsp".to_string(),
                position: 0,
                origin: TextOrigin::Abstract,
            }),
        );
        let mut mention = record(SourceKind::PubMed, "T", Some("10.1/v"), Some(2020));
        mention.apply_verdict(UsageVerdict::MentionOnly, None);

        let merged = merge_records([&mention, &used]).unwrap();
        assert_eq!(merged.usage_verdict, UsageVerdict::DataUsed);
        assert_eq!(merged.evidence_snippet.as_deref(), Some("ahrq.gov/chsp"));
    }

    #[test]
    fn test_materialize_is_order_independent() {
        let inputs = vec![
            record(SourceKind::PubMed, "Alpha", Some("10.1/a"), Some(2020)),
            record(SourceKind::OpenAlex, "Alpha study", Some("10.1/a"), None),
            record(SourceKind::SemanticScholar, "Alpha", None, Some(2020)),
            record(SourceKind::ICite, "Beta", None, None),
            record(SourceKind::OpenAlex, "Beta", None, Some(2017)),
        ];
        let forward = resolve(inputs.clone());
        let backward = resolve(inputs.into_iter().rev());
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 2);
    }

    #[test]
    fn test_years_compatible() {
        assert!(years_compatible(None, Some(2020)));
        assert!(years_compatible(Some(2020), Some(2020)));
        assert!(!years_compatible(Some(2019), Some(2020)));
    }
}
