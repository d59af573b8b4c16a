//! NIH iCite citation traversal.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

use super::{ensure_success, Page, PageCursor, Source, SourceCapabilities, SourceError};
use crate::config::ICiteConfig;
use crate::models::{RawRecord, SearchTerm, SourceKind};
use crate::utils::{HttpClient, Throttle};

/// iCite source
///
/// Collects every paper citing one of the configured seed PMIDs, whatever the
/// search term. Pending work is carried in the cursor as `seed:citing` pairs
/// so each record can name the seed it was reached from.
#[derive(Debug)]
pub struct ICiteSource {
    client: HttpClient,
    throttle: Throttle,
    base_url: String,
    seeds: Vec<String>,
    batch_size: usize,
}

#[derive(Debug, Deserialize)]
struct SeedPub {
    #[serde(default)]
    cited_by: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PubsResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

fn pmid_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().map(|n| n.to_string()),
        serde_json::Value::String(s) if s.chars().all(|c| c.is_ascii_digit()) && !s.is_empty() => {
            Some(s.clone())
        }
        _ => None,
    }
}

fn pending_entry(seed: &str, citing: &str) -> String {
    format!("{}:{}", seed, citing)
}

fn split_entry(entry: &str) -> Option<(&str, &str)> {
    entry.split_once(':')
}

impl ICiteSource {
    pub fn new(config: &ICiteConfig, contact: Option<&str>) -> Result<Self, SourceError> {
        let seeds: Vec<String> = config
            .seed_pmids
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if seeds.is_empty() {
            return Err(SourceError::InvalidRequest(
                "iCite needs at least one seed PMID".to_string(),
            ));
        }
        let throttle = Throttle::per_second(config.requests_per_second)
            .map_err(|e| SourceError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            client: HttpClient::new(contact)?,
            throttle,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            seeds,
            batch_size: config.batch_size.clamp(1, 1000),
        })
    }

    /// `seed:citing` pairs for every seed, each citing PMID listed once
    async fn discover(&self) -> Result<Vec<String>, SourceError> {
        let mut seen = HashSet::new();
        let mut pending = Vec::new();

        for seed in &self.seeds {
            self.throttle.acquire().await?;
            let url = format!("{}/pubs/{}", self.base_url, urlencoding::encode(seed));
            let response = self.client.get(&url).send().await?;
            let publication: SeedPub = ensure_success(response, "iCite")?
                .json()
                .await
                .map_err(|e| SourceError::Parse(format!("Failed to parse iCite JSON: {}", e)))?;

            let citing: Vec<String> = publication.cited_by.iter().filter_map(pmid_string).collect();
            tracing::info!(seed = %seed, citing = citing.len(), "iCite seed resolved");
            pending.extend(
                citing
                    .into_iter()
                    .filter(|pmid| seen.insert(pmid.clone()))
                    .map(|pmid| pending_entry(seed, &pmid)),
            );
        }

        Ok(pending)
    }

    async fn resolve_chunk(&self, mut pending: Vec<String>, remaining: usize) -> Result<Page, SourceError> {
        if pending.is_empty() {
            return Ok(Page::last(Vec::new()));
        }
        let take = self.batch_size.min(remaining).min(pending.len()).max(1);
        let rest = pending.split_off(take);

        let seed_of: HashMap<&str, &str> = pending
            .iter()
            .filter_map(|entry| split_entry(entry))
            .map(|(seed, citing)| (citing, seed))
            .collect();
        let pmids: Vec<&str> = seed_of.keys().copied().collect();

        self.throttle.acquire().await?;
        let url = format!("{}/pubs?pmids={}", self.base_url, pmids.join(","));
        let response = self.client.get(&url).send().await?;
        let data: PubsResponse = ensure_success(response, "iCite")?
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("Failed to parse iCite JSON: {}", e)))?;

        let records = data
            .data
            .into_iter()
            .map(|publication| {
                let seed = publication
                    .get("pmid")
                    .and_then(pmid_string)
                    .and_then(|pmid| seed_of.get(pmid.as_str()).copied())
                    .unwrap_or(self.seeds[0].as_str());
                RawRecord::json(
                    SourceKind::ICite,
                    format!("Citation to PMID:{}", seed),
                    publication,
                )
            })
            .collect();

        let next = (!rest.is_empty()).then_some(PageCursor::Pending(rest));
        Ok(Page::new(records, next))
    }
}

#[async_trait]
impl Source for ICiteSource {
    fn kind(&self) -> SourceKind {
        SourceKind::ICite
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::CITATION_GRAPH
    }

    async fn fetch_page(
        &self,
        _term: &SearchTerm,
        cursor: &PageCursor,
        remaining: usize,
    ) -> Result<Page, SourceError> {
        match cursor {
            PageCursor::Start => {
                let pending = self.discover().await?;
                self.resolve_chunk(pending, remaining).await
            }
            PageCursor::Pending(pending) => self.resolve_chunk(pending.clone(), remaining).await,
            other => Err(SourceError::InvalidRequest(format!(
                "unexpected iCite cursor {:?}",
                other
            ))),
        }
    }
}
