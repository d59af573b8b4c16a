//! Semantic Scholar source using the Graph API.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;

use super::{ensure_success, Page, PageCursor, Source, SourceCapabilities, SourceError};
use crate::config::SemanticScholarConfig;
use crate::models::{RawRecord, SearchTerm, SourceKind};
use crate::utils::{HttpClient, Throttle};

const PAPER_FIELDS: &str =
    "title,year,url,externalIds,venue,abstract,isOpenAccess,openAccessPdf,citationCount,authors";

/// Semantic Scholar source
///
/// Snippet search finds papers whose body text mentions the term, which makes
/// this the only source that can answer URL and file-name terms. Matching
/// papers are then resolved in batches through `paper/batch`. Requests are
/// spaced by a fixed minimum interval.
#[derive(Debug)]
pub struct SemanticScholarSource {
    client: HttpClient,
    throttle: Throttle,
    base_url: String,
    api_key: Option<String>,
    snippet_limit: usize,
    batch_size: usize,
}

#[derive(Debug, Deserialize)]
struct SnippetResponse {
    #[serde(default)]
    data: Vec<SnippetMatch>,
}

#[derive(Debug, Deserialize)]
struct SnippetMatch {
    paper: Option<SnippetPaper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnippetPaper {
    paper_id: Option<String>,
    corpus_id: Option<serde_json::Value>,
}

impl SnippetPaper {
    /// An id accepted by `paper/batch`
    fn batch_id(&self) -> Option<String> {
        if let Some(id) = self.paper_id.as_deref().filter(|id| !id.is_empty()) {
            return Some(id.to_string());
        }
        match &self.corpus_id {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Some(format!("CorpusId:{}", s)),
            Some(serde_json::Value::Number(n)) => Some(format!("CorpusId:{}", n)),
            _ => None,
        }
    }
}

impl SemanticScholarSource {
    pub fn new(config: &SemanticScholarConfig, contact: Option<&str>) -> Result<Self, SourceError> {
        let throttle = Throttle::min_interval(config.min_interval())
            .map_err(|e| SourceError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            client: HttpClient::new(contact)?,
            throttle,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            snippet_limit: config.snippet_limit.clamp(1, 1000),
            batch_size: config.batch_size.clamp(1, 500),
        })
    }

    /// Add API key to request headers if available
    fn add_api_key_if_present(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    /// Distinct paper ids whose full text matches `term`, in ranking order
    async fn snippet_search(&self, term: &str, limit: usize) -> Result<Vec<String>, SourceError> {
        let url = format!(
            "{}/snippet/search?query={}&limit={}",
            self.base_url,
            urlencoding::encode(term),
            limit
        );

        self.throttle.acquire().await?;
        let response = self
            .add_api_key_if_present(self.client.get(&url))
            .send()
            .await?;
        let data: SnippetResponse = ensure_success(response, "Semantic Scholar snippet search")?
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("Failed to parse snippet JSON: {}", e)))?;

        let mut seen = HashSet::new();
        Ok(data
            .data
            .iter()
            .filter_map(|m| m.paper.as_ref().and_then(SnippetPaper::batch_id))
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }

    async fn fetch_batch(
        &self,
        term: &SearchTerm,
        ids: &[String],
    ) -> Result<Vec<RawRecord>, SourceError> {
        let url = format!("{}/paper/batch?fields={}", self.base_url, PAPER_FIELDS);

        self.throttle.acquire().await?;
        let response = self
            .add_api_key_if_present(self.client.post(&url))
            .json(&serde_json::json!({ "ids": ids }))
            .send()
            .await?;
        let papers: Vec<serde_json::Value> = ensure_success(response, "Semantic Scholar batch")?
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("Failed to parse batch JSON: {}", e)))?;

        // Unknown ids come back as null
        Ok(papers
            .into_iter()
            .filter(|p| !p.is_null())
            .map(|p| RawRecord::json(SourceKind::SemanticScholar, term.text.clone(), p))
            .collect())
    }

    async fn resolve_chunk(
        &self,
        term: &SearchTerm,
        mut ids: Vec<String>,
        remaining: usize,
    ) -> Result<Page, SourceError> {
        if ids.is_empty() {
            return Ok(Page::last(Vec::new()));
        }
        let take = self.batch_size.min(remaining).min(ids.len()).max(1);
        let rest = ids.split_off(take);
        let records = self.fetch_batch(term, &ids).await?;
        let next = (!rest.is_empty()).then_some(PageCursor::Pending(rest));
        Ok(Page::new(records, next))
    }
}

#[async_trait]
impl Source for SemanticScholarSource {
    fn kind(&self) -> SourceKind {
        SourceKind::SemanticScholar
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::KEYWORD_SEARCH | SourceCapabilities::FULL_TEXT_SEARCH
    }

    async fn fetch_page(
        &self,
        term: &SearchTerm,
        cursor: &PageCursor,
        remaining: usize,
    ) -> Result<Page, SourceError> {
        match cursor {
            PageCursor::Start => {
                let limit = self.snippet_limit.min(remaining).max(1);
                let ids = self.snippet_search(&term.text, limit).await?;
                tracing::debug!(term = %term, papers = ids.len(), "snippet search matched");
                self.resolve_chunk(term, ids, remaining).await
            }
            PageCursor::Pending(ids) => self.resolve_chunk(term, ids.clone(), remaining).await,
            other => Err(SourceError::InvalidRequest(format!(
                "unexpected Semantic Scholar cursor {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn source(base_url: String, batch_size: usize) -> SemanticScholarSource {
        let config = SemanticScholarConfig {
            base_url,
            api_key: Some("s2-key".to_string()),
            min_interval_ms: 1,
            batch_size,
            ..SemanticScholarConfig::default()
        };
        SemanticScholarSource::new(&config, None).unwrap()
    }

    #[test]
    fn test_batch_id_prefers_paper_id() {
        let with_id = SnippetPaper {
            paper_id: Some("abc".to_string()),
            corpus_id: Some(json!(1)),
        };
        let corpus_only = SnippetPaper {
            paper_id: None,
            corpus_id: Some(json!("271234")),
        };
        assert_eq!(with_id.batch_id().as_deref(), Some("abc"));
        assert_eq!(corpus_only.batch_id().as_deref(), Some("CorpusId:271234"));
    }

    #[tokio::test]
    async fn test_snippet_search_then_batches() {
        let mut server = mockito::Server::new_async().await;
        let snippets = server
            .mock("GET", "/snippet/search")
            .match_query(Matcher::UrlEncoded(
                "query".into(),
                "ahrq.gov/chsp".into(),
            ))
            .match_header("x-api-key", "s2-key")
            .with_body(
                json!({"data": [
                    {"paper": {"corpusId": "1"}, "snippet": {"text": "see ahrq.gov/chsp"}},
                    {"paper": {"corpusId": "1"}, "snippet": {"text": "again"}},
                    {"paper": {"corpusId": "2"}},
                    {"paper": {"corpusId": "3"}}
                ]})
                .to_string(),
            )
            .create_async()
            .await;
        let first_batch = server
            .mock("POST", "/paper/batch")
            .match_query(Matcher::Any)
            .match_body(Matcher::Json(json!({"ids": ["CorpusId:1", "CorpusId:2"]})))
            .with_body(json!([{"paperId": "p1", "title": "One"}, null]).to_string())
            .create_async()
            .await;
        let second_batch = server
            .mock("POST", "/paper/batch")
            .match_query(Matcher::Any)
            .match_body(Matcher::Json(json!({"ids": ["CorpusId:3"]})))
            .with_body(json!([{"paperId": "p3", "title": "Three"}]).to_string())
            .create_async()
            .await;

        let source = source(server.url(), 2);
        let term = SearchTerm::new("ahrq.gov/chsp");

        let page = source.fetch_page(&term, &PageCursor::Start, 50).await.unwrap();
        assert_eq!(page.records.len(), 1);
        let next = page.next.unwrap();
        assert_eq!(next, PageCursor::Pending(vec!["CorpusId:3".to_string()]));

        let page = source.fetch_page(&term, &next, 49).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert!(page.next.is_none());

        snippets.assert_async().await;
        first_batch.assert_async().await;
        second_batch.assert_async().await;
    }

    #[tokio::test]
    async fn test_no_snippets_ends_stream() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/snippet/search")
            .match_query(Matcher::Any)
            .with_body(json!({"data": []}).to_string())
            .create_async()
            .await;

        let source = source(server.url(), 100);
        let page = source
            .fetch_page(&SearchTerm::new("chsp-compendium-2018.csv"), &PageCursor::Start, 10)
            .await
            .unwrap();
        assert!(page.records.is_empty());
        assert!(page.next.is_none());
    }
}
