//! OpenAlex source using the `/works` search endpoint.

use async_trait::async_trait;
use serde::Deserialize;

use super::{ensure_success, Page, PageCursor, Source, SourceCapabilities, SourceError};
use crate::config::OpenAlexConfig;
use crate::models::{RawRecord, SearchTerm, SourceKind};
use crate::utils::{HttpClient, Throttle};

/// OpenAlex source
///
/// Cursor-paginated `/works?search=` in the polite pool. The client is capped
/// both per second and per day; once the daily quota is spent every further
/// page fails with [`SourceError::QuotaExhausted`].
#[derive(Debug)]
pub struct OpenAlexSource {
    client: HttpClient,
    throttle: Throttle,
    base_url: String,
    email: String,
    page_size: usize,
}

#[derive(Debug, Deserialize)]
struct WorksResponse {
    meta: Meta,
    #[serde(default)]
    results: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    next_cursor: Option<String>,
}

impl OpenAlexSource {
    /// Create an OpenAlex client; the polite pool needs a contact email
    pub fn new(config: &OpenAlexConfig, contact: Option<&str>) -> Result<Self, SourceError> {
        let email = contact.ok_or_else(|| {
            SourceError::Unauthorized("OpenAlex polite pool requires a contact email".to_string())
        })?;
        let throttle = Throttle::per_second(config.requests_per_second)
            .map_err(|e| SourceError::InvalidRequest(e.to_string()))?
            .with_daily_quota(config.daily_quota);

        Ok(Self {
            client: HttpClient::new(Some(email))?,
            throttle,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: email.to_string(),
            page_size: config.page_size.clamp(1, 200),
        })
    }

    fn build_search_url(&self, term: &str, cursor: &str, per_page: usize) -> String {
        format!(
            "{}/works?search={}&per-page={}&cursor={}&mailto={}",
            self.base_url,
            urlencoding::encode(term),
            per_page,
            urlencoding::encode(cursor),
            urlencoding::encode(&self.email)
        )
    }
}

#[async_trait]
impl Source for OpenAlexSource {
    fn kind(&self) -> SourceKind {
        SourceKind::OpenAlex
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::KEYWORD_SEARCH | SourceCapabilities::REQUIRES_CONTACT
    }

    async fn fetch_page(
        &self,
        term: &SearchTerm,
        cursor: &PageCursor,
        remaining: usize,
    ) -> Result<Page, SourceError> {
        let token = match cursor {
            PageCursor::Start => "*",
            PageCursor::Token(token) => token.as_str(),
            other => {
                return Err(SourceError::InvalidRequest(format!(
                    "unexpected OpenAlex cursor {:?}",
                    other
                )))
            }
        };
        let per_page = self.page_size.min(remaining).max(1);

        self.throttle.acquire().await?;
        let response = self
            .client
            .get(&self.build_search_url(&term.text, token, per_page))
            .send()
            .await?;
        let data: WorksResponse = ensure_success(response, "OpenAlex")?
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("Failed to parse OpenAlex JSON: {}", e)))?;

        let next = match data.meta.next_cursor {
            Some(next) if !data.results.is_empty() => Some(PageCursor::Token(next)),
            _ => None,
        };
        let records = data
            .results
            .into_iter()
            .map(|work| RawRecord::json(SourceKind::OpenAlex, term.text.clone(), work))
            .collect();

        Ok(Page::new(records, next))
    }
}
