//! Open-access full-text retrieval.
//!
//! For a canonical record the fetcher tries, in order: the record's own
//! open-access hint, the location Unpaywall reports for its DOI, and finally
//! its landing page. The first candidate that downloads and yields text wins.
//! Extracted text lands in a [`FullTextCache`]; a DOI or body seen before is
//! served from there without extracting again.

mod cache;
mod extract;
mod unpaywall;

pub use cache::{Alias, CacheError, CachedText, FullTextCache};
pub use extract::{html_main_text, sniff, DefaultExtractor, DocumentKind, TextExtractor};
pub use unpaywall::{OaResolver, UnpaywallResolver};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::FullTextConfig;
use crate::models::{CanonicalRecord, ContentHash};
use crate::sources::SourceError;
use crate::utils::{retry_after_secs, user_agent, with_retry, HttpClient, RetryConfig};

/// Landing pages that never carry full text
const SKIPPED_HOSTS: &[&str] = &["pubmed.ncbi.nlm.nih.gov"];

/// Pause before the single retry granted after a 403
const FORBIDDEN_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Why full text could not be obtained; never fatal to a run
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Full text is paywalled")]
    Paywalled,

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Document larger than {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Text extraction failed: {0}")]
    Extraction(String),

    #[error("No full-text location known")]
    NoCandidate,

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

impl From<SourceError> for FetchError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::RateLimit(_) => FetchError::Status(429),
            SourceError::Server(code) => FetchError::Status(code),
            SourceError::Unauthorized(_) => FetchError::Paywalled,
            other => FetchError::Network(other.to_string()),
        }
    }
}

/// Text obtained for one record
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub hash: ContentHash,
    pub text: String,
    /// Where the text came from; `None` when served by DOI from an earlier run
    pub url: Option<String>,
    pub cache_hit: bool,
}

impl FetchOutcome {
    fn from_cache(cached: CachedText, url: Option<String>) -> Self {
        Self {
            hash: cached.hash,
            text: cached.text,
            url,
            cache_hit: cached.cache_hit,
        }
    }
}

/// Downloads, extracts and caches full text for canonical records
#[derive(Debug)]
pub struct FullTextFetcher {
    client: HttpClient,
    cache: Arc<FullTextCache>,
    extractor: Arc<dyn TextExtractor>,
    resolver: Option<Arc<dyn OaResolver>>,
    max_bytes: usize,
    retry: RetryConfig,
}

fn download_retry_config() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(10),
        backoff_multiplier: 2.0,
        max_total_time: Duration::from_secs(90),
    }
}

impl FullTextFetcher {
    /// Build a fetcher; Unpaywall is consulted only when a contact email is known
    pub fn new(
        config: &FullTextConfig,
        contact: Option<&str>,
        cache: Arc<FullTextCache>,
    ) -> Result<Self, FetchError> {
        let client = HttpClient::with_user_agent(
            &user_agent(contact),
            Duration::from_secs(config.timeout_secs.max(1)),
        )?;
        let resolver = match contact {
            Some(email) => Some(Arc::new(UnpaywallResolver::new(&config.unpaywall_base_url, email)?)
                as Arc<dyn OaResolver>),
            None => None,
        };

        Ok(Self {
            client,
            cache,
            extractor: Arc::new(DefaultExtractor),
            resolver,
            max_bytes: config.max_bytes,
            retry: download_retry_config(),
        })
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_resolver(mut self, resolver: Option<Arc<dyn OaResolver>>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &FullTextCache {
        &self.cache
    }

    /// Full text for `record`, from cache or the network
    #[tracing::instrument(skip_all, fields(doi = ?record.doi, title = %record.title))]
    pub async fn fetch(&self, record: &CanonicalRecord) -> Result<FetchOutcome, FetchError> {
        if let Some(hash) = &record.full_text_hash {
            if let Some(text) = self.cache.get(hash).await? {
                tracing::debug!(%hash, "full text already attached");
                return Ok(FetchOutcome {
                    hash: hash.clone(),
                    text,
                    url: None,
                    cache_hit: true,
                });
            }
        }
        if let Some(doi) = &record.doi {
            if let Some(cached) = self.cache.get_by_alias(&Alias::Doi(doi.clone())).await? {
                tracing::debug!(doi = %doi, "full text cached for DOI");
                return Ok(FetchOutcome::from_cache(cached, None));
            }
        }

        let candidates = self.candidates(record).await;
        let mut last_error = FetchError::NoCandidate;
        for url in candidates {
            match self.fetch_url(&url, record).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    tracing::debug!(url = %url, error = %e, "full-text candidate failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Candidate URLs in preference order, landing pages without text removed
    async fn candidates(&self, record: &CanonicalRecord) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        urls.extend(record.oa_url.clone());

        if let (Some(resolver), Some(doi)) = (&self.resolver, &record.doi) {
            match resolver.locate(doi).await {
                Ok(found) => urls.extend(found),
                Err(e) => tracing::debug!(doi = %doi, error = %e, "open-access lookup failed"),
            }
        }
        urls.extend(record.url.clone());

        let mut seen = std::collections::HashSet::new();
        urls.into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty() && !is_skipped_host(u))
            .filter(|u| seen.insert(u.clone()))
            .collect()
    }

    async fn fetch_url(&self, url: &str, record: &CanonicalRecord) -> Result<FetchOutcome, FetchError> {
        let mut aliases = vec![Alias::Url(url.to_string())];
        aliases.extend(record.doi.clone().map(Alias::Doi));

        if let Some(cached) = self.cache.get_by_alias(&Alias::Url(url.to_string())).await? {
            self.cache.add_aliases(&cached.hash, &aliases)?;
            return Ok(FetchOutcome::from_cache(cached, Some(url.to_string())));
        }

        let (body, content_type) = self.download(url).await?;
        let digest = ContentHash::of_bytes(&body);
        let extractor = Arc::clone(&self.extractor);
        let cached = self
            .cache
            .get_or_extract(&digest, move || async move {
                extractor.extract(body, content_type).await
            })
            .await?;
        self.cache.add_aliases(&cached.hash, &aliases)?;

        tracing::debug!(url, hash = %cached.hash, hit = cached.cache_hit, "full text ready");
        Ok(FetchOutcome::from_cache(cached, Some(url.to_string())))
    }

    /// Body and declared content type, honoring the byte cap
    async fn download(&self, url: &str) -> Result<(Vec<u8>, Option<String>), FetchError> {
        let mut forbidden_retried = false;
        loop {
            let client = &self.client;
            let response = with_retry(self.retry, || async move {
                let response = client.get(url).send().await?;
                let status = response.status();
                if status.as_u16() == 429 || status.is_server_error() {
                    return Err(SourceError::from_status(
                        status,
                        retry_after_secs(&response),
                        "full-text download",
                    ));
                }
                Ok(response)
            })
            .await?;

            let status = response.status();
            if status.is_success() {
                return self.read_capped(response).await;
            }
            match status.as_u16() {
                403 if !forbidden_retried => {
                    forbidden_retried = true;
                    tokio::time::sleep(FORBIDDEN_RETRY_DELAY).await;
                }
                401 | 402 | 403 => return Err(FetchError::Paywalled),
                code => return Err(FetchError::Status(code)),
            }
        }
    }

    async fn read_capped(
        &self,
        mut response: reqwest::Response,
    ) -> Result<(Vec<u8>, Option<String>), FetchError> {
        let limit = self.max_bytes;
        if response
            .content_length()
            .is_some_and(|len| len > limit as u64)
        {
            return Err(FetchError::TooLarge { limit });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok((body, content_type))
    }
}

fn is_skipped_host(candidate: &str) -> bool {
    url::Url::parse(candidate)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .is_some_and(|host| SKIPPED_HOSTS.contains(&host.as_str()))
}
