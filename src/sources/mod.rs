//! Rate-limited bibliographic source clients.
//!
//! Every upstream database implements the [`Source`] trait: it knows how to
//! fetch one page of raw records for a [`SearchTerm`] and owns its own
//! [`Throttle`](crate::utils::Throttle), so callers never need to pace requests.
//!
//! Pages are turned into a lazy record sequence by [`record_stream`], which
//! applies the retry policy and converts exhaustion into a terminal
//! [`StreamEvent::Halted`] instead of an error, so one failing source never
//! aborts a run.
//!
//! # Clients
//!
//! - [`PubMedSource`]: NCBI E-utilities (ESearch then EFetch), 3 req/s or 10 with an API key
//! - [`OpenAlexSource`]: `/works` cursor pagination, per-second cap plus a daily quota
//! - [`SemanticScholarSource`]: snippet search resolved through `paper/batch`, fixed inter-page delay
//! - [`ICiteSource`]: citation traversal from seed PMIDs, independent of the search term

mod icite;
pub mod mock;
mod openalex;
mod pubmed;
mod registry;
mod semantic;

pub use icite::ICiteSource;
pub use mock::MockSource;
pub use openalex::OpenAlexSource;
pub use pubmed::PubMedSource;
pub use registry::{SourceCapabilities, SourceRegistry};
pub use semantic::SemanticScholarSource;

use async_stream::stream;
use async_trait::async_trait;
use futures_util::Stream;

use crate::models::{FailureKind, RawRecord, SearchTerm, SourceKind};
use crate::utils::{retry_after_secs, with_retry_detailed, RetryConfig, RetryResult, ThrottleError, TransientError};

/// Position within a source's result set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// First page
    Start,
    /// Numeric offset (`retstart` style)
    Offset(usize),
    /// Opaque continuation token returned by the API
    Token(String),
    /// Identifiers already discovered but not yet resolved into records
    Pending(Vec<String>),
}

/// One page of raw records
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<RawRecord>,
    /// Where to continue, or `None` when the source has no more results
    pub next: Option<PageCursor>,
}

impl Page {
    pub fn new(records: Vec<RawRecord>, next: Option<PageCursor>) -> Self {
        Self { records, next }
    }

    pub fn last(records: Vec<RawRecord>) -> Self {
        Self { records, next: None }
    }
}

/// The Source trait defines the interface for all bibliographic source clients.
///
/// Implementations must throttle themselves inside [`Source::fetch_page`]; the
/// caller may invoke it as fast as it likes.
#[async_trait]
pub trait Source: Send + Sync + std::fmt::Debug {
    /// Which upstream database this client talks to
    fn kind(&self) -> SourceKind;

    /// Unique identifier for this source (used in configuration and logs)
    fn id(&self) -> &str {
        self.kind().id()
    }

    /// Human-readable name of this source
    fn name(&self) -> &str {
        self.kind().name()
    }

    /// Describe the capabilities of this source
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::KEYWORD_SEARCH
    }

    /// Whether the upstream API refuses service without a contact identifier
    fn requires_contact(&self) -> bool {
        self.capabilities()
            .contains(SourceCapabilities::REQUIRES_CONTACT)
    }

    /// Whether results ignore the search term (run once per collection)
    fn is_term_independent(&self) -> bool {
        self.capabilities().contains(SourceCapabilities::CITATION_GRAPH)
    }

    /// Whether this source should receive `term`
    ///
    /// URL and file-name terms only occur in document bodies, so they are
    /// routed to full-text search sources only.
    fn accepts(&self, term: &SearchTerm) -> bool {
        let caps = self.capabilities();
        if self.is_term_independent() {
            return true;
        }
        if term.category.needs_full_text_search() {
            caps.contains(SourceCapabilities::FULL_TEXT_SEARCH)
        } else {
            caps.contains(SourceCapabilities::KEYWORD_SEARCH)
        }
    }

    /// Fetch one page of at most `remaining` raw records starting at `cursor`
    async fn fetch_page(
        &self,
        term: &SearchTerm,
        cursor: &PageCursor,
        remaining: usize,
    ) -> Result<Page, SourceError>;
}

/// Errors that can occur when interacting with a source
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Network or HTTP transport error
    #[error("Network error: {0}")]
    Network(String),

    /// Parsing error (XML, JSON)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// HTTP 429, with the server's `Retry-After` in seconds when given
    #[error("Rate limit exceeded")]
    RateLimit(Option<u64>),

    /// The client's own daily quota is spent
    #[error("Daily quota of {0} requests exhausted")]
    QuotaExhausted(u32),

    /// Authentication or permission failure (HTTP 401/403, missing contact)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// HTTP 5xx
    #[error("Server error: HTTP {0}")]
    Server(u16),

    /// API error from the source
    #[error("API error: {0}")]
    Api(String),

    /// IO error (file system)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Map a non-success HTTP status onto the error taxonomy
    pub fn from_status(status: reqwest::StatusCode, retry_after: Option<u64>, context: &str) -> Self {
        match status.as_u16() {
            401 | 403 => SourceError::Unauthorized(format!("{} returned {}", context, status)),
            404 => SourceError::NotFound(format!("{} returned {}", context, status)),
            429 => SourceError::RateLimit(retry_after),
            code if status.is_server_error() => SourceError::Server(code),
            _ => SourceError::Api(format!("{} returned status: {}", context, status)),
        }
    }

    /// How this error is reported once it ends a source's stream
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SourceError::RateLimit(_) | SourceError::QuotaExhausted(_) => {
                FailureKind::RateLimitExceeded
            }
            SourceError::Parse(_) => FailureKind::ParseFailed,
            _ => FailureKind::SourceUnavailable,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(format!("JSON: {}", err))
    }
}

impl From<quick_xml::DeError> for SourceError {
    fn from(err: quick_xml::DeError) -> Self {
        SourceError::Parse(format!("XML: {}", err))
    }
}

impl From<ThrottleError> for SourceError {
    fn from(err: ThrottleError) -> Self {
        match err {
            ThrottleError::QuotaExhausted { limit } => SourceError::QuotaExhausted(limit),
        }
    }
}

/// Pass a successful response through, or map its status to a [`SourceError`]
pub(crate) fn ensure_success(
    response: reqwest::Response,
    context: &str,
) -> Result<reqwest::Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SourceError::from_status(
            status,
            retry_after_secs(&response),
            context,
        ))
    }
}

/// One item of a source's record sequence
#[derive(Debug)]
pub enum StreamEvent {
    Record(RawRecord),
    /// The source stopped early; records already yielded stay valid
    Halted { kind: FailureKind, error: SourceError },
}

/// Drive `source` page by page into a lazy, finite sequence of raw records
///
/// At most `cap` records are yielded. Every page request goes through
/// `retry`; when retries are exhausted, or a permanent error occurs, the
/// sequence ends with [`StreamEvent::Halted`]. Each call starts again from
/// the first page, so the sequence is restartable.
pub fn record_stream<'a>(
    source: &'a dyn Source,
    term: &'a SearchTerm,
    cap: usize,
    retry: RetryConfig,
) -> impl Stream<Item = StreamEvent> + Send + 'a {
    stream! {
        let mut cursor = PageCursor::Start;
        let mut yielded = 0usize;
        let mut pages = 0u32;

        while yielded < cap {
            let remaining = cap - yielded;
            let current = &cursor;
            let outcome =
                with_retry_detailed(retry, move || source.fetch_page(term, current, remaining)).await;

            let page = match outcome {
                RetryResult::Success(page) => page,
                RetryResult::TransientFailure(error, transient, attempts) => {
                    let kind = match transient {
                        TransientError::RateLimit(_) => FailureKind::RateLimitExceeded,
                        _ => FailureKind::SourceUnavailable,
                    };
                    tracing::warn!(
                        source = source.id(),
                        term = %term,
                        attempts,
                        "giving up after retries: {}",
                        error
                    );
                    yield StreamEvent::Halted { kind, error };
                    break;
                }
                RetryResult::PermanentFailure(error) => {
                    tracing::warn!(source = source.id(), term = %term, "source failed: {}", error);
                    yield StreamEvent::Halted { kind: error.failure_kind(), error };
                    break;
                }
            };

            pages += 1;
            tracing::debug!(
                source = source.id(),
                term = %term,
                page = pages,
                records = page.records.len(),
                "fetched page"
            );

            for record in page.records.into_iter().take(remaining) {
                yielded += 1;
                yield StreamEvent::Record(record);
            }

            match page.next {
                Some(next) => cursor = next,
                None => break,
            }
        }

        tracing::info!(source = source.id(), term = %term, records = yielded, "source exhausted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TermCategory;
    use futures_util::StreamExt;
    use serde_json::json;
    use std::time::Duration;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            max_total_time: Duration::from_secs(5),
        }
    }

    fn record(n: usize) -> RawRecord {
        RawRecord::json(
            SourceKind::OpenAlex,
            "AHRQ Compendium",
            json!({"title": format!("Paper {}", n)}),
        )
    }

    #[test]
    fn test_source_capabilities() {
        let caps = SourceCapabilities::KEYWORD_SEARCH | SourceCapabilities::REQUIRES_CONTACT;

        assert!(caps.contains(SourceCapabilities::KEYWORD_SEARCH));
        assert!(caps.contains(SourceCapabilities::REQUIRES_CONTACT));
        assert!(!caps.contains(SourceCapabilities::FULL_TEXT_SEARCH));
    }

    #[test]
    fn test_status_mapping() {
        use reqwest::StatusCode;

        assert!(matches!(
            SourceError::from_status(StatusCode::FORBIDDEN, None, "PubMed"),
            SourceError::Unauthorized(_)
        ));
        assert!(matches!(
            SourceError::from_status(StatusCode::TOO_MANY_REQUESTS, Some(7), "OpenAlex"),
            SourceError::RateLimit(Some(7))
        ));
        assert!(matches!(
            SourceError::from_status(StatusCode::BAD_GATEWAY, None, "iCite"),
            SourceError::Server(502)
        ));
        assert!(matches!(
            SourceError::from_status(StatusCode::BAD_REQUEST, None, "iCite"),
            SourceError::Api(_)
        ));
    }

    #[test]
    fn test_term_routing() {
        let phrase = SearchTerm::new("AHRQ Compendium of U.S. Health Systems");
        let url = SearchTerm::with_category("ahrq.gov/chsp", TermCategory::Url);

        let keyword_only = MockSource::new(SourceKind::PubMed);
        let full_text = MockSource::new(SourceKind::SemanticScholar).with_capabilities(
            SourceCapabilities::KEYWORD_SEARCH | SourceCapabilities::FULL_TEXT_SEARCH,
        );
        let graph = MockSource::new(SourceKind::ICite)
            .with_capabilities(SourceCapabilities::CITATION_GRAPH);

        assert!(keyword_only.accepts(&phrase));
        assert!(!keyword_only.accepts(&url));
        assert!(full_text.accepts(&url));
        assert!(graph.accepts(&url));
        assert!(graph.is_term_independent());
    }

    #[tokio::test]
    async fn test_stream_respects_cap_across_pages() {
        let source = MockSource::new(SourceKind::OpenAlex)
            .with_page((0..3).map(record).collect())
            .with_page((3..6).map(record).collect())
            .with_page((6..9).map(record).collect());
        let term = SearchTerm::new("AHRQ Compendium");

        let events: Vec<StreamEvent> = record_stream(&source, &term, 5, fast_retry()).collect().await;

        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|e| matches!(e, StreamEvent::Record(_))));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_stream_keeps_partial_results_on_failure() {
        let source = MockSource::new(SourceKind::OpenAlex)
            .with_page((0..2).map(record).collect())
            .with_failure(|| SourceError::RateLimit(Some(0)));
        let term = SearchTerm::new("AHRQ Compendium");

        let events: Vec<StreamEvent> =
            record_stream(&source, &term, 100, fast_retry()).collect().await;

        assert_eq!(events.len(), 3);
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Halted {
                kind: FailureKind::RateLimitExceeded,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_stream_stops_on_unauthorized_without_retry() {
        let source = MockSource::new(SourceKind::PubMed)
            .with_failure(|| SourceError::Unauthorized("missing email".to_string()));
        let term = SearchTerm::new("AHRQ Compendium");

        let events: Vec<StreamEvent> =
            record_stream(&source, &term, 100, fast_retry()).collect().await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            StreamEvent::Halted {
                kind: FailureKind::SourceUnavailable,
                error: SourceError::Unauthorized(_)
            }
        ));
        assert_eq!(source.calls(), 1);
    }
}
