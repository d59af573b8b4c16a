//! Mock source for testing purposes.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{RawRecord, SearchTerm, SourceKind};
use crate::sources::{Page, PageCursor, Source, SourceCapabilities, SourceError};

type ErrorFactory = Arc<dyn Fn() -> SourceError + Send + Sync>;

#[derive(Clone)]
enum Step {
    Page(Vec<RawRecord>),
    Fail(ErrorFactory),
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Page(records) => write!(f, "Page({} records)", records.len()),
            Step::Fail(make) => write!(f, "Fail({})", make()),
        }
    }
}

/// A scripted source for tests
///
/// Every term sees the same script: page `n` of the stream is step `n`. A
/// failing step fails on every attempt, so retries exhaust deterministically.
#[derive(Debug)]
pub struct MockSource {
    kind: SourceKind,
    capabilities: SourceCapabilities,
    steps: Vec<Step>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockSource {
    /// Create a mock keyword-search source with an empty script
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            capabilities: SourceCapabilities::KEYWORD_SEARCH,
            steps: Vec::new(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_capabilities(mut self, capabilities: SourceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Append a page of records to the script
    pub fn with_page(mut self, records: Vec<RawRecord>) -> Self {
        self.steps.push(Step::Page(records));
        self
    }

    /// Append a step that always fails with the error built by `make`
    pub fn with_failure<F>(mut self, make: F) -> Self
    where
        F: Fn() -> SourceError + Send + Sync + 'static,
    {
        self.steps.push(Step::Fail(Arc::new(make)));
        self
    }

    /// Sleep this long before answering each page
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `fetch_page` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for MockSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn capabilities(&self) -> SourceCapabilities {
        self.capabilities
    }

    async fn fetch_page(
        &self,
        _term: &SearchTerm,
        cursor: &PageCursor,
        remaining: usize,
    ) -> Result<Page, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let index = match cursor {
            PageCursor::Start => 0,
            PageCursor::Offset(index) => *index,
            other => {
                return Err(SourceError::InvalidRequest(format!(
                    "unexpected mock cursor {:?}",
                    other
                )))
            }
        };

        match self.steps.get(index) {
            None => Ok(Page::last(Vec::new())),
            Some(Step::Fail(make)) => Err(make()),
            Some(Step::Page(records)) => {
                let next = (index + 1 < self.steps.len()).then_some(PageCursor::Offset(index + 1));
                Ok(Page::new(
                    records.iter().take(remaining).cloned().collect(),
                    next,
                ))
            }
        }
    }
}
