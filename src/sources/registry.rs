//! Registry of the configured source clients.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{ICiteSource, OpenAlexSource, PubMedSource, SemanticScholarSource, Source};
use crate::config::Config;
use crate::models::SourceKind;

bitflags::bitflags! {
    /// Capabilities that a source can support
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SourceCapabilities: u32 {
        /// Searches titles, abstracts and metadata
        const KEYWORD_SEARCH = 1 << 0;
        /// Searches document bodies (URL and file-name terms)
        const FULL_TEXT_SEARCH = 1 << 1;
        /// Walks the citation graph from seed papers, ignoring the term
        const CITATION_GRAPH = 1 << 2;
        /// Refuses service without a contact identifier
        const REQUIRES_CONTACT = 1 << 3;
    }
}

/// Registry of the sources taking part in a run
///
/// Sources that were enabled but could not be constructed (missing contact,
/// invalid throttle settings, HTTP client failure) are remembered with the
/// reason so the run summary can report them as unavailable.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<SourceKind, Arc<dyn Source>>,
    unavailable: BTreeMap<SourceKind, String>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every enabled source from configuration
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        let contact = config.contact();

        for kind in config.enabled_sources() {
            let built: Result<Arc<dyn Source>, String> = match kind {
                SourceKind::PubMed => PubMedSource::new(&config.sources.pubmed, contact)
                    .map(|s| Arc::new(s) as Arc<dyn Source>)
                    .map_err(|e| e.to_string()),
                SourceKind::OpenAlex => OpenAlexSource::new(&config.sources.openalex, contact)
                    .map(|s| Arc::new(s) as Arc<dyn Source>)
                    .map_err(|e| e.to_string()),
                SourceKind::SemanticScholar => {
                    SemanticScholarSource::new(&config.sources.semantic_scholar, contact)
                        .map(|s| Arc::new(s) as Arc<dyn Source>)
                        .map_err(|e| e.to_string())
                }
                SourceKind::ICite => ICiteSource::new(&config.sources.icite, contact)
                    .map(|s| Arc::new(s) as Arc<dyn Source>)
                    .map_err(|e| e.to_string()),
            };

            match built {
                Ok(source) => registry.register(source),
                Err(reason) => {
                    tracing::warn!(source = kind.id(), "source unavailable: {}", reason);
                    registry.mark_unavailable(kind, reason);
                }
            }
        }

        registry
    }

    /// Register a new source
    pub fn register(&mut self, source: Arc<dyn Source>) {
        self.unavailable.remove(&source.kind());
        self.sources.insert(source.kind(), source);
    }

    /// Record that an enabled source cannot take part in the run
    pub fn mark_unavailable(&mut self, kind: SourceKind, reason: impl Into<String>) {
        self.sources.remove(&kind);
        self.unavailable.insert(kind, reason.into());
    }

    /// Get a source by kind
    pub fn get(&self, kind: SourceKind) -> Option<&Arc<dyn Source>> {
        self.sources.get(&kind)
    }

    /// Get all registered sources, in precedence order
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Source>> {
        self.sources.values()
    }

    /// Enabled sources that could not be constructed, with the reason
    pub fn unavailable(&self) -> &BTreeMap<SourceKind, String> {
        &self.unavailable
    }

    /// Get sources that support a specific capability
    pub fn with_capability(&self, capability: SourceCapabilities) -> Vec<&Arc<dyn Source>> {
        self.all()
            .filter(|s| s.capabilities().contains(capability))
            .collect()
    }

    /// Get the number of registered sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
