//! Collection orchestrator.
//!
//! A run has two phases:
//!
//! 1. **Collect.** Every registered source runs in its own task, draining
//!    [`record_stream`] for each term it accepts. Raw records are normalized
//!    in the source task, then sent over a bounded channel to a single merge
//!    task that owns the [`IdentityResolver`]. Relevance pruning runs on the
//!    merged records, so a work is dropped only when its combined metadata
//!    scores low and every source that returned it is credited.
//! 2. **Classify.** The surviving set is classified on metadata first. Records
//!    still short of `DATA_USED` get full text through a bounded pool of
//!    concurrent fetches and are classified again.
//!
//! The optional deadline abandons in-flight source calls (records already
//! yielded are kept) and stops new fetches from starting.

use futures_util::{stream, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::classify::UsageClassifier;
use crate::config::{Config, ConfigError};
use crate::error::TrackerError;
use crate::fulltext::{FetchError, FullTextCache, FullTextFetcher};
use crate::models::{
    CanonicalRecord, CollectionRun, FailureKind, FetchStats, RunSummary, SearchTerm, SourceKind,
    SourceReport, SourceStatus, UsageVerdict, VerdictCounts,
};
use crate::normalize::normalize;
use crate::relevance::RelevanceScorer;
use crate::resolver::IdentityResolver;
use crate::sources::{record_stream, Source, SourceError, SourceRegistry, StreamEvent};
use crate::utils::RetryConfig;

/// What a source task needs besides the source itself
struct SourceJob {
    cap: usize,
    retry: RetryConfig,
    sender: mpsc::Sender<CanonicalRecord>,
}

/// Outcome of the full-text step for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchStep {
    NotNeeded,
    Skipped,
    NoCandidate,
    Fetched { cache_hit: bool },
    Failed,
}

/// Drives sources, merging, full-text retrieval and classification
#[derive(Debug)]
pub struct CollectionOrchestrator {
    config: Config,
    registry: SourceRegistry,
    scorer: RelevanceScorer,
    classifier: UsageClassifier,
    fetcher: Option<FullTextFetcher>,
}

impl CollectionOrchestrator {
    /// Validate `config` and build every component it describes
    pub fn from_config(config: Config) -> Result<Self, TrackerError> {
        config.validate()?;
        let registry = SourceRegistry::from_config(&config);
        let fetcher = if config.fulltext.enabled {
            build_fetcher(&config)
        } else {
            None
        };
        Ok(Self::new(config, registry)?.with_fetcher(fetcher))
    }

    /// Use an explicit registry; full text stays off until [`with_fetcher`](Self::with_fetcher)
    pub fn new(config: Config, registry: SourceRegistry) -> Result<Self, TrackerError> {
        config.validate()?;
        if registry.is_empty() && registry.unavailable().is_empty() {
            return Err(ConfigError::NoSourcesEnabled.into());
        }
        let classifier = UsageClassifier::from_config(&config.classifier)?;
        Ok(Self {
            scorer: RelevanceScorer::new(&config.relevance),
            classifier,
            fetcher: None,
            registry,
            config,
        })
    }

    pub fn with_fetcher(mut self, fetcher: Option<FullTextFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_classifier(mut self, classifier: UsageClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Run over the configured search terms
    pub async fn run(&self) -> Result<CollectionRun, TrackerError> {
        self.run_terms(self.config.search_terms()).await
    }

    /// Run over `terms`
    #[tracing::instrument(skip_all, fields(terms = terms.len(), sources = self.registry.len()))]
    pub async fn run_terms(&self, terms: Vec<SearchTerm>) -> Result<CollectionRun, TrackerError> {
        if terms.is_empty() {
            return Err(ConfigError::Invalid {
                key: "terms",
                reason: "at least one search term is required".to_string(),
            }
            .into());
        }

        let started_at = chrono::Utc::now();
        let clock = std::time::Instant::now();
        let deadline = self.config.run.deadline().and_then(|d| {
            let deadline = Instant::now().checked_add(d);
            if deadline.is_none() {
                tracing::warn!(secs = d.as_secs(), "deadline beyond the clock's range; running without one");
            }
            deadline
        });

        let (mut per_source, records, collect_timed_out) = self.collect(&terms, deadline).await?;
        tracing::info!(records = records.len(), "collection finished");
        let records = self.prune(records, &mut per_source);

        let (records, fetch) = self.classify_all(records, deadline).await;
        if let Some(fetcher) = &self.fetcher {
            if let Err(e) = fetcher.cache().flush().await {
                tracing::warn!("full-text alias index not saved: {}", e);
            }
        }

        for (kind, reason) in self.registry.unavailable() {
            let report = per_source.entry(*kind).or_default();
            report.status = SourceStatus::Unavailable;
            report.record_failure(FailureKind::SourceUnavailable, reason.clone());
        }

        let summary = RunSummary {
            started_at,
            finished_at: chrono::Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            per_source,
            canonical_records: records.len(),
            verdicts: VerdictCounts::tally(&records),
            deadline_reached: collect_timed_out || fetch.skipped > 0,
            fetch,
        };
        tracing::info!(
            canonical = summary.canonical_records,
            raw = summary.total_raw_records(),
            data_used = summary.verdicts.data_used,
            mention_only = summary.verdicts.mention_only,
            undetermined = summary.verdicts.undetermined,
            failures = summary.total_failures(),
            deadline_reached = summary.deadline_reached,
            "run complete"
        );

        Ok(CollectionRun { records, summary })
    }

    /// Phase one: every source in parallel into the single merge worker
    async fn collect(
        &self,
        terms: &[SearchTerm],
        deadline: Option<Instant>,
    ) -> Result<(BTreeMap<SourceKind, SourceReport>, Vec<CanonicalRecord>, bool), TrackerError> {
        let (sender, mut receiver) = mpsc::channel(self.config.run.channel_capacity.max(1));

        let merge = tokio::spawn(async move {
            let mut resolver = IdentityResolver::new();
            while let Some(record) = receiver.recv().await {
                resolver.ingest(record);
            }
            resolver
        });

        let mut per_source = BTreeMap::new();
        let mut handles = Vec::new();
        for source in self.registry.all() {
            let routed = routed_terms(source.as_ref(), terms);
            if routed.is_empty() {
                tracing::info!(source = source.id(), "no terms routed to source");
                per_source.insert(source.kind(), SourceReport::default());
                continue;
            }

            let job = SourceJob {
                cap: self.config.max_results_per_query,
                retry: self.config.retry.to_retry_config(),
                sender: sender.clone(),
            };
            let kind = source.kind();
            let source = Arc::clone(source);
            let handle = tokio::spawn(async move {
                let mut report = SourceReport::default();
                let timed_out = match deadline {
                    Some(deadline) => tokio::time::timeout_at(
                        deadline,
                        drain_source(source.as_ref(), &routed, &job, &mut report),
                    )
                    .await
                    .is_err(),
                    None => {
                        drain_source(source.as_ref(), &routed, &job, &mut report).await;
                        false
                    }
                };
                if timed_out {
                    tracing::warn!(source = source.id(), "deadline reached; keeping partial results");
                }
                report.status = settle(&report, timed_out);
                (report, timed_out)
            });
            handles.push((kind, handle));
        }
        drop(sender);

        let mut timed_out = false;
        for (kind, handle) in handles {
            match handle.await {
                Ok((report, source_timed_out)) => {
                    timed_out |= source_timed_out;
                    per_source.insert(kind, report);
                }
                Err(e) => {
                    tracing::warn!(source = kind.id(), "collection task failed: {}", e);
                    let mut report = SourceReport {
                        status: SourceStatus::Unavailable,
                        ..SourceReport::default()
                    };
                    report.record_failure(FailureKind::SourceUnavailable, e.to_string());
                    per_source.insert(kind, report);
                }
            }
        }

        let resolver = merge.await?;
        tracing::debug!(ingested = resolver.ingested(), "merge worker drained");
        Ok((per_source, resolver.into_records(), timed_out))
    }

    /// Drop merged records under the relevance threshold, charging each contributing source
    fn prune(
        &self,
        records: Vec<CanonicalRecord>,
        per_source: &mut BTreeMap<SourceKind, SourceReport>,
    ) -> Vec<CanonicalRecord> {
        if !self.scorer.is_enabled() {
            return records;
        }
        let before = records.len();
        let kept: Vec<CanonicalRecord> = records
            .into_iter()
            .filter_map(|mut record| {
                if self.scorer.assess(&mut record) {
                    return Some(record);
                }
                for kind in &record.sources {
                    per_source.entry(*kind).or_default().pruned += 1;
                }
                None
            })
            .collect();
        tracing::debug!(pruned = before - kept.len(), kept = kept.len(), "relevance pruning done");
        kept
    }

    /// Phase two: metadata pass, then bounded concurrent fetch and reclassify
    async fn classify_all(
        &self,
        records: Vec<CanonicalRecord>,
        deadline: Option<Instant>,
    ) -> (Vec<CanonicalRecord>, FetchStats) {
        let workers = self.config.run.workers.max(1);
        let mut results: Vec<(usize, CanonicalRecord, FetchStep)> =
            stream::iter(records.into_iter().enumerate())
                .map(move |(index, mut record)| async move {
                    let step = self.enrich(&mut record, deadline).await;
                    (index, record, step)
                })
                .buffer_unordered(workers)
                .collect()
                .await;
        results.sort_by_key(|(index, _, _)| *index);

        let mut stats = FetchStats::default();
        for (_, _, step) in &results {
            match step {
                FetchStep::NotNeeded => {}
                FetchStep::Skipped => stats.skipped += 1,
                FetchStep::NoCandidate => stats.attempted += 1,
                FetchStep::Fetched { cache_hit } => {
                    stats.attempted += 1;
                    if *cache_hit {
                        stats.cache_hits += 1;
                    } else {
                        stats.fetched += 1;
                    }
                }
                FetchStep::Failed => {
                    stats.attempted += 1;
                    stats.failed += 1;
                }
            }
        }
        if stats.skipped > 0 {
            tracing::warn!(skipped = stats.skipped, "deadline reached before full-text retrieval finished");
        }

        (results.into_iter().map(|(_, record, _)| record).collect(), stats)
    }

    /// Classify one record, fetching full text when metadata was not enough
    async fn enrich(&self, record: &mut CanonicalRecord, deadline: Option<Instant>) -> FetchStep {
        if self.classifier.apply(record, None) == UsageVerdict::DataUsed {
            return FetchStep::NotNeeded;
        }
        let Some(fetcher) = &self.fetcher else {
            return FetchStep::NotNeeded;
        };
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return FetchStep::Skipped;
        }

        match fetcher.fetch(record).await {
            Ok(outcome) => {
                record.full_text_hash = Some(outcome.hash.clone());
                let verdict = self.classifier.apply(record, Some(&outcome.text));
                tracing::debug!(title = %record.title, %verdict, cache_hit = outcome.cache_hit, "classified on full text");
                FetchStep::Fetched {
                    cache_hit: outcome.cache_hit,
                }
            }
            Err(FetchError::NoCandidate) => {
                tracing::debug!(title = %record.title, "no full-text location");
                FetchStep::NoCandidate
            }
            Err(e) => {
                tracing::warn!(
                    title = %record.title,
                    failure = ?FailureKind::FetchFailed,
                    "full text unavailable: {}",
                    e
                );
                FetchStep::Failed
            }
        }
    }
}

/// Terms a source should run; term-independent sources run exactly once
fn routed_terms(source: &dyn Source, terms: &[SearchTerm]) -> Vec<SearchTerm> {
    if source.is_term_independent() {
        return terms.first().cloned().into_iter().collect();
    }
    terms.iter().filter(|t| source.accepts(t)).cloned().collect()
}

/// Drain one source over its terms into the merge channel
async fn drain_source(
    source: &dyn Source,
    terms: &[SearchTerm],
    job: &SourceJob,
    report: &mut SourceReport,
) {
    for term in terms {
        let mut events = std::pin::pin!(record_stream(source, term, job.cap, job.retry));
        while let Some(event) = events.next().await {
            match event {
                StreamEvent::Record(raw) => {
                    report.raw_records += 1;
                    let record = match normalize(&raw) {
                        Ok(record) => record,
                        Err(e) => {
                            report.parse_failures += 1;
                            tracing::warn!(source = source.id(), term = %term, "dropping record: {}", e);
                            continue;
                        }
                    };
                    report.records += 1;
                    if job.sender.send(record).await.is_err() {
                        return;
                    }
                }
                StreamEvent::Halted { kind, error } => {
                    let fatal = matches!(
                        error,
                        SourceError::Unauthorized(_) | SourceError::QuotaExhausted(_)
                    );
                    report.record_failure(kind, format!("{}: {}", term, error));
                    if fatal {
                        tracing::warn!(source = source.id(), "source disabled for this run: {}", error);
                        return;
                    }
                }
            }
        }
    }
}

fn settle(report: &SourceReport, timed_out: bool) -> SourceStatus {
    if timed_out {
        SourceStatus::Partial
    } else if report.failures.is_empty() {
        SourceStatus::Completed
    } else if report.raw_records == 0 {
        SourceStatus::Unavailable
    } else {
        SourceStatus::Partial
    }
}

/// Full-text fetcher over the persistent cache, degrading to memory when the cache cannot be opened
fn build_fetcher(config: &Config) -> Option<FullTextFetcher> {
    let dir = config.fulltext.resolved_cache_dir();
    let cache = match FullTextCache::open(&dir) {
        Ok(cache) => cache,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), "full-text cache unavailable, using memory: {}", e);
            FullTextCache::in_memory()
        }
    };
    match FullTextFetcher::new(&config.fulltext, config.contact(), Arc::new(cache)) {
        Ok(fetcher) => Some(fetcher),
        Err(e) => {
            tracing::warn!("full-text retrieval disabled: {}", e);
            None
        }
    }
}
