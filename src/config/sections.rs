//! Configuration sections.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::SourceKind;
use crate::utils::RetryConfig;

fn default_true() -> bool {
    true
}

/// Per-source settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub pubmed: PubMedConfig,

    #[serde(default)]
    pub openalex: OpenAlexConfig,

    #[serde(default)]
    pub semantic_scholar: SemanticScholarConfig,

    #[serde(default)]
    pub icite: ICiteConfig,
}

impl SourcesConfig {
    pub fn is_enabled(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::PubMed => self.pubmed.enabled,
            SourceKind::OpenAlex => self.openalex.enabled,
            SourceKind::SemanticScholar => self.semantic_scholar.enabled,
            SourceKind::ICite => self.icite.enabled,
        }
    }

    /// NCBI and the OpenAlex polite pool both demand a contact address
    pub fn requires_contact(kind: SourceKind) -> bool {
        matches!(kind, SourceKind::PubMed | SourceKind::OpenAlex)
    }
}

/// NCBI E-utilities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubMedConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Raises the rate cap from 3 to 10 requests per second
    #[serde(default = "default_ncbi_api_key")]
    pub api_key: Option<String>,

    #[serde(default = "default_pubmed_base_url")]
    pub base_url: String,

    /// `retmax` per ESearch page
    #[serde(default = "default_pubmed_page_size")]
    pub page_size: usize,

    /// `tool` parameter registered with NCBI
    #[serde(default = "default_tool")]
    pub tool: String,
}

impl Default for PubMedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: default_ncbi_api_key(),
            base_url: default_pubmed_base_url(),
            page_size: default_pubmed_page_size(),
            tool: default_tool(),
        }
    }
}

impl PubMedConfig {
    pub fn requests_per_second(&self) -> u32 {
        if self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty()) {
            10
        } else {
            3
        }
    }
}

fn default_ncbi_api_key() -> Option<String> {
    std::env::var("NCBI_API_KEY").ok()
}

fn default_pubmed_base_url() -> String {
    "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string()
}

fn default_pubmed_page_size() -> usize {
    200
}

fn default_tool() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

/// OpenAlex works API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAlexConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_openalex_base_url")]
    pub base_url: String,

    #[serde(default = "default_openalex_rps")]
    pub requests_per_second: u32,

    /// Requests allowed per rolling day before the client refuses to continue
    #[serde(default = "default_daily_quota")]
    pub daily_quota: u32,

    #[serde(default = "default_openalex_page_size")]
    pub page_size: usize,
}

impl Default for OpenAlexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_openalex_base_url(),
            requests_per_second: default_openalex_rps(),
            daily_quota: default_daily_quota(),
            page_size: default_openalex_page_size(),
        }
    }
}

fn default_openalex_base_url() -> String {
    "https://api.openalex.org".to_string()
}

fn default_openalex_rps() -> u32 {
    10
}

fn default_daily_quota() -> u32 {
    100_000
}

fn default_openalex_page_size() -> usize {
    200
}

/// Semantic Scholar Graph API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticScholarConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_s2_api_key")]
    pub api_key: Option<String>,

    #[serde(default = "default_s2_base_url")]
    pub base_url: String,

    /// Minimum delay between requests; the anonymous tier is shared by all callers
    #[serde(default = "default_s2_interval_ms")]
    pub min_interval_ms: u64,

    /// `limit` for snippet search
    #[serde(default = "default_snippet_limit")]
    pub snippet_limit: usize,

    /// Paper ids per `paper/batch` request
    #[serde(default = "default_s2_batch_size")]
    pub batch_size: usize,
}

impl Default for SemanticScholarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: default_s2_api_key(),
            base_url: default_s2_base_url(),
            min_interval_ms: default_s2_interval_ms(),
            snippet_limit: default_snippet_limit(),
            batch_size: default_s2_batch_size(),
        }
    }
}

impl SemanticScholarConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }
}

fn default_s2_api_key() -> Option<String> {
    std::env::var("SEMANTIC_SCHOLAR_API_KEY").ok()
}

fn default_s2_base_url() -> String {
    "https://api.semanticscholar.org/graph/v1".to_string()
}

fn default_s2_interval_ms() -> u64 {
    1100
}

fn default_snippet_limit() -> usize {
    1000
}

fn default_s2_batch_size() -> usize {
    100
}

/// NIH iCite citation traversal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ICiteConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_icite_base_url")]
    pub base_url: String,

    /// Papers whose citing works are collected
    #[serde(default = "default_seed_pmids")]
    pub seed_pmids: Vec<String>,

    #[serde(default = "default_icite_rps")]
    pub requests_per_second: u32,

    /// PMIDs per `/pubs?pmids=` request
    #[serde(default = "default_icite_batch_size")]
    pub batch_size: usize,
}

impl Default for ICiteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_icite_base_url(),
            seed_pmids: default_seed_pmids(),
            requests_per_second: default_icite_rps(),
            batch_size: default_icite_batch_size(),
        }
    }
}

fn default_icite_base_url() -> String {
    "https://icite.od.nih.gov/api".to_string()
}

fn default_seed_pmids() -> Vec<String> {
    vec!["30674227".to_string()]
}

fn default_icite_rps() -> u32 {
    5
}

fn default_icite_batch_size() -> usize {
    200
}

/// Retry policy shared by all source clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Wall-clock ceiling per request, retries included
    #[serde(default = "default_max_total_secs")]
    pub max_total_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            max_total_secs: default_max_total_secs(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_secs(self.max_delay_secs),
            backoff_multiplier: self.backoff_multiplier,
            max_total_time: Duration::from_secs(self.max_total_secs),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    2000
}

fn default_max_delay_secs() -> u64 {
    120
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_total_secs() -> u64 {
    300
}

/// Title/abstract rank-and-prune applied before merging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Records scoring below this are dropped
    #[serde(default)]
    pub threshold: f64,

    #[serde(default)]
    pub weights: RelevanceWeights,

    #[serde(default = "default_canonical_terms")]
    pub canonical_terms: Vec<String>,

    /// Dataset authors; a match counts like citing a seed paper
    #[serde(default = "default_seed_authors")]
    pub seed_authors: Vec<String>,

    #[serde(default = "default_seed_pmids")]
    pub seed_pmids: Vec<String>,

    #[serde(default = "default_integration_terms")]
    pub integration_terms: Vec<String>,

    #[serde(default = "default_scope_terms")]
    pub scope_terms: Vec<String>,

    #[serde(default = "default_journal_whitelist")]
    pub journal_whitelist: Vec<String>,

    #[serde(default = "default_neg_geography")]
    pub neg_geography: Vec<String>,

    #[serde(default = "default_neg_domain")]
    pub neg_domain: Vec<String>,

    /// Papers published before this year get the `old_paper` weight
    #[serde(default = "default_old_before")]
    pub old_before_year: i32,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 0.0,
            weights: RelevanceWeights::default(),
            canonical_terms: default_canonical_terms(),
            seed_authors: default_seed_authors(),
            seed_pmids: default_seed_pmids(),
            integration_terms: default_integration_terms(),
            scope_terms: default_scope_terms(),
            journal_whitelist: default_journal_whitelist(),
            neg_geography: default_neg_geography(),
            neg_domain: default_neg_domain(),
            old_before_year: default_old_before(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_canonical_terms() -> Vec<String> {
    strings(&[
        "compendium of u.s. health systems",
        "compendium of us health systems",
        "ahrq compendium",
        "health system compendium",
        "chsp compendium",
        "comparative health system performance",
    ])
}

fn default_seed_authors() -> Vec<String> {
    strings(&["Furukawa", "Machta", "Rich", "Shortell"])
}

fn default_integration_terms() -> Vec<String> {
    strings(&[
        "vertical integration",
        "horizontal integration",
        "health system affiliation",
        "system affiliation",
        "hospital consolidation",
        "consolidation",
        "mergers",
        "acquisition",
        "market concentration",
        "physician practice ownership",
        "integrated delivery",
    ])
}

fn default_scope_terms() -> Vec<String> {
    strings(&[
        "united states",
        "u.s.",
        "us hospitals",
        "medicare",
        "medicaid",
        "american hospital association",
        "health system",
    ])
}

fn default_journal_whitelist() -> Vec<String> {
    strings(&[
        "Health Affairs",
        "Health Aff (Millwood)",
        "Health Services Research",
        "Health Serv Res",
        "JAMA",
        "JAMA Network Open",
        "JAMA Netw Open",
        "JAMA Health Forum",
        "Medical Care",
        "Med Care",
        "Medical Care Research and Review",
        "American Journal of Managed Care",
        "Am J Manag Care",
        "Journal of Health Economics",
    ])
}

fn default_neg_geography() -> Vec<String> {
    strings(&[
        "china",
        "chinese",
        "india",
        "japan",
        "korea",
        "taiwan",
        "iran",
        "brazil",
        "nigeria",
        "europe",
        "united kingdom",
        "nhs england",
    ])
}

fn default_neg_domain() -> Vec<String> {
    strings(&[
        "imidazoline",
        "receptor binding",
        "nanoparticle",
        "crystal structure",
        "pharmacokinetics",
        "in vitro",
        "mouse model",
        "compendium of chemical",
        "pharmacopoeia",
    ])
}

fn default_old_before() -> i32 {
    2008
}

/// Score contribution of each relevance signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceWeights {
    #[serde(default = "w_keyword_hit")]
    pub keyword_hit: f64,
    #[serde(default = "w_canonical_term")]
    pub canonical_term: f64,
    #[serde(default = "w_dataset_author_seed")]
    pub dataset_author_seed: f64,
    #[serde(default = "w_one")]
    pub integration_term: f64,
    #[serde(default = "w_one")]
    pub scope_term: f64,
    #[serde(default = "w_half")]
    pub journal_whitelist: f64,
    #[serde(default = "w_minus_one")]
    pub neg_geography: f64,
    #[serde(default = "w_minus_one")]
    pub neg_domain: f64,
    #[serde(default)]
    pub short_title: f64,
    #[serde(default = "w_old_paper")]
    pub old_paper: f64,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self {
            keyword_hit: w_keyword_hit(),
            canonical_term: w_canonical_term(),
            dataset_author_seed: w_dataset_author_seed(),
            integration_term: w_one(),
            scope_term: w_one(),
            journal_whitelist: w_half(),
            neg_geography: w_minus_one(),
            neg_domain: w_minus_one(),
            short_title: 0.0,
            old_paper: w_old_paper(),
        }
    }
}

fn w_keyword_hit() -> f64 {
    0.5
}

fn w_canonical_term() -> f64 {
    2.0
}

fn w_dataset_author_seed() -> f64 {
    1.5
}

fn w_one() -> f64 {
    1.0
}

fn w_half() -> f64 {
    0.5
}

fn w_minus_one() -> f64 {
    -1.0
}

fn w_old_paper() -> f64 {
    -0.5
}

/// Open-access full-text retrieval and its persistent cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullTextConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Defaults to the platform cache directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_unpaywall_base_url")]
    pub unpaywall_base_url: String,
}

impl Default for FullTextConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_dir: None,
            max_bytes: default_max_bytes(),
            timeout_secs: default_fetch_timeout(),
            unpaywall_base_url: default_unpaywall_base_url(),
        }
    }
}

impl FullTextConfig {
    /// Configured cache directory, else `<platform cache dir>/compendium-tracker`
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(env!("CARGO_PKG_NAME"))
        })
    }
}

fn default_max_bytes() -> usize {
    25 * 1024 * 1024
}

fn default_fetch_timeout() -> u64 {
    60
}

fn default_unpaywall_base_url() -> String {
    "https://api.unpaywall.org/v2".to_string()
}

/// Usage classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Evidence snippet width in characters
    #[serde(default = "default_snippet_width")]
    pub snippet_width: usize,

    /// Additional usage patterns (regular expressions, matched case-insensitively)
    #[serde(default)]
    pub extra_patterns: Vec<String>,

    /// Dataset URLs whose literal presence proves usage
    #[serde(default)]
    pub literal_urls: Vec<String>,

    #[serde(default)]
    pub statistical: StatisticalConfig,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            snippet_width: default_snippet_width(),
            extra_patterns: Vec::new(),
            literal_urls: Vec::new(),
            statistical: StatisticalConfig::default(),
        }
    }
}

fn default_snippet_width() -> usize {
    160
}

/// Statistical fallback over full text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Probability at or above which the scorer's opinion is `DATA_USED`
    #[serde(default = "default_statistical_threshold")]
    pub threshold: f64,

    /// JSON cue-weight model; the built-in model is used when unset
    #[serde(default)]
    pub model_path: Option<PathBuf>,
}

impl Default for StatisticalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_statistical_threshold(),
            model_path: None,
        }
    }
}

fn default_statistical_threshold() -> f64 {
    0.6
}

/// Run-level limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Global deadline in seconds; `0` disables it
    #[serde(default = "default_deadline")]
    pub deadline_secs: Option<u64>,

    /// Parallel full-text fetch/classify workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the queue feeding the merge worker
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline(),
            workers: default_workers(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl RunConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

fn default_deadline() -> Option<u64> {
    Some(3600)
}

fn default_workers() -> usize {
    4
}

fn default_channel_capacity() -> usize {
    256
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pubmed_rate_depends_on_api_key() {
        let mut pubmed = PubMedConfig {
            api_key: None,
            ..PubMedConfig::default()
        };
        assert_eq!(pubmed.requests_per_second(), 3);
        pubmed.api_key = Some("key".to_string());
        assert_eq!(pubmed.requests_per_second(), 10);
    }

    #[test]
    fn test_retry_settings_conversion() {
        let retry = RetrySettings::default().to_retry_config();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.initial_delay, Duration::from_secs(2));
        assert_eq!(retry.max_total_time, Duration::from_secs(300));
    }

    #[test]
    fn test_cache_dir_override() {
        let fulltext = FullTextConfig {
            cache_dir: Some(PathBuf::from("/tmp/ft")),
            ..FullTextConfig::default()
        };
        assert_eq!(fulltext.resolved_cache_dir(), PathBuf::from("/tmp/ft"));
        assert!(FullTextConfig::default()
            .resolved_cache_dir()
            .ends_with("compendium-tracker"));
    }
}
