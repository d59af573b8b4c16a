//! Configuration management.
//!
//! Settings come from an optional TOML file overlaid with environment
//! variables prefixed `COMPENDIUM_TRACKER_` (nested keys separated by `__`,
//! e.g. `COMPENDIUM_TRACKER_RUN__WORKERS=8`).
//!
//! ```toml
//! contact_email = "ops@example.org"
//! max_results_per_query = 500
//! terms = ["AHRQ Compendium of U.S. Health Systems", "chsp-compendium-2018.csv"]
//!
//! [sources.pubmed]
//! api_key = "..."
//!
//! [sources.openalex]
//! daily_quota = 100000
//!
//! [sources.icite]
//! seed_pmids = ["30674227"]
//!
//! [fulltext]
//! cache_dir = "/var/cache/compendium-tracker"
//!
//! [run]
//! deadline_secs = 1800
//! workers = 4
//! ```

mod sections;

pub use sections::{
    ClassifierConfig, FullTextConfig, ICiteConfig, LogFormat, LoggingConfig, OpenAlexConfig,
    PubMedConfig, RelevanceConfig, RelevanceWeights, RetrySettings, RunConfig,
    SemanticScholarConfig, SourcesConfig, StatisticalConfig,
};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::{SearchTerm, SourceKind};

/// Contact address shipped in sample configurations; never accepted as real
pub const PLACEHOLDER_EMAIL: &str = "your_email@domain.com";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Contact identifier sent to APIs that require one (NCBI, OpenAlex polite pool, Unpaywall)
    #[serde(default = "default_contact_email")]
    pub contact_email: Option<String>,

    /// Per-source, per-term result cap
    #[serde(default = "default_max_results")]
    pub max_results_per_query: usize,

    /// Search terms for a run
    #[serde(default = "default_terms")]
    pub terms: Vec<String>,

    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub relevance: RelevanceConfig,

    #[serde(default)]
    pub fulltext: FullTextConfig,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            contact_email: default_contact_email(),
            max_results_per_query: default_max_results(),
            terms: default_terms(),
            sources: SourcesConfig::default(),
            retry: RetrySettings::default(),
            relevance: RelevanceConfig::default(),
            fulltext: FullTextConfig::default(),
            classifier: ClassifierConfig::default(),
            run: RunConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_contact_email() -> Option<String> {
    std::env::var("COMPENDIUM_TRACKER_EMAIL").ok()
}

fn default_max_results() -> usize {
    1000
}

fn default_terms() -> Vec<String> {
    [
        "AHRQ Compendium of U.S. Health Systems",
        "Compendium of US Health Systems",
        "AHRQ health system compendium",
        "https://www.ahrq.gov/chsp/data-resources/compendium.html",
        "chsp-compendium-2018.csv",
        "chsp-hospital-linkage-2018.csv",
    ]
    .iter()
    .map(|t| t.to_string())
    .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("no sources are enabled")]
    NoSourcesEnabled,

    #[error("a contact email is required by every enabled source ({0}); set contact_email or COMPENDIUM_TRACKER_EMAIL")]
    MissingContact(String),

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl Config {
    /// The contact email, unless unset, blank or the sample placeholder
    pub fn contact(&self) -> Option<&str> {
        self.contact_email
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case(PLACEHOLDER_EMAIL))
    }

    /// Sources enabled in this configuration, in precedence order
    pub fn enabled_sources(&self) -> Vec<SourceKind> {
        SourceKind::ALL
            .into_iter()
            .filter(|kind| self.sources.is_enabled(*kind))
            .collect()
    }

    /// Configured terms as [`SearchTerm`]s, duplicates removed
    pub fn search_terms(&self) -> Vec<SearchTerm> {
        let mut seen = std::collections::HashSet::new();
        self.terms
            .iter()
            .map(SearchTerm::new)
            .filter(|t| !t.text.is_empty() && seen.insert(t.text.to_lowercase()))
            .collect()
    }

    /// Reject configurations that cannot produce a useful run
    ///
    /// Only problems that affect every source are errors here. A single
    /// source missing its prerequisites is reported as unavailable at run time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let enabled = self.enabled_sources();
        if enabled.is_empty() {
            return Err(ConfigError::NoSourcesEnabled);
        }

        if self.contact().is_none() && enabled.iter().all(|k| SourcesConfig::requires_contact(*k)) {
            let names: Vec<&str> = enabled.iter().map(|k| k.id()).collect();
            return Err(ConfigError::MissingContact(names.join(", ")));
        }

        if self.max_results_per_query == 0 {
            return Err(ConfigError::Invalid {
                key: "max_results_per_query",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.run.workers == 0 {
            return Err(ConfigError::Invalid {
                key: "run.workers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.classifier.statistical.threshold) {
            return Err(ConfigError::Invalid {
                key: "classifier.statistical.threshold",
                reason: "must be between 0 and 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Load configuration from an optional file plus `COMPENDIUM_TRACKER_*` environment variables
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }
    let settings = builder
        .add_source(
            config::Environment::with_prefix("COMPENDIUM_TRACKER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn with_contact() -> Config {
        Config {
            contact_email: Some("ops@example.org".to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = with_contact();
        assert_eq!(config.max_results_per_query, 1000);
        assert_eq!(config.enabled_sources(), SourceKind::ALL.to_vec());
        assert_eq!(config.sources.icite.seed_pmids, vec!["30674227"]);
        assert_eq!(config.classifier.snippet_width, 160);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_placeholder_contact_is_ignored() {
        let mut config = with_contact();
        config.contact_email = Some(PLACEHOLDER_EMAIL.to_string());
        assert_eq!(config.contact(), None);

        config.contact_email = Some("  ".to_string());
        assert_eq!(config.contact(), None);
    }

    #[test]
    fn test_missing_contact_is_fatal_only_when_every_source_needs_it() {
        let mut config = with_contact();
        config.contact_email = None;
        // Semantic Scholar and iCite work without one
        assert!(config.validate().is_ok());

        config.sources.semantic_scholar.enabled = false;
        config.sources.icite.enabled = false;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingContact(names)) if names == "pubmed, openalex"
        ));
    }

    #[test]
    fn test_no_sources_enabled() {
        let mut config = with_contact();
        config.sources.pubmed.enabled = false;
        config.sources.openalex.enabled = false;
        config.sources.semantic_scholar.enabled = false;
        config.sources.icite.enabled = false;
        assert!(matches!(config.validate(), Err(ConfigError::NoSourcesEnabled)));
    }

    #[test]
    fn test_search_terms_are_deduplicated() {
        let mut config = with_contact();
        config.terms = vec![
            "AHRQ Compendium".to_string(),
            "ahrq compendium ".to_string(),
            "".to_string(),
            "chsp-compendium-2018.csv".to_string(),
        ];
        let terms = config.search_terms();
        assert_eq!(terms.len(), 2);
        assert!(terms[1].category.needs_full_text_search());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let toml_content = r#"
contact_email = "ops@example.org"
max_results_per_query = 50
terms = ["AHRQ Compendium"]

[sources.pubmed]
api_key = "ncbi-key"

[sources.openalex]
daily_quota = 500

[sources.semantic_scholar]
enabled = false

[relevance]
threshold = 1.0

[relevance.weights]
canonical_term = 3.0

[classifier.statistical]
enabled = false

[run]
deadline_secs = 60
workers = 2

[logging]
format = "json"
"#;
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = load_config(Some(&path)).unwrap();

        assert_eq!(config.contact(), Some("ops@example.org"));
        assert_eq!(config.max_results_per_query, 50);
        assert_eq!(config.terms, vec!["AHRQ Compendium"]);
        assert_eq!(config.sources.pubmed.api_key.as_deref(), Some("ncbi-key"));
        assert_eq!(config.sources.pubmed.requests_per_second(), 10);
        assert_eq!(config.sources.openalex.daily_quota, 500);
        assert!(!config.sources.semantic_scholar.enabled);
        assert_eq!(config.relevance.threshold, 1.0);
        assert_eq!(config.relevance.weights.canonical_term, 3.0);
        assert_eq!(config.relevance.weights.keyword_hit, 0.5);
        assert!(!config.classifier.statistical.enabled);
        assert_eq!(config.run.deadline_secs, Some(60));
        assert_eq!(config.run.workers, 2);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_config_nonexistent_file() {
        let result = load_config(Some(Path::new("/nonexistent/config.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = with_contact();
        let text = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.contact(), Some("ops@example.org"));
        assert_eq!(parsed.sources.openalex.daily_quota, config.sources.openalex.daily_quota);
        assert_eq!(parsed.relevance.canonical_terms, config.relevance.canonical_terms);
    }
}
