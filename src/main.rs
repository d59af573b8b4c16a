use anyhow::{Context, Result};
use clap::Parser;
use compendium_tracker::config::{load_config, LogFormat};
use compendium_tracker::CollectionOrchestrator;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Compendium Tracker - find and classify publications that use the AHRQ Compendium of U.S. Health Systems
#[derive(Parser, Debug)]
#[command(name = "compendium-tracker")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Collect, deduplicate and usage-classify scholarly records citing the AHRQ Compendium", long_about = None)]
struct Cli {
    /// Enable verbose logging (can be used multiple times for more verbosity: -v, -vv)
    #[arg(long, short, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short)]
    quiet: bool,

    /// Configuration file path
    #[arg(long)]
    config: Option<PathBuf>,

    /// Search term (repeatable); replaces the configured terms
    #[arg(long = "term", value_name = "TERM")]
    terms: Vec<String>,

    /// Classify on title and abstract only
    #[arg(long)]
    no_fulltext: bool,

    /// Global deadline in seconds (0 disables it)
    #[arg(long, value_name = "SECS")]
    deadline: Option<u64>,

    /// Write the classified records and run summary here instead of stdout
    #[arg(long, short, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())
        .with_context(|| match &cli.config {
            Some(path) => format!("loading {}", path.display()),
            None => "loading configuration from the environment".to_string(),
        })?;
    if !cli.terms.is_empty() {
        config.terms = cli.terms.clone();
    }
    if cli.no_fulltext {
        config.fulltext.enabled = false;
    }
    if let Some(deadline) = cli.deadline {
        config.run.deadline_secs = Some(deadline);
    }

    // Initialize tracing based on verbosity
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => config.logging.level.as_str(),
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let json = config.logging.format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("compendium_tracker={}", level)),
        ))
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    let orchestrator = CollectionOrchestrator::from_config(config)?;
    let run = orchestrator.run().await?;

    if run.summary.degraded() {
        tracing::warn!(
            failures = run.summary.total_failures(),
            deadline_reached = run.summary.deadline_reached,
            "recall may be degraded; see per_source in the summary"
        );
    }

    let output_json = serde_json::to_string_pretty(&run)?;
    match &cli.output {
        Some(path) => {
            std::fs::write(path, output_json)
                .with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), records = run.records.len(), "results written");
        }
        None => println!("{}", output_json),
    }

    Ok(())
}
