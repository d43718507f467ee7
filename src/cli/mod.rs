//! CLI: the job trigger for the crawl engine.
//!
//! Parses arguments, loads engine settings and job configurations, wires
//! the pool + service + stores together, and reports per-job summaries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::browser::BrowserPool;
use crate::config::EngineSettings;
use crate::models::{JobSummary, ScraperConfiguration};
use crate::scrape::ScrapeService;
use crate::store::{ConfigStore, JsonDirConfigStore, JsonFileResultStore, ResultStore};

#[derive(Parser)]
#[command(name = "dragnet")]
#[command(about = "Configuration-driven headless-browser crawler")]
#[command(version)]
pub struct Cli {
    /// Engine settings file (TOML); built-in defaults apply when omitted
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scrape job from a configuration file
    Run {
        /// Job configuration (JSON)
        config: PathBuf,
        /// Results file, upserted on every run
        #[arg(short, long, default_value = "results.json")]
        out: PathBuf,
    },

    /// Run every job configuration in a directory concurrently
    Batch {
        /// Directory of .json job configurations
        dir: PathBuf,
        /// Results file shared by all jobs
        #[arg(short, long, default_value = "results.json")]
        out: PathBuf,
        /// Only run configurations with cronEnabled set (what the
        /// external scheduler would pick up)
        #[arg(long)]
        scheduled_only: bool,
    },

    /// Validate a job configuration without launching any browser
    Check {
        /// Job configuration (JSON)
        config: PathBuf,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = EngineSettings::load(cli.settings.as_deref())?;

    match cli.command {
        Commands::Check { config } => {
            let config = load_job_config(&config)?;
            config
                .validate()
                .map_err(|reason| anyhow::anyhow!("invalid configuration: {reason}"))?;
            println!(
                "configuration '{}' is valid ({} start urls, {:?})",
                config.id,
                config.start_urls.len(),
                config.page_type
            );
            Ok(())
        }
        Commands::Run { config, out } => {
            let config = load_job_config(&config)?;
            let summaries = execute_jobs(settings, vec![config], out).await?;
            report(&summaries);
            Ok(())
        }
        Commands::Batch {
            dir,
            out,
            scheduled_only,
        } => {
            let store = JsonDirConfigStore::new(dir.clone());
            let configs = if scheduled_only {
                store.find_enabled_for_schedule().await?
            } else {
                store.all()?
            };
            anyhow::ensure!(
                !configs.is_empty(),
                "no matching .json job configurations found in {}",
                dir.display()
            );
            let summaries = execute_jobs(settings, configs, out).await?;
            report(&summaries);
            Ok(())
        }
    }
}

/// Bring up the pool, run every job, then tear the pool down.
async fn execute_jobs(
    settings: EngineSettings,
    configs: Vec<ScraperConfiguration>,
    out: PathBuf,
) -> anyhow::Result<Vec<JobSummary>> {
    let pool = Arc::new(BrowserPool::new(settings.clone()));
    pool.initialize()
        .await
        .context("initializing browser pool")?;

    let results: Arc<dyn ResultStore> = Arc::new(JsonFileResultStore::new(out));
    let service = ScrapeService::new(pool.clone(), results, settings);
    let summaries = service.run_jobs(&configs).await;

    let stats = pool.stats().await;
    info!(
        "pool served {} pages across {} browsers",
        stats.pages_created, stats.total
    );
    pool.shutdown().await;
    Ok(summaries)
}

fn report(summaries: &[JobSummary]) {
    for summary in summaries {
        let status = if summary.success { "ok" } else { "failed" };
        println!(
            "{}: {status} - {} results ({})",
            summary.config_id, summary.results_count, summary.message
        );
    }
}

fn load_job_config(path: &Path) -> anyhow::Result<ScraperConfiguration> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

