//! Command-line entry point for bundle-harvester

use std::path::PathBuf;
use std::process::ExitCode;

use bundle_harvester::{BundleHarvester, Config, RunReport, shutdown_on_signal};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "bundle-harvester", version, about, long_about = None)]
struct Cli {
    /// Configuration file (.toml, or .json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override scheduler.max_concurrent_requests
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Override scheduler.download_target
    #[arg(long, global = true)]
    target: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Walk the remote catalog and download new bundles
    Crawl,
    /// Download the entries of a precomputed key → URL dictionary
    Replay {
        /// Dictionary file (defaults to cache.dictionary_path)
        #[arg(short, long)]
        dictionary: Option<PathBuf>,

        /// Override replay.max_entries
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Print the effective configuration as TOML
    PrintConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "bundle-harvester failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> bundle_harvester::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(concurrency) = cli.concurrency {
        config.scheduler.max_concurrent_requests = concurrency;
    }
    if let Some(target) = cli.target {
        config.scheduler.download_target = Some(target);
    }

    let report = match cli.command {
        Command::PrintConfig => {
            config.validate()?;
            print!("{}", config.to_toml()?);
            return Ok(());
        }
        Command::Crawl => {
            let harvester = BundleHarvester::new(config)?;
            tokio::spawn(shutdown_on_signal(harvester.clone()));
            harvester.crawl().await?
        }
        Command::Replay { dictionary, limit } => {
            if let Some(limit) = limit {
                config.replay.max_entries = Some(limit);
            }
            let path = dictionary.unwrap_or_else(|| config.cache.dictionary_path.clone());
            let harvester = BundleHarvester::new(config)?;
            tokio::spawn(shutdown_on_signal(harvester.clone()));
            harvester.replay_file(&path).await?
        }
    };

    log_report(&report);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn log_report(report: &RunReport) {
    let elapsed = report.finished_at - report.started_at;
    tracing::info!(
        downloaded = report.scheduler.bundles_downloaded,
        failed = report.scheduler.bundles_failed,
        cancelled = report.scheduler.bundles_cancelled,
        batches = report.scheduler.batches,
        probe_cycles = report.scheduler.probe_cycles,
        persisted = ?report.persisted_entries,
        elapsed_secs = elapsed.num_seconds(),
        "Run finished"
    );
    if let Some(error) = &report.persist_error {
        tracing::warn!(error = %error, "Cache snapshot was not written");
    }
}
