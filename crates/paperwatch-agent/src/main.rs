//! paperwatch: arXiv papers summarized into a Notion database.
//! Entry point for the agent binary.

mod config;
mod runner;
mod schedule;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use paperwatch_ingestion::DateWindow;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "paperwatch", version, about = "Summarize new arXiv papers into Notion")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, env = "PAPERWATCH_CONFIG", default_value = "paperwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the pipeline once and exit.
    Once {
        /// Look back this many days instead of `topic.lookback_days`.
        #[arg(long, conflicts_with = "from")]
        days: Option<u32>,
        /// First submission date of an explicit window (YYYY-MM-DD).
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last submission date of the window; defaults to today.
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
        /// Summarize but write nothing to Notion.
        #[arg(long)]
        dry_run: bool,
        /// Print the run result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run on the configured schedule until interrupted.
    Watch {
        #[arg(long)]
        dry_run: bool,
        /// Run immediately instead of waiting for the first fire time.
        #[arg(long)]
        run_now: bool,
    },
    /// Show paper counts per review status in the Notion database.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Create any missing properties on the Notion database.
    SetupDb,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = config::Config::load(&cli.config)?;
    let settings = config.validate(|key| std::env::var(key).ok())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();

    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(config = %cli.config.display(), topic = %settings.topic.name, "Configuration loaded");

    match cli.command {
        Command::Once { days, from, to, dry_run, json } => {
            let today = Utc::now().date_naive();
            let window = match from {
                Some(start) => DateWindow::new(start, to.unwrap_or(today))?,
                None => DateWindow::last_days(today, days.unwrap_or(settings.topic.lookback_days))?,
            };

            let coordinator = runner::build_coordinator(&settings, dry_run)?;
            let result = coordinator.run(&settings.topic, window).await?;
            runner::print_result(&result, json)?;

            if runner::run_failed(&result) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Watch { dry_run, run_now } => {
            let coordinator = runner::build_coordinator(&settings, dry_run)?;
            runner::watch(&settings, &coordinator, run_now).await?;
        }
        Command::Status { json } => runner::status(&settings, json).await?,
        Command::SetupDb => runner::setup_db(&settings).await?,
    }

    Ok(ExitCode::SUCCESS)
}
