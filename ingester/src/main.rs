mod app;
mod fetch;
mod model;
mod runner;
mod sink;

use clap::{Parser, Subcommand};
use ingest_core::{telemetry, Config, StorageConfig};
use std::path::PathBuf;
use std::process;
use tracing::{debug, error, info};

#[derive(Parser)]
#[clap(name = "ingester")]
#[clap(about = "Fetches configured HTTP APIs and lands the payloads in S3", version)]
struct Cli {
    /// Endpoints configuration file (JSON or TOML)
    #[clap(long, env = "INGEST_CONFIG", default_value = "config.json")]
    config: PathBuf,

    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Fetch every endpoint once (default)
    Batch,

    /// Backfill each endpoint day by day from start_date to end_date
    Historical,

    /// Fetch everything since each endpoint's last_run (default: the last 24 hours)
    Incremental,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        // telemetry may not be up yet
        eprintln!("Fatal error: {:#}", e);
        error!(error = %e, "Fatal error");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)
        .map_err(|e| anyhow::anyhow!("Failed to load config {}: {}", cli.config.display(), e))?;

    // Initialize telemetry
    telemetry::init(&config.telemetry)?;

    let storage = StorageConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load S3 settings: {}", e))?;

    let app = app::App::new(config, storage).await?;

    let report = match cli.command.unwrap_or(Commands::Batch) {
        Commands::Batch => app.run_batch().await,
        Commands::Historical => app.run_historical().await,
        Commands::Incremental => {
            let (report, cursors) = app.run_incremental().await;
            for (endpoint, last_run) in &cursors {
                info!(endpoint = %endpoint, last_run = %last_run, "Cursor after run");
            }
            report
        }
    };

    debug!(report = %serde_json::to_string(&report)?, "Run report");

    telemetry::shutdown();
    Ok(())
}
