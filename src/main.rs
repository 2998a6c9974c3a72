use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use quantfolio::commands::{daemon, monitor, optimize, reset, rollback, status};
use quantfolio::config::EngineConfig;
use quantfolio::context::AppContext;
use std::path::PathBuf;

const DEFAULT_STATE_DIR: &str = "state";
const DEFAULT_DATA_DIR: &str = "data";

#[derive(Parser)]
#[command(name = "quantfolio")]
#[command(about = "Multi-factor portfolio trading engine")]
struct Cli {
    /// Directory holding persisted state (weights, positions, schedule)
    #[arg(long, value_name = "PATH", default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,
    /// Directory holding market data files (metrics.json, candles/)
    #[arg(long, value_name = "PATH", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monthly monitoring backtest once
    Monitor,
    /// Run the weight grid search once
    Optimize,
    /// Run continuously: daily cycle, monitoring ticks, scheduled jobs
    Daemon {
        /// Submit real orders through the order port instead of logging
        #[arg(long)]
        live: bool,
        /// Seconds between monitoring ticks
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
    /// Show current weights, open positions and job schedule
    Status,
    /// Restore the weight config that was active before the last promotion
    Rollback,
    /// Reset persisted state to defaults
    Reset {
        /// Clear only the tripped risk pause
        #[arg(long)]
        risk: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut engine_config = EngineConfig::default();
    if let Commands::Daemon { live, interval } = &cli.command {
        engine_config.dry_run = !live;
        engine_config.monitor_interval_secs = *interval;
    }
    let app = AppContext::initialize(cli.state_dir, cli.data_dir, engine_config)?;
    info!("quantfolio starting. Not financial advice. Use at your own risk.");

    match cli.command {
        Commands::Monitor => monitor::run(&app).await?,
        Commands::Optimize => optimize::run(&app).await?,
        Commands::Daemon { .. } => daemon::run(&app).await?,
        Commands::Status => status::run(&app).await?,
        Commands::Rollback => rollback::run(&app).await?,
        Commands::Reset { risk } => reset::run(&app, risk).await?,
    }
    Ok(())
}
