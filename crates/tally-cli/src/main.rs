mod cmd_check;
mod cmd_replay;
mod cmd_run;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use tally_config::TallyConfig;

#[derive(Parser)]
#[command(name = "tally", about = "Bucketed metric aggregation over event streams")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and compile a configuration without processing events
    Check {
        /// Path to tally.toml
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Replay a JSONL event file through one in-process engine
    Replay {
        #[arg(short, long)]
        config: PathBuf,
        /// JSONL events, one `{"atom":..,"ts":..,"fields":{..}}` per line
        #[arg(short, long)]
        events: PathBuf,
        /// Flush open buckets at this instant (nanos) instead of the last event
        #[arg(long)]
        until: Option<i64>,
    },
    /// Run the async runtime fed by a JSONL file or stdin (`-`)
    Run {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long, default_value = "-")]
        events: String,
        /// Drive bucket timers from the wall clock (epoch-nanosecond events)
        #[arg(long)]
        live: bool,
        #[arg(long)]
        until: Option<i64>,
    },
}

/// Load `path` and return it with the directory relative paths resolve against.
fn load_config(path: &Path) -> Result<(TallyConfig, PathBuf)> {
    let path = path
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("config path '{}': {e}", path.display()))?;
    let config = TallyConfig::load(&path)?;
    let base_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((config, base_dir))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            let (config, _) = load_config(&config)?;
            cmd_check::run(&config)?;
        }
        Commands::Replay {
            config,
            events,
            until,
        } => {
            let (config, base_dir) = load_config(&config)?;
            let _guard = tally_runtime::tracing_init::init_tracing(&config.logging, &base_dir)?;
            cmd_replay::run(&config, &base_dir, &events, until)?;
        }
        Commands::Run {
            config,
            events,
            live,
            until,
        } => {
            let (config, base_dir) = load_config(&config)?;
            let _guard = tally_runtime::tracing_init::init_tracing(&config.logging, &base_dir)?;
            cmd_run::run(config, &base_dir, &events, live, until).await?;
        }
    }

    Ok(())
}
