use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;
use vector_sync::SyncConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Replays vector layer scenarios against a scene")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSON scenario and print a summary of the resulting registry
    Replay {
        /// Scenario file
        scenario: PathBuf,

        /// Synchronizer config (JSON); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Extra frames rendered after the last step
        #[arg(long, default_value_t = 0)]
        frames: u32,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = real_main() {
        error!("{e}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<(), String> {
    let args = Args::parse();
    match args.command {
        Command::Replay {
            scenario,
            config,
            frames,
        } => cmd_replay(scenario, config, frames),
    }
}

fn cmd_replay(scenario: PathBuf, config: Option<PathBuf>, frames: u32) -> Result<(), String> {
    let text = fs::read_to_string(&scenario).map_err(|e| format!("read {scenario:?}: {e}"))?;
    let scenario: tools::Scenario =
        serde_json::from_str(&text).map_err(|e| format!("parse {scenario:?}: {e}"))?;

    let config = match config {
        Some(path) => {
            let text = fs::read_to_string(&path).map_err(|e| format!("read {path:?}: {e}"))?;
            SyncConfig::from_json_str(&text).map_err(|e| format!("config {path:?}: {e}"))?
        }
        None => SyncConfig::default(),
    };

    let summary = tools::run(&scenario, config, frames).map_err(|e| e.to_string())?;
    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}
