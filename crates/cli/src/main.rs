mod cli;
mod commands;
mod config;
mod indexer;
mod kube_client;
mod progress;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let exit_code = match cli.command {
        Command::Init(args) => commands::init::run(args).await?,
        Command::Destroy(args) => {
            commands::destroy::run(args).await?;
            0
        }
        Command::Index(args) => commands::index::run(args).await?,
        Command::Import(args) => commands::import::run(args).await?,
        Command::CheckAlerts(args) => commands::check_alerts::run(args).await?,
        Command::Measure(args) => commands::measure::run(args).await?,
    };

    std::process::exit(exit_code);
}
