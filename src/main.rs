//! subject-flow CLI entry point.

use anyhow::Result;
use clap::Parser;

use subject_flow::cli::commands::{graph, matching, pending, publish, run, sweep};
use subject_flow::cli::runtime::{load_config, Runtime};
use subject_flow::cli::{handle_error, Cli, Commands};
use subject_flow::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = dispatch(cli).await {
        handle_error(err, json);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let _log_guard = LoggerImpl::init(&LogConfig::try_from(&config.logging)?)?;

    match cli.command {
        Commands::Match { subject, recurse } => matching::execute(&config, subject, recurse, cli.json),
        Commands::Graph { subject } => graph::execute(&config, subject, cli.json),
        Commands::Run => run::execute(Runtime::connect(config).await?, cli.json).await,
        Commands::Sweep => sweep::execute(Runtime::connect(config).await?, cli.json).await,
        Commands::Publish { subject } => {
            publish::execute(Runtime::connect(config).await?, subject, cli.json).await
        }
        Commands::Pending => pending::execute(Runtime::connect(config).await?, cli.json).await,
    }
}
