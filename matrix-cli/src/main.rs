// mtx
// Command line runner for test matrices

mod commands;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::Result;

use matrix_service::{init_logging, SchedulerConfig};

#[derive(Parser, Debug)]
#[command(name = "mtx", version, about = "Run and validate test matrices")]
struct Cli {
    /// Scheduler configuration file (YAML)
    #[arg(long, short = 'c', global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one or more matrices
    Run(commands::run::RunArgs),
    /// Check matrices without running them
    Validate(commands::validate::ValidateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SchedulerConfig::from_file(path)?,
        None => SchedulerConfig::default(),
    }
    .with_env_overrides()?;
    init_logging(&config.log_level);

    match cli.command {
        Command::Run(args) => commands::run::execute(args, config).await,
        Command::Validate(args) => commands::validate::execute(args),
    }
}
