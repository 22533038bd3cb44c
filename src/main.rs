//! Orchestra - a test harness for MCP servers
//!
//! Runs declarative YAML test collections against Model Context Protocol
//! servers and reports per-step outcomes, with an exit code suitable for CI.

use std::path::PathBuf;

use clap::Parser;
use orchestra::common::config::Settings;
use orchestra::common::logging;
use orchestra::{cli, commands};
use commands::Commands;

#[derive(Parser)]
#[command(name = "orchestra", about = "Test harness for MCP servers")]
#[command(version, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Settings file (default: platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_cli(cli.verbose, settings.log_file.as_deref());

    match cli::dispatch(cli.command, &settings).await {
        Ok(outcome) => std::process::exit(outcome.exit_code()),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
