//! CLI command definitions
//!
//! Defines the clap commands for the orchestra CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a test collection against its MCP server
    Run {
        /// Path to the YAML collection file
        collection: PathBuf,

        /// Skip the remaining steps after the first failed or errored step
        #[arg(long)]
        fail_fast: bool,

        /// Directory for the JSON report (default from settings)
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Do not write a JSON report
        #[arg(long)]
        no_report: bool,

        /// Print the report as JSON instead of the step listing
        #[arg(long)]
        json: bool,

        /// Only print the final summary
        #[arg(long, short)]
        quiet: bool,

        /// Print each tool call's raw result
        #[arg(long)]
        show_responses: bool,
    },

    /// Check a collection for errors without connecting to the server
    Validate {
        /// Path to the YAML collection file
        collection: PathBuf,
    },

    /// Connect to a collection's server and list the tools it exposes
    Tools {
        /// Path to the YAML collection file
        collection: PathBuf,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },
}
