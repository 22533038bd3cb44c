//! CLI command handling
//!
//! Dispatches CLI commands and formats output.

mod render;

use std::path::Path;
use std::time::Duration;

use colored::Colorize;
use serde_json::json;

use crate::commands::Commands;
use crate::common::config::Settings;
use crate::common::{Error, Result};
use crate::mcp::{create_transport, Session};
use crate::testing::report::content_hash;
use crate::testing::{run_collection, validate, Collection, EnvSnapshot, Purpose, RunOptions};

/// How a command finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
    /// The collection was rejected before anything ran
    Invalid,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Passed => 0,
            Outcome::Failed => 1,
            Outcome::Invalid => 2,
        }
    }
}

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, settings: &Settings) -> Result<Outcome> {
    match command {
        Commands::Run {
            collection,
            fail_fast,
            report_dir,
            no_report,
            json,
            quiet,
            show_responses,
        } => {
            let content = read_collection(&collection)?;
            let Some(parsed) = parse_or_report(&content) else {
                return Ok(Outcome::Invalid);
            };
            let env = EnvSnapshot::capture(&parsed.env);
            if let Err(errors) = validate(&parsed, &env, Purpose::Run) {
                render::validation_errors(&errors);
                return Ok(Outcome::Invalid);
            }

            let mut options = RunOptions::from_settings(settings);
            options.fail_fast = fail_fast;
            options.collection_hash = Some(content_hash(content.as_bytes()));

            if !json && !quiet {
                render::run_header(&parsed);
            }

            // Ctrl-C stops the run between requests; the session is still closed
            let interrupt = options.interrupt.clone();
            let listener = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, stopping run");
                    interrupt.trigger();
                }
            });
            let report = run_collection(&parsed, &env, settings, &options).await;
            listener.abort();
            let report = report?;
            if options.interrupt.is_triggered() && !json {
                println!("{}", "Run interrupted".yellow());
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                render::report(&report, quiet, show_responses);
            }

            if settings.reports.enabled && !no_report {
                let dir = report_dir.unwrap_or_else(|| settings.reports.dir.clone());
                match report.save(&dir) {
                    Ok(path) if !json => println!("Report: {}", path.display().to_string().dimmed()),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Failed to write report"),
                }
            }

            Ok(if report.passed() {
                Outcome::Passed
            } else {
                Outcome::Failed
            })
        }

        Commands::Validate { collection } => {
            let content = read_collection(&collection)?;
            let Some(parsed) = parse_or_report(&content) else {
                return Ok(Outcome::Invalid);
            };
            let env = EnvSnapshot::capture(&parsed.env);
            match validate(&parsed, &env, Purpose::Run) {
                Ok(()) => {
                    render::validation_ok(&parsed);
                    Ok(Outcome::Passed)
                }
                Err(errors) => {
                    render::validation_errors(&errors);
                    Ok(Outcome::Invalid)
                }
            }
        }

        Commands::Tools { collection, json } => {
            let content = read_collection(&collection)?;
            let Some(parsed) = parse_or_report(&content) else {
                return Ok(Outcome::Invalid);
            };
            let env = EnvSnapshot::capture(&parsed.env);
            if let Err(errors) = validate(&parsed, &env, Purpose::Discovery) {
                render::validation_errors(&errors);
                return Ok(Outcome::Invalid);
            }

            let server = env
                .resolve_server(&parsed.server)
                .map_err(|e| Error::Config(e.to_string()))?;
            let timeout = Duration::from_millis(
                parsed
                    .defaults
                    .timeout_ms
                    .unwrap_or(settings.timeouts.default_timeout_ms),
            );
            let transport = create_transport(&server, settings)?;

            let mut session = tokio::select! {
                session = Session::connect(transport, &settings.client, timeout) => session?,
                _ = tokio::signal::ctrl_c() => {
                    return Err(Error::Interrupted);
                }
            };
            let tools = session.list_tools(timeout).await;
            if let Err(e) = session.close().await {
                tracing::warn!(error = %e, "Error while disconnecting from server");
            }
            let tools = tools?;

            if json {
                let listing = json!({
                    "server": session.server(),
                    "protocolVersion": session.protocol_version(),
                    "tools": tools
                        .iter()
                        .map(|tool| json!({
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters(),
                            "inputSchema": tool.input_schema,
                        }))
                        .collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                render::tools(session.server(), &tools);
            }

            Ok(Outcome::Passed)
        }
    }
}

fn read_collection(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })
}

/// Parse collection text, printing the problem when it is malformed
fn parse_or_report(content: &str) -> Option<Collection> {
    match Collection::parse(content) {
        Ok(collection) => Some(collection),
        Err(e) => {
            println!("{} {}", "✗".red(), e);
            None
        }
    }
}
