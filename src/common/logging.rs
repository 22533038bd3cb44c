//! Logging and tracing configuration
//!
//! Logs go to stderr so that stdout stays free for reports. An optional log
//! file receives the same events without ANSI colors.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter for a given `-v` count
fn default_filter(verbosity: u8) -> EnvFilter {
    let directive = match verbosity {
        0 => "orchestra=warn,warn",
        1 => "orchestra=info,warn",
        2 => "orchestra=debug,info",
        _ => "orchestra=trace,info",
    };
    EnvFilter::new(directive)
}

/// Initialize tracing for the CLI
///
/// `RUST_LOG` takes precedence over the verbosity flag.
pub fn init_cli(verbosity: u8, log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbosity));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let file = log_file.and_then(|path| {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("Warning: Could not open log file {}: {}", path.display(), e);
                None
            }
        }
    });

    let file_layer = file.map(|file| {
        fmt::layer()
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
    });

    // try_init: tests and embedding callers may already have a subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
}
