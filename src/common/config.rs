//! Harness settings file handling
//!
//! Settings cover machine-local behavior (timeouts, where reports go, client
//! identity). Anything describing the server under test lives in the
//! collection instead.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::Result;

/// Main settings structure
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Report output settings
    #[serde(default)]
    pub reports: ReportSettings,

    /// Identity sent in the initialize request
    #[serde(default)]
    pub client: ClientIdentity,

    /// Optional log file receiving everything written to stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

/// Timeout settings in milliseconds
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Timeouts {
    /// Per-call timeout when the collection has no `defaults.timeout_ms`
    #[serde(default = "default_request_timeout")]
    pub default_timeout_ms: u64,

    /// How long a stdio server may take to exit after stdin closes
    #[serde(default = "default_teardown_grace")]
    pub teardown_grace_ms: u64,

    /// How long to wait for the SSE `endpoint` event
    #[serde(default = "default_sse_endpoint")]
    pub sse_endpoint_timeout_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_request_timeout(),
            teardown_grace_ms: default_teardown_grace(),
            sse_endpoint_timeout_ms: default_sse_endpoint(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30_000
}
fn default_teardown_grace() -> u64 {
    2_000
}
fn default_sse_endpoint() -> u64 {
    10_000
}

/// Report output configuration
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ReportSettings {
    /// Write a JSON report after each run
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory for JSON reports
    #[serde(default = "default_report_dir")]
    pub dir: PathBuf,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            dir: default_report_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

/// Client name/version announced during the handshake
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientIdentity {
    #[serde(default = "default_client_name")]
    pub name: String,
    #[serde(default = "default_client_version")]
    pub version: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_client_version(),
        }
    }
}

fn default_client_name() -> String {
    "orchestra".to_string()
}
fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Settings {
    /// Load settings from the default config file
    ///
    /// Returns default settings if the file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load settings from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse settings from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}
