//! Configuration paths
//!
//! Uses the platform configuration directory:
//! - Linux: `$XDG_CONFIG_HOME/orchestra/config.toml`
//! - macOS: `~/Library/Application Support/orchestra/config.toml`
//! - Windows: `%APPDATA%\orchestra\config\config.toml`

use std::path::PathBuf;

const APP_NAME: &str = "orchestra";

/// Get the configuration directory
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the settings file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}
