//! Orchestra - a test harness for MCP servers
//!
//! This library drives declarative YAML test collections against Model
//! Context Protocol servers over stdio, HTTP or SSE, and reports the
//! outcome of every step.

pub mod cli;
pub mod commands;
pub mod common;
pub mod mcp;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use testing::{Collection, RunReport, RunStatus};
