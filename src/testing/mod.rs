//! Collection runner
//!
//! Loads YAML test collections, validates them, and executes their steps
//! against an MCP server. Assertions are made against the structured
//! tool results rather than rendered text.

pub mod assertions;
mod config;
pub mod interpolate;
pub mod report;
pub mod runner;
pub mod validate;

pub use config::*;
pub use interpolate::{EnvSnapshot, Unresolved};
pub use report::{RunReport, RunStatus, StepOutcome, StepStatus};
pub use runner::{execute, run_collection, Interrupt, RunOptions};
pub use validate::{validate, Purpose, ValidationErrors, ValidationIssue};
