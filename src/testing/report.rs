//! Run report
//!
//! Everything a console renderer or CI job needs to know about a run,
//! without touching transport or protocol details.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::common::{Error, Result};
use crate::mcp::transport::TransportKind;
use crate::mcp::types::ServerIdentity;

use super::assertions::{AssertionOutcome, FailureReason};
use super::config::StepKind;

/// Status of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Error,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Success => write!(f, "success"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Error => write!(f, "error"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Passed => write!(f, "passed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What an assert step checked and what it found
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionDetail {
    pub op: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    pub message: String,
}

impl AssertionDetail {
    pub fn new(op: &str, path: Option<&str>, expected: Option<Value>, outcome: AssertionOutcome) -> Self {
        Self {
            op: op.to_string(),
            path: path.map(str::to_string),
            expected,
            actual: outcome.actual,
            reason: outcome.reason,
            message: outcome.message,
        }
    }
}

/// Outcome of one step
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step_id: String,
    pub kind: StepKind,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Tool call attempts made, including retries
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Raw tool result object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertion: Option<AssertionDetail>,
}

impl StepOutcome {
    /// An outcome with only identity filled in
    pub fn new(step_id: &str, kind: StepKind, status: StepStatus) -> Self {
        Self {
            step_id: step_id.to_string(),
            kind,
            status,
            description: None,
            started_at: Utc::now(),
            duration_ms: 0,
            attempts: 0,
            tool: None,
            input: None,
            output: None,
            error_kind: None,
            error: None,
            assertion: None,
        }
    }

    /// A step that never ran
    pub fn skipped(step_id: &str, kind: StepKind, reason: &str) -> Self {
        let mut outcome = Self::new(step_id, kind, StepStatus::Skipped);
        outcome.error = Some(reason.to_string());
        outcome
    }

    /// Record an error on this outcome and mark it errored
    pub fn with_error(mut self, error: &Error) -> Self {
        self.status = StepStatus::Error;
        self.error_kind = Some(error.kind().to_string());
        self.error = Some(error.to_string());
        self
    }
}

/// Which server was tested
#[derive(Debug, Clone, Serialize)]
pub struct ServerSummary {
    pub transport: TransportKind,
    pub target: String,
    /// Absent when the handshake never completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<ServerIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
}

/// Step counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn from_steps(steps: &[StepOutcome]) -> Self {
        let mut summary = Self {
            total: steps.len(),
            ..Self::default()
        };
        for step in steps {
            match step.status {
                StepStatus::Success => summary.passed += 1,
                StepStatus::Failed => summary.failed += 1,
                StepStatus::Error => summary.errors += 1,
                StepStatus::Skipped => summary.skipped += 1,
            }
        }
        summary
    }
}

/// Complete record of one collection run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub collection_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_hash: Option<String>,
    pub server: ServerSummary,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: RunStatus,
    pub summary: RunSummary,
    pub steps: Vec<StepOutcome>,
}

impl RunReport {
    /// Assemble a report, deriving status and summary from the steps
    ///
    /// A run with a handshake outcome in error, or any failed or errored
    /// step, is `Failed`.
    pub fn new(
        collection_name: &str,
        collection_hash: Option<String>,
        server: ServerSummary,
        started_at: DateTime<Utc>,
        steps: Vec<StepOutcome>,
    ) -> Self {
        let finished_at = Utc::now();
        let summary = RunSummary::from_steps(&steps);
        let status = if summary.failed == 0 && summary.errors == 0 {
            RunStatus::Passed
        } else {
            RunStatus::Failed
        };

        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            collection_name: collection_name.to_string(),
            collection_hash,
            server,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            status,
            summary,
            steps,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    /// Write the report as `<dir>/<run_id>.json`
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::Config(format!(
                "Failed to create report directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let path = dir.join(format!("{}.json", self.run_id));
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        tracing::info!(path = %path.display(), "Report written");
        Ok(path)
    }
}

/// Short content fingerprint of a collection file
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn server() -> ServerSummary {
        ServerSummary {
            transport: TransportKind::Stdio,
            target: "mock".into(),
            identity: Some(ServerIdentity {
                name: "mock".into(),
                version: "0.1.0".into(),
            }),
            protocol_version: Some("2024-11-05".into()),
        }
    }

    #[test]
    fn test_status_derived_from_steps() {
        let ok = RunReport::new(
            "c",
            None,
            server(),
            Utc::now(),
            vec![StepOutcome::new("a", StepKind::ToolCall, StepStatus::Success)],
        );
        assert!(ok.passed());

        let failed = RunReport::new(
            "c",
            None,
            server(),
            Utc::now(),
            vec![
                StepOutcome::new("a", StepKind::ToolCall, StepStatus::Success),
                StepOutcome::new("b", StepKind::Assert, StepStatus::Failed),
                StepOutcome::skipped("c", StepKind::ToolCall, "connection lost"),
            ],
        );
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(
            failed.summary,
            RunSummary {
                total: 3,
                passed: 1,
                failed: 1,
                errors: 0,
                skipped: 1
            }
        );
    }

    #[test]
    fn test_skipped_only_run_passes() {
        let report = RunReport::new(
            "c",
            None,
            server(),
            Utc::now(),
            vec![StepOutcome::skipped("a", StepKind::ToolCall, "fail fast")],
        );
        assert!(report.passed());
    }

    #[test]
    fn test_with_error_records_kind() {
        let outcome = StepOutcome::new("a", StepKind::ToolCall, StepStatus::Success)
            .with_error(&Error::timeout("tools/call", 50));
        assert_eq!(outcome.status, StepStatus::Error);
        assert_eq!(outcome.error_kind.as_deref(), Some("TimeoutError"));
    }

    #[test]
    fn test_save_writes_json() {
        let dir = TempDir::new().unwrap();
        let mut step = StepOutcome::new("call", StepKind::ToolCall, StepStatus::Success);
        step.output = Some(json!({"content": [], "isError": false}));
        let report = RunReport::new("c", Some(content_hash(b"name: c")), server(), Utc::now(), vec![step]);

        let path = report.save(&dir.path().join("nested")).unwrap();
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some(format!("{}.json", report.run_id).as_str())
        );

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["status"], "passed");
        assert_eq!(written["server"]["transport"], "stdio");
        assert_eq!(written["server"]["identity"]["name"], "mock");
        assert_eq!(written["steps"][0]["kind"], "tool_call");
        assert_eq!(written["summary"]["total"], 1);
        assert!(written["steps"][0].get("assertion").is_none());
    }

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash(b"name: demo\n");
        assert_eq!(a.len(), 12);
        assert_eq!(a, content_hash(b"name: demo\n"));
        assert_ne!(a, content_hash(b"name: other\n"));
    }
}
