//! Error types for the MCP test harness
//!
//! Variants follow the harness failure taxonomy: validation problems are
//! caught before a run starts, connection problems abort the run, and
//! transport/protocol/timeout problems are local to a single step.
//! Application-level tool errors and assertion failures are not errors at
//! all; they are recorded as step outcomes.

use std::io;
use thiserror::Error;

use crate::testing::ValidationErrors;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// JSON-RPC 2.0 error codes
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Validation Errors ===
    #[error("Collection is invalid:\n{0}")]
    Validation(ValidationErrors),

    // === Connection Errors ===
    #[error("Connection error: {0}")]
    Connection(String),

    // === Transport Errors ===
    #[error("Transport error: {0}")]
    Transport(String),

    // === Protocol Errors ===
    #[error("Server returned error {code}: {message}")]
    Protocol {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    // === Timeout Errors ===
    #[error("Request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Interrupted")]
    Interrupted,
}

impl Error {
    /// Create a protocol error from a JSON-RPC error object
    pub fn protocol(code: i64, message: &str) -> Self {
        Self::Protocol {
            code,
            message: message.to_string(),
            data: None,
        }
    }

    /// Create a timeout error for a request
    pub fn timeout(method: &str, timeout_ms: u64) -> Self {
        Self::Timeout {
            method: method.to_string(),
            timeout_ms,
        }
    }

    /// Whether a tool call that failed with this error may be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::Protocol { .. }
                | Error::InvalidResponse(_)
                | Error::Timeout { .. }
        )
    }

    /// Whether this error means the session can no longer be used
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Taxonomy label recorded on step outcomes and reports
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) | Error::Config(_) | Error::ConfigParse(_) => "ValidationError",
            Error::Connection(_) => "ConnectionError",
            Error::Transport(_) => "TransportError",
            Error::Protocol { .. } | Error::InvalidResponse(_) => "ProtocolError",
            Error::Timeout { .. } => "TimeoutError",
            Error::Io(_) | Error::FileRead { .. } => "IoError",
            Error::Json(_) => "ProtocolError",
            Error::Internal(_) => "InternalError",
            Error::Interrupted => "Interrupted",
        }
    }
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Error::Validation(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Transport("503".into()).is_retryable());
        assert!(Error::timeout("tools/call", 10).is_retryable());
        assert!(Error::protocol(codes::INVALID_PARAMS, "unknown tool").is_retryable());
        assert!(!Error::Connection("closed".into()).is_retryable());
        assert!(Error::Connection("closed".into()).is_connection_loss());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(Error::timeout("x", 1).kind(), "TimeoutError");
        assert_eq!(Error::protocol(-1, "x").kind(), "ProtocolError");
        assert_eq!(Error::Connection("x".into()).kind(), "ConnectionError");
    }

    #[test]
    fn test_display_includes_method() {
        let msg = Error::timeout("tools/call", 250).to_string();
        assert!(msg.contains("tools/call"));
        assert!(msg.contains("250ms"));
    }
}
