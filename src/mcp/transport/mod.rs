//! Transport layer
//!
//! A transport moves JSON-RPC envelopes to and from one MCP server. Sending
//! and receiving are decoupled: `send` hands a message to the channel and
//! returns, while every inbound message (from any transport) arrives on the
//! [`Inbound`] receiver returned by `connect`. The session correlates the two
//! by request id, so no transport needs request/response pairing of its own.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::common::config::Settings;
use crate::common::{Error, Result};
use crate::mcp::types::JsonRpcMessage;
use crate::testing::ServerConfig;

pub mod auth;
pub mod http;
pub mod sse;
pub mod stdio;

#[cfg(test)]
pub(crate) mod scripted;

pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

/// Transport kind, selected once from the server configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
    Sse,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::Http => write!(f, "http"),
            TransportKind::Sse => write!(f, "sse"),
        }
    }
}

/// Something that arrived from the server side of a transport
#[derive(Debug)]
pub enum TransportEvent {
    /// A decoded JSON-RPC envelope
    Message(JsonRpcMessage),
    /// Delivery of one request failed; the channel itself is still usable
    Failed { id: u64, error: Error },
    /// The channel is gone; no further events will arrive
    Closed { reason: String },
}

/// Sending half used by transport tasks
pub type InboundSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of a connected transport
#[derive(Debug)]
pub struct Inbound {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Inbound {
    /// Wait for the next inbound event
    ///
    /// Returns `None` once every sender has been dropped.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Create a connected inbound channel pair
pub fn inbound_channel() -> (InboundSender, Inbound) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Inbound { rx })
}

/// Forward a raw JSON payload as one or more inbound messages
///
/// Accepts a single envelope or a JSON-RPC batch array.
pub(crate) fn forward_payload(sender: &InboundSender, payload: Value) {
    let items = match payload {
        Value::Array(items) => items,
        other => vec![other],
    };
    for item in items {
        match serde_json::from_value::<JsonRpcMessage>(item) {
            Ok(message) => {
                let _ = sender.send(TransportEvent::Message(message));
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring malformed JSON-RPC message"),
        }
    }
}

/// Request id of an outgoing envelope, if it is a request
pub(crate) fn request_id(message: &Value) -> Option<u64> {
    message.get("id").and_then(Value::as_u64)
}

/// Capability set shared by the stdio, HTTP and SSE transports
#[async_trait]
pub trait Transport: Send {
    /// Transport kind
    fn kind(&self) -> TransportKind;

    /// Human-readable target (command line or URL) for logs and reports
    fn target(&self) -> String;

    /// Establish the channel and return its inbound side
    async fn connect(&mut self) -> Result<Inbound>;

    /// Transmit one request or notification without waiting for a reply
    async fn send(&mut self, message: Value) -> Result<()>;

    /// Record the protocol version agreed during the handshake
    fn set_protocol_version(&mut self, _version: &str) {}

    /// Release all transport-owned resources
    ///
    /// Safe to call repeatedly and after a failed connect.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Build the transport for an (already interpolated) server configuration
pub fn create_transport(server: &ServerConfig, settings: &Settings) -> Result<Box<dyn Transport>> {
    let transport: Box<dyn Transport> = match server {
        ServerConfig::Stdio { command, args, env } => Box::new(StdioTransport::new(
            command,
            args.clone(),
            env.clone(),
            settings.timeouts.teardown_grace_ms,
        )),
        ServerConfig::Http { url, auth } => Box::new(HttpTransport::new(url, auth.clone())?),
        ServerConfig::Sse { url, auth } => Box::new(SseTransport::new(
            url,
            auth.clone(),
            settings.timeouts.sse_endpoint_timeout_ms,
        )?),
    };
    Ok(transport)
}
