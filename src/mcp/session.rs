//! MCP client session
//!
//! Owns one transport, performs the initialize handshake and correlates
//! responses with requests. A background task drains the transport's
//! inbound channel and resolves pending requests by id, so replies may
//! arrive in any order and late replies to timed-out requests are dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::common::config::ClientIdentity;
use crate::common::{Error, Result};

use super::transport::{Inbound, Transport, TransportEvent, TransportKind};
use super::types::{
    initialize_params, InitializeResult, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    ListToolsResult, ServerIdentity, ToolInfo,
};

/// Upper bound on `tools/list` pages, in case a server loops its cursor
const MAX_TOOL_PAGES: usize = 100;

/// A request waiting for its response
struct PendingRequest {
    method: String,
    created: Instant,
    slot: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct Correlator {
    pending: HashMap<u64, PendingRequest>,
    /// Set once the channel is gone; later calls fail immediately
    lost: Option<String>,
}

type Shared = Arc<Mutex<Correlator>>;

/// An initialized MCP session
pub struct Session {
    transport: Box<dyn Transport>,
    correlator: Shared,
    next_id: u64,
    receiver: Option<JoinHandle<()>>,
    server: ServerIdentity,
    protocol_version: Option<String>,
    capabilities: Value,
    closed: bool,
}

impl Session {
    /// Connect the transport and perform the initialize handshake
    ///
    /// Any failure here is reported as a connection error and the transport
    /// is torn down before returning.
    pub async fn connect(
        transport: Box<dyn Transport>,
        client: &ClientIdentity,
        timeout: Duration,
    ) -> Result<Self> {
        let mut session = Self::open(transport).await?;

        if let Err(e) = session.handshake(client, timeout).await {
            let _ = session.close().await;
            return Err(match e {
                Error::Connection(reason) => Error::Connection(reason),
                other => Error::Connection(format!("Handshake failed: {}", other)),
            });
        }

        Ok(session)
    }

    /// Connect the transport and start the receive loop, without a handshake
    pub async fn open(mut transport: Box<dyn Transport>) -> Result<Self> {
        let inbound = match transport.connect().await {
            Ok(inbound) => inbound,
            Err(e) => {
                let _ = transport.disconnect().await;
                return Err(match e {
                    Error::Connection(reason) => Error::Connection(reason),
                    other => Error::Connection(other.to_string()),
                });
            }
        };

        let correlator: Shared = Arc::new(Mutex::new(Correlator::default()));
        let receiver = tokio::spawn(receive_loop(inbound, correlator.clone()));

        Ok(Self {
            transport,
            correlator,
            next_id: 1,
            receiver: Some(receiver),
            server: ServerIdentity::default(),
            protocol_version: None,
            capabilities: Value::Null,
            closed: false,
        })
    }

    async fn handshake(&mut self, client: &ClientIdentity, timeout: Duration) -> Result<()> {
        let result = self
            .call(
                "initialize",
                Some(initialize_params(&client.name, &client.version)),
                timeout,
            )
            .await?;

        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| Error::InvalidResponse(format!("Malformed initialize result: {}", e)))?;

        if let Some(version) = &init.protocol_version {
            if version != super::types::PROTOCOL_VERSION {
                tracing::info!(server_version = %version, "Server selected a different protocol version");
            }
            self.transport.set_protocol_version(version);
        }

        self.notify("notifications/initialized", None).await?;

        tracing::info!(server = %init.server_info, "MCP session initialized");
        self.server = init.server_info;
        self.protocol_version = init.protocol_version;
        self.capabilities = init.capabilities;
        Ok(())
    }

    /// Get the next request id
    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Send a request and wait for its response
    pub async fn call(&mut self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value> {
        let id = self.next_id();
        let (slot, response) = oneshot::channel();

        {
            let mut correlator = self.correlator.lock();
            if let Some(reason) = &correlator.lost {
                return Err(Error::Connection(reason.clone()));
            }
            correlator.pending.insert(
                id,
                PendingRequest {
                    method: method.to_string(),
                    created: Instant::now(),
                    slot,
                },
            );
        }

        let request = serde_json::to_value(JsonRpcRequest::new(id, method, params))?;
        tracing::debug!(id, method, "Sending request");

        if let Err(e) = self.transport.send(request).await {
            self.correlator.lock().pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Connection(
                self.lost_reason()
                    .unwrap_or_else(|| "receive loop stopped".to_string()),
            )),
            Err(_) => {
                self.correlator.lock().pending.remove(&id);
                tracing::warn!(id, method, timeout_ms = timeout.as_millis() as u64, "Request timed out");
                Err(Error::timeout(method, timeout.as_millis() as u64))
            }
        }
    }

    /// Send a notification
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<()> {
        if let Some(reason) = self.lost_reason() {
            return Err(Error::Connection(reason));
        }
        let notification = serde_json::to_value(JsonRpcNotification::new(method, params))?;
        self.transport.send(notification).await
    }

    /// List every tool the server exposes, following pagination
    pub async fn list_tools(&mut self, timeout: Duration) -> Result<Vec<ToolInfo>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_TOOL_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.call("tools/list", params, timeout).await?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| Error::InvalidResponse(format!("Malformed tools/list result: {}", e)))?;

            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(pages = MAX_TOOL_PAGES, "Stopped following tools/list cursor");
        Ok(tools)
    }

    /// Invoke a tool and return the raw result object
    ///
    /// An `isError: true` result is a successful call; only transport and
    /// protocol failures are returned as errors.
    pub async fn call_tool(&mut self, name: &str, arguments: Value, timeout: Duration) -> Result<Value> {
        self.call(
            "tools/call",
            Some(json!({ "name": name, "arguments": arguments })),
            timeout,
        )
        .await
    }

    /// Server identity from the handshake
    pub fn server(&self) -> &ServerIdentity {
        &self.server
    }

    /// Protocol version the server answered with
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// Capabilities advertised by the server
    pub fn capabilities(&self) -> &Value {
        &self.capabilities
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Why the connection was lost, if it was
    pub fn lost_reason(&self) -> Option<String> {
        self.correlator.lock().lost.clone()
    }

    /// Stop the receive loop and disconnect the transport
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = self.transport.disconnect().await;
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
        fail_all(&self.correlator, "session closed".to_string());
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
    }
}

/// Dispatch inbound events until the transport closes
async fn receive_loop(mut inbound: Inbound, correlator: Shared) {
    while let Some(event) = inbound.recv().await {
        match event {
            TransportEvent::Message(message) => dispatch(message, &correlator),
            TransportEvent::Failed { id, error } => {
                let pending = correlator.lock().pending.remove(&id);
                match pending {
                    Some(request) => {
                        let _ = request.slot.send(Err(error));
                    }
                    None => tracing::debug!(id, error = %error, "Dropping failure for unknown request"),
                }
            }
            TransportEvent::Closed { reason } => {
                tracing::warn!(reason = %reason, "Connection to MCP server lost");
                fail_all(&correlator, reason);
                return;
            }
        }
    }
    fail_all(&correlator, "transport channel closed".to_string());
}

fn dispatch(message: JsonRpcMessage, correlator: &Shared) {
    let Some(id) = message.response_id() else {
        match &message.method {
            Some(method) => tracing::debug!(method = %method, "Ignoring server notification"),
            None => tracing::debug!("Ignoring message without id"),
        }
        return;
    };

    let pending = correlator.lock().pending.remove(&id);
    match pending {
        Some(request) => {
            tracing::debug!(
                id,
                method = %request.method,
                elapsed_ms = request.created.elapsed().as_millis() as u64,
                "Received response"
            );
            let _ = request.slot.send(message.into_result());
        }
        None => tracing::debug!(id, "Dropping response for unknown or timed-out request"),
    }
}

fn fail_all(correlator: &Shared, reason: String) {
    let drained: Vec<PendingRequest> = {
        let mut correlator = correlator.lock();
        if correlator.lost.is_none() {
            correlator.lost = Some(reason.clone());
        }
        correlator.pending.drain().map(|(_, request)| request).collect()
    };
    for request in drained {
        let _ = request.slot.send(Err(Error::Connection(reason.clone())));
    }
}
