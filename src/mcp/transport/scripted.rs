//! In-memory transport driven by a reply script, for unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::common::{Error, Result};
use crate::mcp::types::JsonRpcMessage;

use super::{inbound_channel, Inbound, InboundSender, Transport, TransportEvent, TransportKind};

/// What the fake server does with one request
pub(crate) enum Reply {
    Result(Value),
    Error(i64, &'static str),
    /// Delivery of this request fails at the transport level
    Fail(&'static str),
    /// Never answer
    Silent,
    /// The connection drops
    Close(&'static str),
    /// Answer after a delay
    After(Duration, Box<Reply>),
}

type Handler = Box<dyn FnMut(&str, &Value) -> Reply + Send>;

/// Shared view of what the transport saw
#[derive(Clone, Default)]
pub(crate) struct Probe {
    sent: Arc<Mutex<Vec<Value>>>,
    disconnects: Arc<AtomicUsize>,
}

impl Probe {
    /// Number of requests sent for a method
    pub fn calls(&self, method: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.get("method").and_then(Value::as_str) == Some(method))
            .count()
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

pub(crate) struct ScriptedTransport {
    handler: Handler,
    handshake: Option<Reply>,
    probe: Probe,
    sender: Option<InboundSender>,
}

impl ScriptedTransport {
    /// Transport that answers `initialize` itself and hands every other
    /// request to `handler`
    pub fn new(handler: impl FnMut(&str, &Value) -> Reply + Send + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            handshake: None,
            probe: Probe::default(),
            sender: None,
        }
    }

    /// Override the reply to `initialize`
    pub fn with_handshake(mut self, reply: Reply) -> Self {
        self.handshake = Some(reply);
        self
    }

    pub fn probe(&self) -> Probe {
        self.probe.clone()
    }
}

fn deliver(sender: InboundSender, id: u64, reply: Reply) {
    let message = |body: Value| {
        let mut envelope = json!({"jsonrpc": "2.0", "id": id});
        if let (Some(obj), Value::Object(extra)) = (envelope.as_object_mut(), body) {
            obj.extend(extra);
        }
        serde_json::from_value::<JsonRpcMessage>(envelope).map(TransportEvent::Message)
    };

    match reply {
        Reply::Result(result) => {
            if let Ok(event) = message(json!({ "result": result })) {
                let _ = sender.send(event);
            }
        }
        Reply::Error(code, text) => {
            if let Ok(event) = message(json!({"error": {"code": code, "message": text}})) {
                let _ = sender.send(event);
            }
        }
        Reply::Fail(text) => {
            let _ = sender.send(TransportEvent::Failed {
                id,
                error: Error::Transport(text.to_string()),
            });
        }
        Reply::Silent => {}
        Reply::Close(reason) => {
            let _ = sender.send(TransportEvent::Closed {
                reason: reason.to_string(),
            });
        }
        Reply::After(delay, reply) => {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                deliver(sender, id, *reply);
            });
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn target(&self) -> String {
        "scripted".to_string()
    }

    async fn connect(&mut self) -> Result<Inbound> {
        let (sender, inbound) = inbound_channel();
        self.sender = Some(sender);
        Ok(inbound)
    }

    async fn send(&mut self, message: Value) -> Result<()> {
        let sender = self
            .sender
            .clone()
            .ok_or_else(|| Error::Connection("not connected".to_string()))?;
        self.probe.sent.lock().push(message.clone());

        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            return Ok(());
        };
        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let reply = if method == "initialize" {
            self.handshake.take().unwrap_or_else(|| {
                Reply::Result(json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "scripted", "version": "1.0.0"}
                }))
            })
        } else {
            (self.handler)(method, &params)
        };
        deliver(sender, id, reply);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.sender = None;
        self.probe.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Handler that echoes tool arguments back as the result
pub(crate) fn echo_tools(method: &str, params: &Value) -> Reply {
    match method {
        "tools/call" => Reply::Result(params.get("arguments").cloned().unwrap_or(json!({}))),
        _ => Reply::Error(-32601, "Method not found"),
    }
}
