//! Streamable HTTP transport
//!
//! Every message is its own POST. The response body is either a JSON
//! envelope or a short `text/event-stream` carrying the reply. The session id
//! handed out with the initialize response is echoed on later requests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tokio::task::JoinHandle;
use url::Url;

use crate::common::{Error, Result};
use crate::mcp::codec::SseDecoder;
use crate::testing::AuthConfig;

use super::auth::apply_auth;
use super::{
    forward_payload, inbound_channel, request_id, Inbound, InboundSender, Transport,
    TransportEvent, TransportKind,
};

pub const SESSION_HEADER: &str = "mcp-session-id";
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Upper bound on delivering one notification
const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport posting each message to a single MCP endpoint
pub struct HttpTransport {
    url: Url,
    auth: Option<AuthConfig>,
    client: Client,
    session_id: Arc<Mutex<Option<String>>>,
    protocol_version: Option<String>,
    sender: Option<InboundSender>,
    in_flight: Vec<JoinHandle<()>>,
}

impl HttpTransport {
    pub fn new(url: &str, auth: Option<AuthConfig>) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::Config(format!("Invalid URL '{}': {}", url, e)))?;
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url,
            auth,
            client,
            session_id: Arc::new(Mutex::new(None)),
            protocol_version: None,
            sender: None,
            in_flight: Vec::new(),
        })
    }

    /// Session id assigned by the server, once known
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn target(&self) -> String {
        self.url.to_string()
    }

    async fn connect(&mut self) -> Result<Inbound> {
        // No request is made here; reachability is proven by the handshake
        let (sender, inbound) = inbound_channel();
        self.sender = Some(sender);
        tracing::info!(url = %self.url, "HTTP transport ready");
        Ok(inbound)
    }

    async fn send(&mut self, message: Value) -> Result<()> {
        let sender = self
            .sender
            .clone()
            .ok_or_else(|| Error::Connection("HTTP transport is not connected".to_string()))?;

        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .json(&message);
        request = apply_auth(request, self.auth.as_ref())?;
        if let Some(session) = self.session_id.lock().clone() {
            request = request.header(SESSION_HEADER, session);
        }
        if let Some(version) = &self.protocol_version {
            request = request.header(PROTOCOL_VERSION_HEADER, version);
        }

        let url = self.url.clone();
        tracing::trace!(">>> POST {} {}", url, message);

        // Notifications are delivered before returning so that nothing
        // overtakes them, `notifications/initialized` in particular
        let Some(id) = request_id(&message) else {
            let response = request
                .timeout(NOTIFICATION_TIMEOUT)
                .send()
                .await
                .map_err(|e| Error::Transport(format!("POST {} failed: {}", url, e)))?;
            record_session_id(&response, &self.session_id);
            if !response.status().is_success() {
                return Err(status_error(response).await);
            }
            return Ok(());
        };

        let session_id = self.session_id.clone();
        self.in_flight.retain(|task| !task.is_finished());
        self.in_flight.push(tokio::spawn(async move {
            match request.send().await {
                Ok(response) => handle_response(response, id, &session_id, &sender).await,
                Err(e) => fail(&sender, id, Error::Transport(format!("POST {} failed: {}", url, e))),
            }
        }));

        Ok(())
    }

    fn set_protocol_version(&mut self, version: &str) {
        self.protocol_version = Some(version.to_string());
    }

    async fn disconnect(&mut self) -> Result<()> {
        for task in self.in_flight.drain(..) {
            task.abort();
        }
        self.sender = None;

        // Best effort: tell the server the session is over
        let session = self.session_id.lock().take();
        if let Some(session) = session {
            let mut request = self.client.delete(self.url.clone()).header(SESSION_HEADER, &session);
            request = apply_auth(request, self.auth.as_ref())?;
            match tokio::time::timeout(std::time::Duration::from_secs(2), request.send()).await {
                Ok(Ok(response)) => {
                    tracing::debug!(status = %response.status(), "Terminated HTTP session")
                }
                Ok(Err(e)) => tracing::debug!(error = %e, "Session termination request failed"),
                Err(_) => tracing::debug!("Session termination request timed out"),
            }
        }
        Ok(())
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        for task in self.in_flight.drain(..) {
            task.abort();
        }
    }
}

fn fail(sender: &InboundSender, id: u64, error: Error) {
    let _ = sender.send(TransportEvent::Failed { id, error });
}

fn record_session_id(response: &Response, session_id: &Mutex<Option<String>>) {
    if let Some(value) = response
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        let mut session = session_id.lock();
        if session.is_none() {
            tracing::debug!(session_id = %value, "Server assigned session id");
            *session = Some(value.to_string());
        }
    }
}

/// Transport error for a non-2xx response
async fn status_error(response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let hint = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => " (check the auth configuration)",
        _ => "",
    };
    Error::Transport(format!("HTTP {}{}: {}", status, hint, snippet(&body)))
}

async fn handle_response(
    response: Response,
    id: u64,
    session_id: &Mutex<Option<String>>,
    sender: &InboundSender,
) {
    record_session_id(&response, session_id);

    let status = response.status();
    if !status.is_success() {
        fail(sender, id, status_error(response).await);
        return;
    }

    if status == StatusCode::ACCEPTED {
        tracing::warn!(id, "Server accepted a request without replying");
        return;
    }

    let is_stream = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));

    if is_stream {
        read_event_stream(response, id, sender).await;
        return;
    }

    match response.text().await {
        Ok(body) if body.trim().is_empty() => fail(
            sender,
            id,
            Error::InvalidResponse("empty response body".to_string()),
        ),
        Ok(body) => {
            tracing::trace!("<<< {}", body);
            match serde_json::from_str::<Value>(&body) {
                Ok(payload) => forward_payload(sender, payload),
                Err(e) => fail(
                    sender,
                    id,
                    Error::InvalidResponse(format!("invalid JSON body: {}: {}", e, snippet(&body))),
                ),
            }
        }
        Err(e) => fail(sender, id, Error::Transport(format!("failed to read body: {}", e))),
    }
}

/// Forward messages from a streamed POST response
async fn read_event_stream(response: Response, id: u64, sender: &InboundSender) {
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                for event in decoder.feed_bytes(&bytes) {
                    forward_event_data(sender, event.is_message(), &event.data);
                }
            }
            Err(e) => {
                fail(sender, id, Error::Transport(format!("response stream error: {}", e)));
                return;
            }
        }
    }
    if let Some(event) = decoder.finish() {
        forward_event_data(sender, event.is_message(), &event.data);
    }
}

fn forward_event_data(sender: &InboundSender, is_message: bool, data: &str) {
    if !is_message {
        return;
    }
    tracing::trace!("<<< {}", data);
    match serde_json::from_str::<Value>(data) {
        Ok(payload) => forward_payload(sender, payload),
        Err(e) => tracing::warn!(error = %e, "Ignoring malformed event data"),
    }
}

fn snippet(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() > 200 {
        format!("{}...", body.chars().take(200).collect::<String>())
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(HttpTransport::new("not a url", None), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let mut transport = HttpTransport::new("http://127.0.0.1:9/mcp", None).unwrap();
        let err = transport.send(serde_json::json!({})).await.unwrap_err();
        assert!(err.is_connection_loss());
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_request() {
        let mut transport = HttpTransport::new("http://127.0.0.1:9/mcp", None).unwrap();
        let mut inbound = transport.connect().await.unwrap();
        transport
            .send(serde_json::json!({"jsonrpc": "2.0", "id": 5, "method": "ping"}))
            .await
            .unwrap();
        match inbound.recv().await {
            Some(TransportEvent::Failed { id, error }) => {
                assert_eq!(id, 5);
                assert!(error.is_retryable());
            }
            other => panic!("Expected failure, got {:?}", other),
        }
        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_notification_failure_is_returned_to_caller() {
        let mut transport = HttpTransport::new("http://127.0.0.1:9/mcp", None).unwrap();
        let mut inbound = transport.connect().await.unwrap();
        let err = transport
            .send(serde_json::json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));

        transport.disconnect().await.unwrap();
        assert!(inbound.recv().await.is_none());
    }

    #[test]
    fn test_snippet_truncates() {
        let long = "x".repeat(500);
        assert_eq!(snippet(&long).len(), 203);
    }
}
