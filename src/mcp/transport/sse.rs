//! HTTP+SSE transport
//!
//! One long-lived GET carries every server message. The first `endpoint`
//! event names the URL that client messages are POSTed to; replies come back
//! as `message` events on the stream, not in the POST response.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

use crate::common::{Error, Result};
use crate::mcp::codec::{SseDecoder, SseEvent};
use crate::testing::AuthConfig;

use super::auth::apply_auth;
use super::{
    forward_payload, inbound_channel, request_id, Inbound, InboundSender, Transport,
    TransportEvent, TransportKind,
};

/// Upper bound on delivering one notification
const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport over a server-sent event stream plus a POST endpoint
pub struct SseTransport {
    stream_url: Url,
    auth: Option<AuthConfig>,
    client: Client,
    endpoint_timeout: Duration,
    endpoint: Option<Url>,
    sender: Option<InboundSender>,
    stream_task: Option<JoinHandle<()>>,
    in_flight: Vec<JoinHandle<()>>,
}

/// Resolve the event stream URL
///
/// A URL whose path already ends in `/sse` is used as is; otherwise it is
/// treated as the server base and `/sse` is appended.
pub fn stream_url(url: &str) -> Result<Url> {
    let mut url = Url::parse(url).map_err(|e| Error::Config(format!("Invalid URL '{}': {}", url, e)))?;
    if !url.path().trim_end_matches('/').ends_with("/sse") {
        let path = format!("{}/sse", url.path().trim_end_matches('/'));
        url.set_path(&path);
    }
    Ok(url)
}

impl SseTransport {
    pub fn new(url: &str, auth: Option<AuthConfig>, endpoint_timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            stream_url: stream_url(url)?,
            auth,
            client,
            endpoint_timeout: Duration::from_millis(endpoint_timeout_ms),
            endpoint: None,
            sender: None,
            stream_task: None,
            in_flight: Vec::new(),
        })
    }

    /// POST target announced by the server
    pub fn endpoint(&self) -> Option<&Url> {
        self.endpoint.as_ref()
    }

    fn abort_tasks(&mut self) {
        if let Some(task) = self.stream_task.take() {
            task.abort();
        }
        for task in self.in_flight.drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    fn target(&self) -> String {
        self.stream_url.to_string()
    }

    async fn connect(&mut self) -> Result<Inbound> {
        if self.stream_task.is_some() {
            return Err(Error::Internal("SSE transport already connected".to_string()));
        }

        let request = self
            .client
            .get(self.stream_url.clone())
            .header(ACCEPT, "text/event-stream");
        let response = apply_auth(request, self.auth.as_ref())?
            .send()
            .await
            .map_err(|e| Error::Connection(format!("Failed to open SSE stream {}: {}", self.stream_url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Connection(format!(
                "SSE stream {} returned HTTP {}",
                self.stream_url, status
            )));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.starts_with("text/event-stream") {
            return Err(Error::Connection(format!(
                "SSE stream {} has content type '{}', expected text/event-stream",
                self.stream_url, content_type
            )));
        }

        tracing::info!(url = %self.stream_url, "SSE stream connected");

        let (sender, inbound) = inbound_channel();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        self.stream_task = Some(tokio::spawn(read_stream(response, sender.clone(), endpoint_tx)));

        let endpoint = match tokio::time::timeout(self.endpoint_timeout, endpoint_rx).await {
            Ok(Ok(path)) => self.stream_url.join(&path).map_err(|e| {
                Error::Connection(format!("Server announced invalid endpoint '{}': {}", path, e))
            }),
            Ok(Err(_)) => Err(Error::Connection(
                "SSE stream closed before announcing an endpoint".to_string(),
            )),
            Err(_) => Err(Error::Connection(format!(
                "No endpoint event within {}ms",
                self.endpoint_timeout.as_millis()
            ))),
        };

        match endpoint {
            Ok(endpoint) => {
                tracing::debug!(endpoint = %endpoint, "SSE endpoint announced");
                self.endpoint = Some(endpoint);
                self.sender = Some(sender);
                Ok(inbound)
            }
            Err(e) => {
                self.abort_tasks();
                Err(e)
            }
        }
    }

    async fn send(&mut self, message: Value) -> Result<()> {
        let (Some(endpoint), Some(sender)) = (self.endpoint.clone(), self.sender.clone()) else {
            return Err(Error::Connection("SSE transport is not connected".to_string()));
        };

        let request = self
            .client
            .post(endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(&message);
        let request = apply_auth(request, self.auth.as_ref())?;
        tracing::trace!(">>> POST {} {}", endpoint, message);

        // Notifications are delivered in order before returning
        let Some(id) = request_id(&message) else {
            let response = request
                .timeout(NOTIFICATION_TIMEOUT)
                .send()
                .await
                .map_err(|e| Error::Transport(format!("POST {} failed: {}", endpoint, e)))?;
            if !response.status().is_success() {
                return Err(status_error(response).await);
            }
            return Ok(());
        };

        self.in_flight.retain(|task| !task.is_finished());
        self.in_flight.push(tokio::spawn(async move {
            match request.send().await {
                Ok(response) => handle_post_response(response, id, &sender).await,
                Err(e) => fail(&sender, id, Error::Transport(format!("POST {} failed: {}", endpoint, e))),
            }
        }));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.abort_tasks();
        self.sender = None;
        self.endpoint = None;
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

fn fail(sender: &InboundSender, id: u64, error: Error) {
    let _ = sender.send(TransportEvent::Failed { id, error });
}

async fn status_error(response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Error::Transport(format!("HTTP {}: {}", status, body.trim()))
}

/// Replies belong on the stream, but some servers answer inline too
async fn handle_post_response(response: Response, id: u64, sender: &InboundSender) {
    if !response.status().is_success() {
        fail(sender, id, status_error(response).await);
        return;
    }

    if let Ok(body) = response.text().await {
        if let Ok(payload) = serde_json::from_str::<Value>(&body) {
            if payload.get("result").is_some() || payload.get("error").is_some() {
                forward_payload(sender, payload);
            }
        }
    }
}

/// Pump the event stream until it ends
async fn read_stream(
    response: Response,
    sender: InboundSender,
    endpoint_tx: oneshot::Sender<String>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    let reason = loop {
        match stream.next().await {
            Some(Ok(bytes)) => {
                for event in decoder.feed_bytes(&bytes) {
                    if !dispatch_event(event, &sender, &mut endpoint_tx) {
                        return;
                    }
                }
            }
            Some(Err(e)) => break format!("SSE stream error: {}", e),
            None => {
                if let Some(event) = decoder.finish() {
                    dispatch_event(event, &sender, &mut endpoint_tx);
                }
                break "SSE stream ended".to_string();
            }
        }
    };

    tracing::debug!(reason = %reason, "SSE transport closed");
    let _ = sender.send(TransportEvent::Closed { reason });
}

/// Returns false once the receiving side is gone
fn dispatch_event(
    event: SseEvent,
    sender: &InboundSender,
    endpoint_tx: &mut Option<oneshot::Sender<String>>,
) -> bool {
    match event.event.as_deref() {
        Some("endpoint") => {
            match endpoint_tx.take() {
                Some(tx) => {
                    let _ = tx.send(event.data.trim().to_string());
                }
                None => tracing::debug!(data = %event.data, "Ignoring repeated endpoint event"),
            }
            true
        }
        _ if event.is_message() => {
            tracing::trace!("<<< {}", event.data);
            match serde_json::from_str::<Value>(&event.data) {
                Ok(payload) => {
                    forward_payload(sender, payload);
                    !sender.is_closed()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed SSE message");
                    true
                }
            }
        }
        Some(other) => {
            tracing::debug!(event = other, "Ignoring SSE event");
            true
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_url_appends_sse() {
        assert_eq!(stream_url("http://host:8080").unwrap().as_str(), "http://host:8080/sse");
        assert_eq!(
            stream_url("http://host:8080/api/").unwrap().as_str(),
            "http://host:8080/api/sse"
        );
    }

    #[test]
    fn test_stream_url_keeps_explicit_sse_path() {
        assert_eq!(
            stream_url("https://host/mcp/sse").unwrap().as_str(),
            "https://host/mcp/sse"
        );
    }

    #[test]
    fn test_endpoint_resolution() {
        let base = stream_url("http://host:8080").unwrap();
        assert_eq!(
            base.join("/messages?sessionId=1").unwrap().as_str(),
            "http://host:8080/messages?sessionId=1"
        );
        assert_eq!(
            base.join("http://other:9000/post").unwrap().as_str(),
            "http://other:9000/post"
        );
    }

    #[tokio::test]
    async fn test_dispatch_endpoint_only_once() {
        let (sender, _inbound) = super::super::inbound_channel();
        let (tx, rx) = oneshot::channel();
        let mut slot = Some(tx);
        let event = |data: &str| SseEvent {
            event: Some("endpoint".to_string()),
            data: data.to_string(),
        };
        assert!(dispatch_event(event("/a"), &sender, &mut slot));
        assert!(dispatch_event(event("/b"), &sender, &mut slot));
        assert_eq!(rx.await.unwrap(), "/a");
    }

    #[tokio::test]
    async fn test_refused_stream_is_connection_error() {
        let mut transport = SseTransport::new("http://127.0.0.1:9", None, 100).unwrap();
        let err = transport.connect().await.unwrap_err();
        assert!(err.is_connection_loss());
        transport.disconnect().await.unwrap();
    }
}
