//! Subprocess transport
//!
//! Spawns the server and speaks newline-delimited JSON over its stdin and
//! stdout. Stderr is captured for diagnostics only and never parsed.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;

use crate::common::{Error, Result};
use crate::mcp::codec;
use crate::mcp::types::JsonRpcMessage;

use super::{inbound_channel, Inbound, InboundSender, Transport, TransportEvent, TransportKind};

/// Bytes of stderr kept for error messages
const STDERR_TAIL_BYTES: usize = 64 * 1024;

/// How long the reader waits for stderr to drain after stdout closes
const STDERR_DRAIN: Duration = Duration::from_millis(250);

/// Transport over a child process's stdio
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    grace: Duration,
    child: Option<Child>,
    writer: Option<BufWriter<ChildStdin>>,
    reader_task: Option<JoinHandle<()>>,
    stderr: Arc<Mutex<String>>,
}

impl StdioTransport {
    /// Create a transport; the process is spawned on `connect`
    ///
    /// `env` is layered over the inherited environment.
    pub fn new(
        command: &str,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        teardown_grace_ms: u64,
    ) -> Self {
        Self {
            command: command.to_string(),
            args,
            env,
            grace: Duration::from_millis(teardown_grace_ms),
            child: None,
            writer: None,
            reader_task: None,
            stderr: Arc::new(Mutex::new(String::new())),
        }
    }

    /// Captured stderr output (most recent bytes only)
    pub fn stderr_tail(&self) -> String {
        self.stderr.lock().clone()
    }

    fn spawn_error(&self, e: std::io::Error) -> Error {
        let hint = if e.kind() == std::io::ErrorKind::NotFound && which::which(&self.command).is_err() {
            " (command not found in PATH)"
        } else {
            ""
        };
        Error::Connection(format!("Failed to start '{}': {}{}", self.command, e, hint))
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn target(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn connect(&mut self) -> Result<Inbound> {
        if self.child.is_some() {
            return Err(Error::Internal("stdio transport already connected".to_string()));
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Connection("Failed to get server stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Connection("Failed to get server stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Connection("Failed to get server stderr".to_string()))?;

        tracing::info!(command = %self.target(), pid = ?child.id(), "Spawned MCP server");

        let (sender, inbound) = inbound_channel();
        let stderr_task = tokio::spawn(capture_stderr(stderr, self.stderr.clone()));
        self.reader_task = Some(tokio::spawn(read_stdout(
            stdout,
            sender,
            stderr_task,
            self.stderr.clone(),
        )));
        self.writer = Some(BufWriter::new(stdin));
        self.child = Some(child);

        Ok(inbound)
    }

    async fn send(&mut self, message: Value) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Connection("stdio transport is not connected".to_string()))?;

        let json = serde_json::to_string(&message)?;
        tracing::trace!(">>> {}", json);

        codec::write_line_message(writer, &json)
            .await
            .map_err(|e| match e {
                Error::Io(io) => Error::Connection(format!("Failed to write to server stdin: {}", io)),
                other => other,
            })
    }

    async fn disconnect(&mut self) -> Result<()> {
        // Closing stdin is the polite shutdown request
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(self.grace, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!(?status, "MCP server exited"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Failed to wait for MCP server"),
                Err(_) => {
                    tracing::warn!(
                        grace_ms = self.grace.as_millis() as u64,
                        "MCP server did not exit after stdin closed, killing it"
                    );
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "Failed to kill MCP server");
                    }
                }
            }
        }

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }

        Ok(())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Some(child) = &mut self.child {
            let _ = child.start_kill();
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

/// Forward stdout lines as inbound messages until the stream ends
async fn read_stdout(
    stdout: ChildStdout,
    sender: InboundSender,
    stderr_task: JoinHandle<()>,
    stderr: Arc<Mutex<String>>,
) {
    let mut reader = BufReader::new(stdout);

    let reason = loop {
        let line = match codec::read_line_message(&mut reader).await {
            Ok(line) => line,
            Err(Error::Connection(_)) => break "server process closed stdout".to_string(),
            Err(e) => break format!("failed to read server stdout: {}", e),
        };
        tracing::trace!("<<< {}", line);

        match serde_json::from_str::<JsonRpcMessage>(&line) {
            Ok(message) => {
                if sender.send(TransportEvent::Message(message)).is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!(error = %e, line = %line, "Ignoring non JSON-RPC output"),
        }
    };

    let _ = tokio::time::timeout(STDERR_DRAIN, stderr_task).await;

    let tail = stderr.lock().trim().to_string();
    let reason = if tail.is_empty() {
        reason
    } else {
        format!("{}; stderr: {}", reason, tail)
    };
    tracing::debug!(reason = %reason, "stdio transport closed");
    let _ = sender.send(TransportEvent::Closed { reason });
}

/// Keep the most recent stderr output
async fn capture_stderr(stderr: ChildStderr, buffer: Arc<Mutex<String>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "orchestra::server_stderr", "{}", line);
        let mut buffer = buffer.lock();
        buffer.push_str(&line);
        buffer.push('\n');
        if buffer.len() > STDERR_TAIL_BYTES {
            let mut cut = buffer.len() - STDERR_TAIL_BYTES;
            while !buffer.is_char_boundary(cut) {
                cut += 1;
            }
            buffer.drain(..cut);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> StdioTransport {
        StdioTransport::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
            BTreeMap::new(),
            500,
        )
    }

    #[tokio::test]
    async fn test_spawn_failure_is_connection_error() {
        let mut transport =
            StdioTransport::new("definitely-not-a-real-binary-xyz", vec![], BTreeMap::new(), 100);
        let err = transport.connect().await.unwrap_err();
        assert!(err.is_connection_loss());
        assert!(err.to_string().contains("definitely-not-a-real-binary-xyz"));
        // Disconnect after failed connect is a no-op
        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_lines_become_messages() {
        let mut transport = shell(
            r#"read line; echo 'not json'; echo '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'"#,
        );
        let mut inbound = transport.connect().await.unwrap();
        transport
            .send(serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
            .await
            .unwrap();

        match inbound.recv().await {
            Some(TransportEvent::Message(m)) => assert_eq!(m.response_id(), Some(1)),
            other => panic!("Expected message, got {:?}", other),
        }
        match inbound.recv().await {
            Some(TransportEvent::Closed { .. }) => {}
            other => panic!("Expected close, got {:?}", other),
        }
        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_reports_stderr() {
        let mut transport = shell("echo 'fatal: bad config' >&2; exit 3");
        let mut inbound = transport.connect().await.unwrap();
        match inbound.recv().await {
            Some(TransportEvent::Closed { reason }) => {
                assert!(reason.contains("fatal: bad config"), "reason: {}", reason)
            }
            other => panic!("Expected close, got {:?}", other),
        }
        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_env_is_layered_over_inherited() {
        let mut env = BTreeMap::new();
        env.insert("ORCHESTRA_TEST_VALUE".to_string(), "layered".to_string());
        let mut transport = StdioTransport::new(
            "sh",
            vec![
                "-c".to_string(),
                r#"printf '{"jsonrpc":"2.0","id":1,"result":{"v":"%s","path":"%s"}}\n' "$ORCHESTRA_TEST_VALUE" "${PATH:+set}""#
                    .to_string(),
            ],
            env,
            500,
        );
        let mut inbound = transport.connect().await.unwrap();
        match inbound.recv().await {
            Some(TransportEvent::Message(m)) => {
                let result = m.result.unwrap();
                assert_eq!(result["v"], "layered");
                assert_eq!(result["path"], "set");
            }
            other => panic!("Expected message, got {:?}", other),
        }
        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_kills_unresponsive_child() {
        let mut transport = StdioTransport::new(
            "sh",
            vec!["-c".to_string(), "trap '' TERM; exec sleep 30".to_string()],
            BTreeMap::new(),
            100,
        );
        let mut inbound = transport.connect().await.unwrap();
        let started = std::time::Instant::now();
        transport.disconnect().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        // The reader is gone after the kill path, so the channel drains
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(event) = inbound.recv().await {
                if matches!(event, TransportEvent::Message(_)) {
                    panic!("Unexpected message after disconnect");
                }
            }
        })
        .await;
        assert!(drained.is_ok());
        assert!(transport.reader_task.is_none());
        transport.disconnect().await.unwrap();
    }
}
