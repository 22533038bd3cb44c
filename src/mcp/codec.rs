//! MCP wire codecs
//!
//! The stdio transport frames one JSON document per line:
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"initialize",...}\n
//! ```
//!
//! The SSE transport (and streamed HTTP responses) carry envelopes inside
//! `text/event-stream` events:
//! ```text
//! event: message\n
//! data: {"jsonrpc":"2.0","id":1,"result":{...}}\n
//! \n
//! ```

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::{Error, Result};

/// Largest line accepted from a server
const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/// Read one newline-delimited message from the stream
///
/// Blank lines are skipped. EOF means the peer went away.
pub async fn read_line_message<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String> {
    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Err(Error::Connection("server closed its output stream".to_string()));
        }

        if line.len() > MAX_LINE_BYTES {
            return Err(Error::InvalidResponse(format!(
                "message too large: {} bytes",
                line.len()
            )));
        }

        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }
}

/// Write one newline-delimited message to the stream
pub async fn write_line_message<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<()> {
    if json.contains('\n') {
        return Err(Error::Internal(
            "line-delimited message must not contain newlines".to_string(),
        ));
    }

    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    Ok(())
}

/// A decoded server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type; `None` when the server omitted the `event:` field
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// Whether the event carries a JSON-RPC message
    pub fn is_message(&self) -> bool {
        matches!(self.event.as_deref(), None | Some("message"))
    }
}

/// Incremental `text/event-stream` decoder
///
/// Chunks may split events (and lines) at arbitrary byte boundaries.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    partial: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completes
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        if self.buffer.contains("\r\n") {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_event_block(&block) {
                events.push(event);
            }
        }
        events
    }

    /// Feed raw bytes, holding back a trailing incomplete UTF-8 sequence
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.partial.extend_from_slice(bytes);
        let valid = match std::str::from_utf8(&self.partial) {
            Ok(text) => text.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.partial.len(),
        };
        let text = String::from_utf8_lossy(&self.partial[..valid]).into_owned();
        self.partial.drain(..valid);
        self.feed(&text)
    }

    /// Flush a trailing event that was not terminated by a blank line
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        parse_event_block(&rest)
    }
}

fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() {
        return None;
    }

    Some(SseEvent {
        event,
        data: data.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_line_message() {
        let data = b"{\"test\":true}\n";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        let result = read_line_message(&mut reader).await.unwrap();
        assert_eq!(result, "{\"test\":true}");
    }

    #[tokio::test]
    async fn test_read_skips_blank_lines() {
        let data = b"\n\r\n{\"a\":1}\r\n{\"b\":2}\n";
        let mut reader = BufReader::new(Cursor::new(data.to_vec()));

        assert_eq!(read_line_message(&mut reader).await.unwrap(), "{\"a\":1}");
        assert_eq!(read_line_message(&mut reader).await.unwrap(), "{\"b\":2}");
    }

    #[tokio::test]
    async fn test_read_eof_is_connection_error() {
        let mut reader = BufReader::new(Cursor::new(Vec::new()));
        let err = read_line_message(&mut reader).await.unwrap_err();
        assert!(err.is_connection_loss());
    }

    #[tokio::test]
    async fn test_write_line_message() {
        let mut output = Vec::new();
        write_line_message(&mut output, "{\"test\":true}").await.unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "{\"test\":true}\n");
    }

    #[tokio::test]
    async fn test_write_rejects_embedded_newline() {
        let mut output = Vec::new();
        assert!(write_line_message(&mut output, "{\n}").await.is_err());
        assert!(output.is_empty());
    }

    #[test]
    fn test_sse_events_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed("event: endpoint\nda").is_empty());
        let events = decoder.feed("ta: /messages?session=1\n\nevent: message\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: Some("endpoint".to_string()),
                data: "/messages?session=1".to_string()
            }]
        );
        let events = decoder.feed("data: {\"id\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_message());
        assert_eq!(events[0].data, "{\"id\":1}");
    }

    #[test]
    fn test_sse_crlf_multiline_and_comments() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(": keepalive\r\n\r\ndata:line1\r\ndata: line2\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, None);
        assert_eq!(events[0].data, "line1\nline2");
    }

    #[test]
    fn test_sse_bytes_split_inside_utf8_char() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: \"é\"\n\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        assert!(decoder.feed_bytes(&bytes[..split]).is_empty());
        let events = decoder.feed_bytes(&bytes[split..]);
        assert_eq!(events[0].data, "\"é\"");
    }

    #[test]
    fn test_sse_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed("event: message\ndata: {}").is_empty());
        let last = decoder.finish().unwrap();
        assert_eq!(last.data, "{}");
        assert!(decoder.finish().is_none());
    }
}
