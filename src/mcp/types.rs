//! MCP message types
//!
//! JSON-RPC 2.0 envelopes plus the subset of the Model Context Protocol
//! needed for the handshake, tool discovery and tool invocation.
//! See: https://modelcontextprotocol.io

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::common::Error;

/// Protocol revision sent in the initialize request
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const JSONRPC_VERSION: &str = "2.0";

// === Base Protocol Messages ===

/// Outgoing request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// Outgoing notification (no id, no response)
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Error::Protocol {
            code: e.code,
            message: e.message,
            data: e.data,
        }
    }
}

/// Any inbound envelope: a response, a notification or a server request
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct JsonRpcMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcMessage {
    /// Numeric id of a response, if this message is one
    ///
    /// Ids we send are integers, but some servers echo them back as strings.
    pub fn response_id(&self) -> Option<u64> {
        if self.method.is_some() {
            return None;
        }
        match self.id.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Whether this is a response (carries `result` or `error`)
    pub fn is_response(&self) -> bool {
        self.method.is_none() && (self.result.is_some() || self.error.is_some())
    }

    /// Convert a response into the call outcome
    pub fn into_result(self) -> Result<Value, Error> {
        match (self.error, self.result) {
            (Some(error), _) => Err(error.into()),
            (None, Some(result)) => Ok(result),
            (None, None) => Err(Error::InvalidResponse(
                "response carries neither result nor error".to_string(),
            )),
        }
    }
}

// === Handshake ===

/// Server name and version from the initialize result
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ServerIdentity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl std::fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

/// Result of the initialize request
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub server_info: ServerIdentity,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Build initialize request params
pub fn initialize_params(client_name: &str, client_version: &str) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": client_name,
            "version": client_version,
        }
    })
}

// === Tools ===

/// A tool advertised by `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// One parameter derived from a tool's input schema
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ParameterInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ToolInfo {
    /// Flatten the top-level schema properties into a parameter list
    ///
    /// Required parameters come first, each group in schema order.
    pub fn parameters(&self) -> Vec<ParameterInfo> {
        let required: Vec<&str> = self
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let Some(props) = self.input_schema.get("properties").and_then(Value::as_object) else {
            return Vec::new();
        };

        let mut params: Vec<ParameterInfo> = props
            .iter()
            .map(|(name, schema)| ParameterInfo {
                name: name.clone(),
                kind: schema_type(schema),
                required: required.contains(&name.as_str()),
                description: schema
                    .get("description")
                    .and_then(Value::as_str)
                    .map(String::from),
            })
            .collect();
        params.sort_by_key(|p| !p.required);
        params
    }
}

fn schema_type(schema: &Value) -> String {
    match schema.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("|"),
        _ if schema.get("enum").is_some() => "enum".to_string(),
        _ => "any".to_string(),
    }
}

/// Result page of `tools/list`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Content block inside a tool result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        #[serde(default)]
        data: String,
        #[serde(rename = "mimeType", default)]
        mime_type: String,
    },
    Resource {
        #[serde(default)]
        resource: Value,
    },
    #[serde(other)]
    Unknown,
}

/// Result of `tools/call`
///
/// `is_error` is the application-level failure flag; it is independent of
/// whether the JSON-RPC call itself succeeded.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Lenient conversion from a raw result object
    ///
    /// Unrecognized content blocks are kept as `Unknown`; a result that is not
    /// an object at all yields an empty, non-error result.
    pub fn from_value(value: &Value) -> Self {
        let is_error = value
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let content = value
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .map(|b| serde_json::from_value(b.clone()).unwrap_or(ContentBlock::Unknown))
                    .collect()
            })
            .unwrap_or_default();
        Self { content, is_error }
    }

    /// Text of the first text block
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = JsonRpcRequest::new(7, "tools/list", None);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json, json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list"}));
    }

    #[test]
    fn test_response_id_accepts_string_ids() {
        let msg: JsonRpcMessage =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": "12", "result": {}})).unwrap();
        assert_eq!(msg.response_id(), Some(12));
    }

    #[test]
    fn test_server_request_is_not_a_response() {
        let msg: JsonRpcMessage =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).unwrap();
        assert_eq!(msg.response_id(), None);
        assert!(!msg.is_response());
    }

    #[test]
    fn test_error_response_into_protocol_error() {
        let msg: JsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 3,
            "error": {"code": -32601, "message": "Method not found"}
        }))
        .unwrap();
        match msg.into_result() {
            Err(Error::Protocol { code, message, .. }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("Expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_result_lenient_parse() {
        let value = json!({
            "content": [
                {"type": "audio", "data": "..."},
                {"type": "text", "text": "boom"}
            ],
            "isError": true
        });
        let result = ToolResult::from_value(&value);
        assert!(result.is_error);
        assert_eq!(result.content[0], ContentBlock::Unknown);
        assert_eq!(result.first_text(), Some("boom"));
    }

    #[test]
    fn test_tool_parameters() {
        let tool: ToolInfo = serde_json::from_value(json!({
            "name": "search",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "limit": {"type": "integer"},
                    "query": {"type": "string", "description": "Search text"}
                },
                "required": ["query"]
            }
        }))
        .unwrap();
        let params = tool.parameters();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "query");
        assert!(params[0].required);
        assert_eq!(params[0].description.as_deref(), Some("Search text"));
        assert_eq!(params[1].kind, "integer");
        assert!(!params[1].required);
    }
}
