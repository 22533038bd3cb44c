//! Collection configuration types
//!
//! Defines the data structures for deserializing YAML test collections.
//! Structural problems (unknown fields, missing required fields, wrong
//! types) are rejected here; cross-references are checked by `validate`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::common::{Error, Result};

/// A complete test collection loaded from a YAML file
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Collection {
    /// Collection format version
    #[serde(default)]
    pub version: Option<u32>,
    /// Name of the collection
    pub name: String,
    /// Optional description of what the collection verifies
    #[serde(default)]
    pub description: Option<String>,
    /// Values for `{{env.NAME}}` placeholders, consulted before the process environment
    #[serde(default, deserialize_with = "scalar_map")]
    pub env: BTreeMap<String, String>,
    /// How to reach the server under test
    pub server: ServerConfig,
    /// Defaults applied to every step
    #[serde(default)]
    pub defaults: Defaults,
    /// Steps, executed in order
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Server connection settings, tagged by transport
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "transport", rename_all = "lowercase", deny_unknown_fields)]
pub enum ServerConfig {
    /// Spawn a subprocess and talk over its stdio
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        /// Layered over the inherited environment
        #[serde(default, deserialize_with = "scalar_map")]
        env: BTreeMap<String, String>,
    },
    /// Streamable HTTP endpoint
    Http {
        url: String,
        #[serde(default)]
        auth: Option<AuthConfig>,
    },
    /// HTTP+SSE server
    Sse {
        url: String,
        #[serde(default)]
        auth: Option<AuthConfig>,
    },
}

/// HTTP authentication
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum AuthConfig {
    /// `Authorization: Bearer <token>`
    Bearer { token: String },
    /// Custom header carrying an API key
    ApiKey {
        #[serde(default = "default_api_key_header")]
        header: String,
        key: String,
    },
    /// `Authorization: Basic <base64(username:password)>`
    Basic { username: String, password: String },
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

/// Defaults applied to every step
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    /// Per-call timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Extra attempts for tool calls failing at the transport/protocol level
    #[serde(default)]
    pub retries: Option<u32>,
    /// Skip the remaining steps after the first failed or errored step
    #[serde(default)]
    pub fail_fast: bool,
}

/// A single step in the execution flow
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// Invoke a tool and save its result
    ToolCall(ToolCallStep),
    /// Check a value saved by an earlier tool call
    Assert(AssertStep),
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ToolCallStep {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Tool arguments
    #[serde(default = "empty_object")]
    pub input: Value,
    /// JSONPath selecting what to save; the whole result when absent
    #[serde(default)]
    pub save: Option<String>,
    /// Pause after the step completes
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retries: Option<u32>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AssertStep {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Id of the tool call step whose saved value is checked
    pub from: String,
    pub check: Check,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

/// One assertion: operator, optional path, optional expected value
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Check {
    pub op: String,
    #[serde(default)]
    pub path: Option<String>,
    /// `Some(Value::Null)` when the YAML says `value: null`
    #[serde(default, deserialize_with = "present_value")]
    pub value: Option<Value>,
}

/// Step kind, as recorded on outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ToolCall,
    Assert,
    /// Synthetic outcome for a failed connection/handshake
    Handshake,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::ToolCall => write!(f, "tool_call"),
            StepKind::Assert => write!(f, "assert"),
            StepKind::Handshake => write!(f, "handshake"),
        }
    }
}

impl Step {
    pub fn id(&self) -> &str {
        match self {
            Step::ToolCall(s) => &s.id,
            Step::Assert(s) => &s.id,
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            Step::ToolCall(_) => StepKind::ToolCall,
            Step::Assert(_) => StepKind::Assert,
        }
    }

    pub fn delay_ms(&self) -> Option<u64> {
        match self {
            Step::ToolCall(s) => s.delay_ms,
            Step::Assert(s) => s.delay_ms,
        }
    }
}

impl ServerConfig {
    /// Command line or URL, for display
    pub fn target(&self) -> String {
        match self {
            ServerConfig::Stdio { command, args, .. } => std::iter::once(command.as_str())
                .chain(args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" "),
            ServerConfig::Http { url, .. } | ServerConfig::Sse { url, .. } => url.clone(),
        }
    }
}

impl Collection {
    /// Parse a collection from YAML text
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse collection: {}", e)))
    }

    /// Load a collection from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Look up a step by id
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id() == id)
    }
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn present_value<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Accept scalar values (strings, numbers, booleans) and store them as strings
fn scalar_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, String>, D::Error> {
    let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                _ => {
                    return Err(serde::de::Error::custom(format!(
                        "environment value '{}' must be a string, number or boolean",
                        key
                    )))
                }
            };
            Ok((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"
version: 1
name: Echo smoke test
env:
  API_TOKEN: secret
  PORT: 8080
server:
  transport: http
  url: "http://localhost:{{env.PORT}}/mcp"
  auth:
    type: bearer
    token: "{{env.API_TOKEN}}"
defaults:
  timeout_ms: 5000
  retries: 2
steps:
  - id: call_echo
    type: tool_call
    tool: echo
    input:
      x: 1
    save: "$"
    delay_ms: 10
  - id: check_x
    type: assert
    from: call_echo
    check:
      op: jsonpath_eq
      path: "$.x"
      value: 1
"#;

    #[test]
    fn test_parse_full_collection() {
        let c = Collection::parse(SAMPLE).unwrap();
        assert_eq!(c.name, "Echo smoke test");
        assert_eq!(c.env.get("PORT").map(String::as_str), Some("8080"));
        assert_eq!(c.defaults.timeout_ms, Some(5000));
        assert_eq!(c.defaults.retries, Some(2));
        assert!(matches!(
            &c.server,
            ServerConfig::Http { auth: Some(AuthConfig::Bearer { .. }), .. }
        ));
        assert_eq!(c.steps.len(), 2);

        match &c.steps[0] {
            Step::ToolCall(s) => {
                assert_eq!(s.tool, "echo");
                assert_eq!(s.input, json!({"x": 1}));
                assert_eq!(s.delay_ms, Some(10));
            }
            other => panic!("Expected tool call, got {:?}", other),
        }
        match &c.steps[1] {
            Step::Assert(s) => {
                assert_eq!(s.from, "call_echo");
                assert_eq!(s.check.op, "jsonpath_eq");
                assert_eq!(s.check.value, Some(json!(1)));
            }
            other => panic!("Expected assert, got {:?}", other),
        }
    }

    #[test]
    fn test_stdio_server_and_defaults() {
        let c = Collection::parse(
            r#"
name: stdio
server:
  transport: stdio
  command: python
  args: ["-m", "server"]
  env:
    DEBUG: true
steps:
  - id: a
    type: tool_call
    tool: ping
"#,
        )
        .unwrap();
        match &c.server {
            ServerConfig::Stdio { command, args, env } => {
                assert_eq!(command, "python");
                assert_eq!(args, &vec!["-m".to_string(), "server".to_string()]);
                assert_eq!(env.get("DEBUG").map(String::as_str), Some("true"));
            }
            other => panic!("Expected stdio, got {:?}", other),
        }
        assert_eq!(c.server.target(), "python -m server");
        assert_eq!(c.defaults, Defaults::default());
        match &c.steps[0] {
            Step::ToolCall(s) => assert_eq!(s.input, json!({})),
            other => panic!("Expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_api_key_default_header() {
        let auth: AuthConfig = serde_yaml::from_str("type: api_key\nkey: k").unwrap();
        assert_eq!(
            auth,
            AuthConfig::ApiKey {
                header: "X-API-Key".into(),
                key: "k".into()
            }
        );
    }

    #[test]
    fn test_explicit_null_value_is_present() {
        let check: Check = serde_yaml::from_str("op: jsonpath_eq\npath: $.a\nvalue: null").unwrap();
        assert_eq!(check.value, Some(Value::Null));
        let check: Check = serde_yaml::from_str("op: jsonpath_exists\npath: $.a").unwrap();
        assert_eq!(check.value, None);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = Collection::parse("name: x\nserver: {transport: stdio, command: a}\nbogus: 1")
            .unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));

        let err = Collection::parse(
            "name: x\nserver: {transport: stdio, command: a, url: 'http://x'}",
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_unknown_step_type_rejected() {
        let err = Collection::parse(
            "name: x\nserver: {transport: stdio, command: a}\nsteps:\n  - {id: a, type: sleep}",
        )
        .unwrap_err();
        assert!(err.to_string().contains("sleep"));
    }

    #[test]
    fn test_negative_timeout_rejected() {
        assert!(Collection::parse(
            "name: x\nserver: {transport: stdio, command: a}\ndefaults: {timeout_ms: -5}"
        )
        .is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Collection::load(Path::new("/nonexistent/collection.yaml")).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }
}
