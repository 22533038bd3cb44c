//! Mock MCP server binary for integration testing
//!
//! Speaks newline-delimited JSON-RPC on stdin/stdout and exposes a handful
//! of tools whose behavior is useful for exercising the harness without a
//! real server.

use serde_json::{json, Map, Value};
use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

/// Tools per `tools/list` page, so clients have to follow the cursor
const PAGE_SIZE: usize = 4;

fn main() {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();

    let mut state = MockState::default();

    for line in reader.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                send_message(
                    &mut writer,
                    &error_response(Value::Null, -32700, &format!("Parse error: {}", e)),
                );
                continue;
            }
        };

        if let Some(response) = state.process_message(&message) {
            send_message(&mut writer, &response);
        }
    }
}

fn send_message<W: Write>(writer: &mut W, message: &Value) {
    let line = message.to_string();
    let _ = writeln!(writer, "{}", line);
    let _ = writer.flush();
}

fn success_response(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

#[derive(Default)]
struct MockState {
    initialized: bool,
    calls: u64,
}

impl MockState {
    fn process_message(&mut self, message: &Value) -> Option<Value> {
        let method = message.get("method").and_then(Value::as_str)?;
        let Some(id) = message.get("id").cloned() else {
            // Notification
            if method == "notifications/initialized" {
                self.initialized = true;
            }
            return None;
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let response = match method {
            "initialize" => success_response(
                id,
                json!({
                    "protocolVersion": params
                        .get("protocolVersion")
                        .cloned()
                        .unwrap_or(json!("2024-11-05")),
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {
                        "name": "mock-mcp-server",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            ),
            "ping" => success_response(id, json!({})),
            "tools/list" => success_response(id, list_tools(&params)),
            "tools/call" => self.call_tool(id, &params),
            _ => error_response(id, -32601, &format!("Method not found: {}", method)),
        };
        Some(response)
    }

    fn call_tool(&mut self, id: Value, params: &Value) -> Value {
        let name = params.get("name").and_then(Value::as_str).unwrap_or("");
        let args = params
            .get("arguments")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        match name {
            "echo" => {
                // Arguments also appear at the top level so `$.x` resolves
                let mut result = Map::new();
                result.insert(
                    "content".into(),
                    json!([{"type": "text", "text": Value::Object(args.clone()).to_string()}]),
                );
                result.insert("structuredContent".into(), Value::Object(args.clone()));
                result.insert("isError".into(), json!(false));
                for (key, value) in args {
                    result.entry(key).or_insert(value);
                }
                success_response(id, Value::Object(result))
            }
            "fail" => {
                let message = args
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("requested failure");
                success_response(
                    id,
                    json!({"content": [{"type": "text", "text": message}], "isError": true}),
                )
            }
            "slow" => {
                let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(1000);
                std::thread::sleep(Duration::from_millis(ms));
                success_response(
                    id,
                    json!({"content": [{"type": "text", "text": format!("slept {}ms", ms)}], "isError": false}),
                )
            }
            "crash" => {
                let code = args.get("code").and_then(Value::as_i64).unwrap_or(1) as i32;
                eprintln!("mock-mcp-server: crashing on request");
                std::process::exit(code);
            }
            "count" => {
                self.calls += 1;
                success_response(
                    id,
                    json!({
                        "content": [{"type": "text", "text": self.calls.to_string()}],
                        "count": self.calls,
                        "isError": false
                    }),
                )
            }
            "env" => {
                let var = args.get("name").and_then(Value::as_str).unwrap_or("");
                let value = std::env::var(var).ok();
                success_response(
                    id,
                    json!({
                        "content": [{"type": "text", "text": value.clone().unwrap_or_default()}],
                        "value": value,
                        "isError": false
                    }),
                )
            }
            other => error_response(id, -32602, &format!("Unknown tool: {}", other)),
        }
    }
}

fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "echo",
            "description": "Return the arguments unchanged",
            "inputSchema": {"type": "object", "additionalProperties": true}
        }),
        json!({
            "name": "fail",
            "description": "Return an application error",
            "inputSchema": {
                "type": "object",
                "properties": {"message": {"type": "string", "description": "Error text"}}
            }
        }),
        json!({
            "name": "slow",
            "description": "Sleep before answering",
            "inputSchema": {
                "type": "object",
                "properties": {"ms": {"type": "integer", "description": "Milliseconds to sleep"}},
                "required": ["ms"]
            }
        }),
        json!({
            "name": "crash",
            "description": "Exit without answering",
            "inputSchema": {
                "type": "object",
                "properties": {"code": {"type": "integer"}}
            }
        }),
        json!({
            "name": "count",
            "description": "Count calls to this tool",
            "inputSchema": {"type": "object", "properties": {}}
        }),
        json!({
            "name": "env",
            "description": "Read an environment variable of the server process",
            "inputSchema": {
                "type": "object",
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }
        }),
    ]
}

fn list_tools(params: &Value) -> Value {
    let tools = tool_definitions();
    let start = params
        .get("cursor")
        .and_then(Value::as_str)
        .and_then(|c| c.parse::<usize>().ok())
        .unwrap_or(0)
        .min(tools.len());
    let end = (start + PAGE_SIZE).min(tools.len());

    let mut result = json!({"tools": tools[start..end]});
    if end < tools.len() {
        result["nextCursor"] = json!(end.to_string());
    }
    result
}
