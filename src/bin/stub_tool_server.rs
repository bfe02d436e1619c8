//! Minimal MCP tool server for tests and offline development.
//!
//! Speaks line-delimited JSON-RPC 2.0 on stdio and serves a fixed catalog
//! shaped like the Keboola server's. Behavior is tuned through environment:
//!
//! - `STUB_SERVER_MODE=normal` (default): answer everything.
//! - `STUB_SERVER_MODE=exit`: exit before the handshake.
//! - `STUB_SERVER_MODE=garbage`: handshake, then answer with non-JSON lines.
//! - `STUB_PID_FILE=<path>`: write the process id there on startup.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};

use kbc_toolbridge::mcp_client::types::{error_codes, PROTOCOL_VERSION};

/// Operations returned per `tools/list` page.
const PAGE_SIZE: usize = 4;

/// Default `sleep` duration: long enough to outlive any client bound.
const DEFAULT_SLEEP_SECS: f64 = 3600.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Exit,
    Garbage,
}

impl Mode {
    fn from_env() -> Self {
        match std::env::var("STUB_SERVER_MODE").as_deref() {
            Ok("exit") => Mode::Exit,
            Ok("garbage") => Mode::Garbage,
            _ => Mode::Normal,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    kbc_toolbridge::init_tracing();

    let mode = Mode::from_env();
    if let Ok(path) = std::env::var("STUB_PID_FILE") {
        std::fs::write(&path, std::process::id().to_string())
            .with_context(|| format!("failed to write pid file {path}"))?;
    }

    tracing::info!(?mode, pid = std::process::id(), "stub tool server starting");

    if mode == Mode::Exit {
        std::process::exit(3);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unparsable frame");
                continue;
            }
        };

        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let Some(id) = message.get("id").cloned() else {
            tracing::debug!(method = %method, "notification received");
            continue;
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        if mode == Mode::Garbage && method != "initialize" {
            write_line(&mut stdout, "this is not json-rpc").await?;
            continue;
        }

        let response = match method.as_str() {
            "initialize" => success(id, initialize_result()),
            "tools/list" => success(id, list_page(&params)),
            "tools/call" => {
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
                let notice = json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/message",
                    "params": {"level": "info", "data": format!("calling {name}")},
                });
                write_line(&mut stdout, &notice.to_string()).await?;
                call_tool(id, &params).await
            }
            "ping" => success(id, json!({})),
            other => failure(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ),
        };

        write_line(&mut stdout, &response.to_string()).await?;
    }

    tracing::info!("stdin closed; stub tool server exiting");
    Ok(())
}

async fn write_line(stdout: &mut Stdout, line: &str) -> Result<()> {
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {"tools": {"listChanged": false}},
        "serverInfo": {"name": "stub-tool-server", "version": env!("CARGO_PKG_VERSION")},
    })
}

fn catalog() -> Vec<Value> {
    vec![
        json!({
            "name": "echo",
            "description": "Echo the given text back",
            "inputSchema": {
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }
        }),
        json!({
            "name": "list_buckets",
            "description": "List all buckets in the project",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "random_string": {
                        "type": "string",
                        "description": "Dummy parameter for no-parameter tools"
                    }
                },
                "required": ["random_string"]
            }
        }),
        json!({
            "name": "get_table",
            "description": "Get table details",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "table_id": {"type": "string"},
                    "limit": {"type": "integer"}
                },
                "required": ["table_id"]
            }
        }),
        json!({
            "name": "whoami",
            "description": "Describe the current token",
            "inputSchema": {"type": "object"}
        }),
        json!({
            "name": "fail",
            "description": "Always report a failure",
            "inputSchema": {"type": "object", "properties": {}}
        }),
        json!({
            "name": "sleep",
            "description": "Hang for a while",
            "inputSchema": {
                "type": "object",
                "properties": {"seconds": {"type": "number"}}
            }
        }),
        json!({
            "name": "multi_part",
            "description": "Return two text parts",
            "inputSchema": {"type": "object", "properties": {}}
        }),
    ]
}

fn list_page(params: &Value) -> Value {
    let tools = catalog();
    let start = params
        .get("cursor")
        .and_then(Value::as_str)
        .and_then(|c| c.parse::<usize>().ok())
        .unwrap_or(0)
        .min(tools.len());
    let end = (start + PAGE_SIZE).min(tools.len());

    let mut result = json!({"tools": tools[start..end].to_vec()});
    if end < tools.len() {
        result["nextCursor"] = json!(end.to_string());
    }
    result
}

async fn call_tool(id: Value, params: &Value) -> Value {
    let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
    tracing::info!(tool = name, arguments = %args, "tools/call");

    match name {
        "echo" => {
            let text = args
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| args.to_string());
            text_result(id, &text)
        }
        "fail" => success(
            id,
            json!({
                "content": [{"type": "text", "text": "simulated failure"}],
                "isError": true
            }),
        ),
        "sleep" => {
            let secs = args
                .get("seconds")
                .and_then(Value::as_f64)
                .unwrap_or(DEFAULT_SLEEP_SECS)
                .max(0.0);
            tokio::time::sleep(Duration::from_secs_f64(secs)).await;
            text_result(id, "awake")
        }
        "multi_part" => success(
            id,
            json!({
                "content": [
                    {"type": "text", "text": "part one"},
                    {"type": "text", "text": "part two"}
                ]
            }),
        ),
        _ if catalog().iter().any(|tool| tool["name"] == name) => {
            text_result(id, &args.to_string())
        }
        _ => failure(id, error_codes::INVALID_PARAMS, format!("Unknown tool: {name}")),
    }
}

fn text_result(id: Value, text: &str) -> Value {
    success(id, json!({"content": [{"type": "text", "text": text}]}))
}

fn success(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn failure(id: Value, code: i32, message: String) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}
