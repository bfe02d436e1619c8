//! JSON-RPC over stdio transport.
//!
//! Handles low-level communication with the tool server child process:
//! - Writing JSON-RPC requests to stdin
//! - Reading JSON-RPC responses from stdout
//! - Line-delimited JSON protocol (one JSON object per line)
//!
//! Every method takes `&mut self`, so one transport can never have two
//! requests in flight.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::errors::McpError;
use super::types::{error_codes, JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Frames longer than this are truncated before being kept in an error.
const RAW_FRAME_LIMIT: usize = 2000;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

// ─── Transport ───────────────────────────────────────────────────────────────

/// Bi-directional JSON-RPC transport over a child process's stdio.
pub struct StdioTransport {
    server_name: String,
    writer: Option<BoxedWriter>,
    reader: BoxedReader,
    next_id: u64,
    diagnostics: bool,
}

impl StdioTransport {
    /// Create a new transport from a child process's stdin/stdout (or any
    /// pair of async streams).
    pub fn new<W, R>(server_name: &str, stdin: W, stdout: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            server_name: server_name.to_string(),
            writer: Some(Box::new(stdin)),
            reader: BufReader::new(Box::new(stdout)),
            next_id: 1,
            diagnostics: false,
        }
    }

    /// Include raw frames in protocol-error logs.
    pub fn set_diagnostics(&mut self, enabled: bool) {
        self.diagnostics = enabled;
    }

    /// Send a JSON-RPC request and wait for the matching response.
    ///
    /// Write one line of JSON, then read lines until the response with the
    /// matching `id` arrives. Peer notifications are skipped and peer
    /// requests are answered in between.
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id;
        self.next_id += 1;

        let req = JsonRpcRequest::new(id, method, params);
        let json = serde_json::to_value(&req)
            .map_err(|e| self.protocol_error(format!("failed to serialize request: {e}"), None))?;
        self.write_frame(&json).await?;

        let mut frame_buf: Vec<u8> = Vec::new();
        loop {
            frame_buf.clear();
            let bytes_read = self
                .reader
                .read_until(b'\n', &mut frame_buf)
                .await
                .map_err(|e| self.connection_error(format!("failed to read from stdout: {e}")))?;

            if bytes_read == 0 {
                return Err(self.connection_error(
                    "server stdout closed (process may have exited)".into(),
                ));
            }

            let line = match std::str::from_utf8(&frame_buf) {
                Ok(line) => line,
                Err(e) => {
                    let lossy = String::from_utf8_lossy(&frame_buf);
                    return Err(self.protocol_error(
                        format!("frame is not valid UTF-8: {e}"),
                        Some(lossy.trim()),
                    ));
                }
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let frame: Value = serde_json::from_str(trimmed).map_err(|e| {
                self.protocol_error(format!("frame is not valid JSON: {e}"), Some(trimmed))
            })?;

            match classify(&frame) {
                FrameKind::Response => {
                    let resp: JsonRpcResponse =
                        serde_json::from_value(frame).map_err(|e| {
                            self.protocol_error(
                                format!("malformed JSON-RPC response: {e}"),
                                Some(trimmed),
                            )
                        })?;
                    if resp.id == id {
                        return Ok(resp);
                    }
                    tracing::warn!(
                        server = %self.server_name,
                        expected = id,
                        received = resp.id,
                        "skipping response for a different request id"
                    );
                }
                FrameKind::Notification(method) => {
                    tracing::debug!(
                        server = %self.server_name,
                        method = %method,
                        "skipping server notification"
                    );
                }
                FrameKind::ServerRequest(peer_id, method) => {
                    self.answer_server_request(peer_id, &method).await?;
                }
                FrameKind::Invalid => {
                    return Err(self.protocol_error(
                        "frame is not a JSON-RPC message".into(),
                        Some(trimmed),
                    ));
                }
            }
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let mut notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        if let Some(params) = params {
            notification["params"] = params;
        }
        self.write_frame(&notification).await
    }

    /// Close the write half so the server sees EOF on stdin. Idempotent.
    pub async fn close_writer(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }

    /// Reply to a request initiated by the server.
    async fn answer_server_request(
        &mut self,
        peer_id: Value,
        method: &str,
    ) -> Result<(), McpError> {
        let reply = if method == "ping" {
            serde_json::json!({"jsonrpc": "2.0", "id": peer_id, "result": {}})
        } else {
            tracing::debug!(
                server = %self.server_name,
                method = %method,
                "rejecting unsupported server request"
            );
            let error = JsonRpcError {
                code: error_codes::METHOD_NOT_FOUND,
                message: format!("method not supported by client: {method}"),
                data: None,
            };
            serde_json::json!({"jsonrpc": "2.0", "id": peer_id, "error": error})
        };
        self.write_frame(&reply).await
    }

    async fn write_frame(&mut self, frame: &Value) -> Result<(), McpError> {
        let mut json = frame.to_string();
        json.push('\n');

        let server = self.server_name.clone();
        let writer = self.writer.as_mut().ok_or_else(|| McpError::Connection {
            server: server.clone(),
            reason: "stdin already closed".into(),
        })?;

        writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| McpError::Connection {
                server: server.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        writer.flush().await.map_err(|e| McpError::Connection {
            server,
            reason: format!("failed to flush stdin: {e}"),
        })
    }

    fn connection_error(&self, reason: String) -> McpError {
        McpError::Connection {
            server: self.server_name.clone(),
            reason,
        }
    }

    fn protocol_error(&self, reason: String, raw: Option<&str>) -> McpError {
        let raw = raw.map(|r| truncate_frame(r));
        if self.diagnostics {
            tracing::warn!(
                server = %self.server_name,
                reason = %reason,
                raw = raw.as_deref().unwrap_or(""),
                "protocol error"
            );
        }
        McpError::Protocol {
            server: self.server_name.clone(),
            reason,
            raw,
        }
    }
}

// ─── Frame classification ────────────────────────────────────────────────────

enum FrameKind {
    Response,
    Notification(String),
    ServerRequest(Value, String),
    Invalid,
}

fn classify(frame: &Value) -> FrameKind {
    let Some(obj) = frame.as_object() else {
        return FrameKind::Invalid;
    };

    let method = obj.get("method").and_then(Value::as_str);
    let id = obj.get("id").filter(|id| !id.is_null());

    match (method, id) {
        (Some(method), Some(id)) => FrameKind::ServerRequest(id.clone(), method.to_string()),
        (Some(method), None) => FrameKind::Notification(method.to_string()),
        (None, Some(_)) if obj.contains_key("result") || obj.contains_key("error") => {
            FrameKind::Response
        }
        _ => FrameKind::Invalid,
    }
}

fn truncate_frame(raw: &str) -> String {
    if raw.len() <= RAW_FRAME_LIMIT {
        return raw.to_string();
    }
    let mut end = RAW_FRAME_LIMIT;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &raw[..end])
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(server: &str, response: JsonRpcResponse) -> Result<Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::Remote {
            code: Some(err.code),
            message: err.message,
        });
    }

    response.result.ok_or_else(|| McpError::Protocol {
        server: server.to_string(),
        reason: "response missing both result and error".into(),
        raw: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
