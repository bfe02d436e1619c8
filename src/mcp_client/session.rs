//! Tool-server session lifecycle.
//!
//! A [`Session`] owns one child process, its stdio transport, and the
//! negotiated protocol state. Sessions are short-lived: the default policy is
//! one session per call, opened and released by [`scoped`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};

use super::config::{ServerConfig, Timeouts};
use super::errors::McpError;
use super::transport::{extract_result, StdioTransport};
use super::types::{
    CallToolResult, InitializeResult, ListToolsResult, OperationDescriptor, ServerInfo,
    ToolOutput, PROTOCOL_VERSION,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Number of stderr lines kept for error context.
const STDERR_TAIL_LINES: usize = 20;

/// Upper bound on `tools/list` pages, in case a server keeps handing out cursors.
const MAX_LIST_PAGES: usize = 100;

// ─── Session ─────────────────────────────────────────────────────────────────

/// A live, initialized connection to the tool server.
pub struct Session {
    name: String,
    process: Child,
    transport: StdioTransport,
    server_info: Option<ServerInfo>,
    stderr_tail: StderrTail,
    shutdown_grace: Duration,
    closed: bool,
}

impl Session {
    /// Spawn the tool server and perform the initialization handshake.
    ///
    /// The configuration is validated first, so a missing credential never
    /// reaches `spawn`. On any handshake failure the child is killed and
    /// reaped before the error is returned.
    pub async fn open(config: &ServerConfig, timeouts: &Timeouts) -> Result<Self, McpError> {
        Self::open_with(config, timeouts, false).await
    }

    /// Like [`Session::open`], optionally logging raw frames on protocol errors.
    pub async fn open_with(
        config: &ServerConfig,
        timeouts: &Timeouts,
        diagnostics: bool,
    ) -> Result<Self, McpError> {
        Self::open_until(config, timeouts, diagnostics, None).await
    }

    /// Open a session whose handshake must also finish before `deadline`.
    ///
    /// The handshake wait is the smaller of the handshake bound and the time
    /// left. When the deadline is what cut it short, the child is killed and
    /// reaped and [`McpError::Timeout`] is returned.
    async fn open_until(
        config: &ServerConfig,
        timeouts: &Timeouts,
        diagnostics: bool,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<Self, McpError> {
        config.validate()?;

        let name = config.name.as_str();
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        cmd.envs(&config.env);
        if let Some(dir) = &config.cwd {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::Connection {
            server: name.to_string(),
            reason: format!("failed to spawn '{}': {e}", config.command),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::Connection {
            server: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::Connection {
            server: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;
        let stderr_tail = StderrTail::spawn(name, child.stderr.take());

        let mut transport = StdioTransport::new(name, stdin, stdout);
        transport.set_diagnostics(diagnostics);

        tracing::debug!(server = name, pid = ?child.id(), "tool server spawned");

        let mut wait = timeouts.handshake;
        let mut cut_by_deadline = false;
        if let Some(deadline) = deadline {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            if left < wait {
                wait = left;
                cut_by_deadline = true;
            }
        }

        let handshake = tokio::time::timeout(wait, initialize(&mut transport, name)).await;

        let server_info = match handshake {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                let _ = child.kill().await;
                let reason = format!("handshake failed: {e}{}", stderr_tail.suffix());
                tracing::warn!(
                    server = name,
                    reason = %reason,
                    "tool server initialization failed"
                );
                return Err(McpError::Connection {
                    server: name.to_string(),
                    reason,
                });
            }
            Err(_) if cut_by_deadline => {
                let _ = child.kill().await;
                tracing::warn!(
                    server = name,
                    waited_ms = wait.as_millis() as u64,
                    "deadline reached during initialization; tool server killed"
                );
                return Err(McpError::Timeout {
                    operation: "initialize".into(),
                    timeout_ms: wait.as_millis() as u64,
                });
            }
            Err(_) => {
                let _ = child.kill().await;
                let reason = format!(
                    "initialization timed out after {}s{}",
                    timeouts.handshake.as_secs(),
                    stderr_tail.suffix()
                );
                tracing::warn!(
                    server = name,
                    reason = %reason,
                    "tool server initialization timed out"
                );
                return Err(McpError::Connection {
                    server: name.to_string(),
                    reason,
                });
            }
        };

        tracing::info!(
            server = name,
            pid = ?child.id(),
            remote = ?server_info.as_ref().and_then(|i| i.name.as_deref()),
            "tool server session opened"
        );

        Ok(Self {
            name: name.to_string(),
            process: child,
            transport,
            server_info,
            stderr_tail,
            shutdown_grace: timeouts.shutdown,
            closed: false,
        })
    }

    /// OS process id of the server, while it is running.
    pub fn pid(&self) -> Option<u32> {
        self.process.id()
    }

    /// Server identity reported during the handshake.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Fetch every operation the server exposes, following pagination.
    pub async fn list_operations(&mut self) -> Result<Vec<OperationDescriptor>, McpError> {
        let mut operations = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let response = self.transport.request("tools/list", params).await?;
            let result = extract_result(&self.name, response)?;

            let page: ListToolsResult =
                serde_json::from_value(result).map_err(|e| McpError::Protocol {
                    server: self.name.clone(),
                    reason: format!("malformed tools/list result: {e}"),
                    raw: None,
                })?;

            operations.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(operations),
            }
        }

        Err(McpError::Protocol {
            server: self.name.clone(),
            reason: format!("tools/list did not finish after {MAX_LIST_PAGES} pages"),
            raw: None,
        })
    }

    /// Call one operation with already-reconciled arguments.
    pub async fn invoke(
        &mut self,
        operation: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, McpError> {
        let start = Instant::now();
        let params = json!({
            "name": operation,
            "arguments": arguments,
        });

        let response = self.transport.request("tools/call", Some(params)).await?;
        let result = extract_result(&self.name, response)?;

        let call: CallToolResult =
            serde_json::from_value(result).map_err(|e| McpError::Protocol {
                server: self.name.clone(),
                reason: format!("malformed tools/call result: {e}"),
                raw: None,
            })?;

        let text = call.text();
        let elapsed = start.elapsed().as_millis() as u64;

        if call.is_error {
            tracing::debug!(
                server = %self.name,
                operation,
                elapsed_ms = elapsed,
                "operation reported an error"
            );
            return Err(McpError::Remote {
                code: None,
                message: text,
            });
        }

        tracing::debug!(
            server = %self.name,
            operation,
            parts = call.content.len(),
            elapsed_ms = elapsed,
            "operation completed"
        );

        Ok(ToolOutput {
            operation: operation.to_string(),
            text,
            part_count: call.content.len(),
            execution_time_ms: elapsed,
        })
    }

    /// Close stdin, give the server the shutdown grace to exit, then kill.
    /// Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.transport.close_writer().await;

        match tokio::time::timeout(self.shutdown_grace, self.process.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, %status, "tool server exited");
            }
            _ => {
                // Force kill if graceful shutdown failed/timed out
                let _ = self.process.kill().await;
                tracing::debug!(server = %self.name, "tool server killed after shutdown grace");
            }
        }
        self.closed = true;
    }

    /// Kill the server immediately and reap it. Idempotent.
    pub async fn abort(&mut self) {
        if self.closed {
            return;
        }
        let _ = self.process.kill().await;
        self.closed = true;
        tracing::debug!(server = %self.name, "tool server aborted");
    }

    /// Recent stderr output from the server.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail.snapshot()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            // kill_on_drop also covers this; the explicit call makes the
            // intent visible in logs.
            let _ = self.process.start_kill();
            tracing::warn!(server = %self.name, "session dropped without close; server killed");
        }
    }
}

/// Perform the MCP initialization handshake.
async fn initialize(
    transport: &mut StdioTransport,
    server_name: &str,
) -> Result<Option<ServerInfo>, McpError> {
    let params = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    });

    let response = transport.request("initialize", Some(params)).await?;
    let result = extract_result(server_name, response)?;

    let init: InitializeResult = serde_json::from_value(result).map_err(|e| McpError::Protocol {
        server: server_name.to_string(),
        reason: format!("failed to parse initialize response: {e}"),
        raw: None,
    })?;

    if let Some(version) = &init.protocol_version {
        if version != PROTOCOL_VERSION {
            tracing::debug!(
                server = server_name,
                offered = PROTOCOL_VERSION,
                negotiated = %version,
                "server negotiated a different protocol version"
            );
        }
    }

    transport.notify("notifications/initialized", None).await?;
    Ok(init.server_info)
}

// ─── Scoped acquisition ──────────────────────────────────────────────────────

/// Open a session, run `op` on it within `bound`, and always release it.
///
/// The bound covers the handshake and `op`. The session is closed after
/// success or failure. A timeout at any point kills and reaps the server
/// before this returns.
pub async fn scoped<T, F>(
    config: &ServerConfig,
    timeouts: &Timeouts,
    diagnostics: bool,
    label: &str,
    bound: Duration,
    op: F,
) -> Result<T, McpError>
where
    F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, Result<T, McpError>>,
{
    let deadline = tokio::time::Instant::now() + bound;
    let timed_out = || McpError::Timeout {
        operation: label.to_string(),
        timeout_ms: bound.as_millis() as u64,
    };

    let mut session = Session::open_until(config, timeouts, diagnostics, Some(deadline))
        .await
        .map_err(|e| match e {
            McpError::Timeout { .. } => timed_out(),
            other => other,
        })?;

    let outcome = tokio::time::timeout_at(deadline, op(&mut session)).await;

    match outcome {
        Ok(result) => {
            session.close().await;
            result
        }
        Err(_) => {
            tracing::warn!(
                server = %config.name,
                operation = label,
                pid = ?session.pid(),
                bound_ms = bound.as_millis() as u64,
                "operation exceeded its bound; killing tool server"
            );
            session.abort().await;
            Err(timed_out())
        }
    }
}

// ─── Stderr capture ──────────────────────────────────────────────────────────

/// Drains the child's stderr into debug logs, keeping the last few lines.
#[derive(Clone, Default)]
struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    fn spawn(server: &str, stderr: Option<ChildStderr>) -> Self {
        let tail = Self::default();
        let Some(stderr) = stderr else {
            return tail;
        };

        let sink = tail.clone();
        let server = server.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(server = %server, line = %line, "tool server stderr");
                sink.push(line);
            }
        });
        tail
    }

    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == STDERR_TAIL_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    fn snapshot(&self) -> String {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }

    /// Format a stderr suffix for error messages (empty string if no stderr).
    fn suffix(&self) -> String {
        let text = self.snapshot();
        if text.trim().is_empty() {
            String::new()
        } else {
            format!(" | stderr: {}", text.trim())
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
