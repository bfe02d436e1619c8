//! Host-framework tool facade.
//!
//! Agent frameworks expect tools with a name, a description, and a single
//! input-in, string-out call. [`McpTool`] adapts one tool-server operation to
//! that shape. Failures never escape as errors: they come back as text the
//! agent can read.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::bridge::call_blocking;
use crate::mcp_client::reconcile::{missing_required, reconcile, ArgumentPayload};
use crate::mcp_client::session::scoped;
use crate::mcp_client::{
    McpError, OperationDescriptor, ServerConfig, Settings, Timeouts, ToolOutput,
};

/// A callable tool as seen by an agent framework.
pub trait Tool: Send + Sync {
    /// Identifier the agent uses to call the tool.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's input.
    fn input_schema(&self) -> &Value;

    /// Run the tool. Errors are rendered into the returned text.
    fn invoke(&self, input: ToolInput) -> String;
}

// ─── ToolInput ───────────────────────────────────────────────────────────────

/// Input handed over by an agent framework.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInput {
    /// Named arguments.
    Mapping(Map<String, Value>),
    /// Free text, possibly holding JSON.
    Text(String),
}

impl ToolInput {
    /// An empty argument mapping.
    pub fn empty() -> Self {
        Self::Mapping(Map::new())
    }

    /// Decode into a reconciler payload.
    ///
    /// Text holding a JSON object becomes a mapping, any other JSON value
    /// becomes free text (strings unquoted), and blank text becomes an empty
    /// mapping.
    pub fn into_payload(self) -> ArgumentPayload {
        let text = match self {
            Self::Mapping(map) => return ArgumentPayload::Mapping(map),
            Self::Text(text) => text,
        };

        if text.trim().is_empty() {
            return ArgumentPayload::empty();
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => ArgumentPayload::Mapping(map),
            Ok(Value::String(s)) => ArgumentPayload::Text(s),
            Ok(other) => ArgumentPayload::Text(other.to_string()),
            Err(_) => ArgumentPayload::Text(text),
        }
    }
}

impl From<&str> for ToolInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ToolInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Map<String, Value>> for ToolInput {
    fn from(map: Map<String, Value>) -> Self {
        Self::Mapping(map)
    }
}

impl From<Value> for ToolInput {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Mapping(map),
            Value::Null => Self::empty(),
            Value::String(text) => Self::Text(text),
            other => Self::Text(other.to_string()),
        }
    }
}

// ─── McpTool ─────────────────────────────────────────────────────────────────

/// One tool-server operation exposed as a [`Tool`].
///
/// Each call opens its own session, so tools are cheap to clone and safe to
/// use from several threads at once.
#[derive(Debug, Clone)]
pub struct McpTool {
    name: String,
    description: String,
    operation: Arc<OperationDescriptor>,
    server: Arc<ServerConfig>,
    timeouts: Timeouts,
    diagnostics: bool,
}

impl McpTool {
    /// Wrap `operation`, exposing it as `{prefix}_{operation}`.
    pub fn new(operation: OperationDescriptor, settings: &Settings) -> Self {
        Self::from_shared(
            Arc::new(operation),
            Arc::new(settings.server.clone()),
            settings,
        )
    }

    pub(crate) fn from_shared(
        operation: Arc<OperationDescriptor>,
        server: Arc<ServerConfig>,
        settings: &Settings,
    ) -> Self {
        let summary = if operation.description.trim().is_empty() {
            format!("Keboola tool: {}", operation.name)
        } else {
            operation.description.clone()
        };

        Self {
            name: tool_name(&settings.tool_prefix, &operation.name),
            description: format!("Keboola MCP Tool: {summary}"),
            operation,
            server,
            timeouts: settings.timeouts,
            diagnostics: settings.diagnostics,
        }
    }

    /// The wrapped operation.
    pub fn operation(&self) -> &OperationDescriptor {
        &self.operation
    }

    /// Reconcile `input` against the operation's schema.
    pub fn prepare(&self, input: ToolInput) -> Map<String, Value> {
        let arguments = reconcile(input.into_payload(), &self.operation);

        let missing = missing_required(&arguments, &self.operation);
        if !missing.is_empty() {
            tracing::debug!(
                operation = %self.operation.name,
                missing = ?missing,
                "required parameters absent; sending anyway"
            );
        }

        if self.diagnostics {
            let declared: Vec<&str> = self
                .operation
                .parameters()
                .map(|props| props.keys().map(String::as_str).collect())
                .unwrap_or_default();
            let sent = Value::Object(arguments.clone());
            tracing::info!(
                operation = %self.operation.name,
                arguments = %sent,
                schema_properties = ?declared,
                "calling operation"
            );
        }

        arguments
    }

    /// Reconcile, open a session, call, and release it on the caller's
    /// runtime. Bounded by the per-call timeout.
    pub async fn try_invoke_async(&self, input: ToolInput) -> Result<ToolOutput, McpError> {
        let arguments = self.prepare(input);
        let operation = self.operation.name.clone();

        scoped(
            &self.server,
            &self.timeouts,
            self.diagnostics,
            &self.name,
            self.timeouts.call,
            move |session| Box::pin(async move { session.invoke(&operation, arguments).await }),
        )
        .await
    }

    /// Like [`McpTool::try_invoke_async`], callable from synchronous code
    /// whether or not a runtime is active.
    pub fn try_invoke(&self, input: ToolInput) -> Result<ToolOutput, McpError> {
        let tool = self.clone();
        call_blocking(
            &self.name,
            self.timeouts.call,
            self.timeouts.shutdown,
            move || async move { tool.try_invoke_async(input).await },
        )
    }

    /// Async counterpart of [`Tool::invoke`].
    pub async fn invoke_async(&self, input: ToolInput) -> String {
        self.render(self.try_invoke_async(input).await)
    }

    fn render(&self, outcome: Result<ToolOutput, McpError>) -> String {
        match outcome {
            Ok(output) => output.text,
            Err(e) => {
                tracing::warn!(operation = %self.operation.name, error = %e, "tool call failed");
                format!("Error running MCP tool {}: {e}", self.operation.name)
            }
        }
    }
}

impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> &Value {
        &self.operation.input_schema
    }

    fn invoke(&self, input: ToolInput) -> String {
        self.render(self.try_invoke(input))
    }
}

/// Exposed tool name for an operation.
pub fn tool_name(prefix: &str, operation: &str) -> String {
    if prefix.is_empty() {
        operation.to_string()
    } else {
        format!("{prefix}_{operation}")
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
