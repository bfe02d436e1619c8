//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types and MCP protocol structures.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// MCP protocol revision announced during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Parameter key the tool server expects on operations that take no input.
pub const PLACEHOLDER_KEY: &str = "random_string";

/// Value sent for [`PLACEHOLDER_KEY`].
pub const PLACEHOLDER_VALUE: &str = "dummy";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// One operation exposed by the tool server, as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
    /// Set when the operation needs a placeholder argument to be callable
    /// without real input. Derived from the schema unless set explicitly.
    #[serde(skip)]
    placeholder_hint: bool,
}

impl OperationDescriptor {
    /// Build a descriptor by hand (tests, static catalogs).
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            placeholder_hint: false,
        }
    }

    /// Force the placeholder-required hint on.
    pub fn with_placeholder_hint(mut self) -> Self {
        self.placeholder_hint = true;
        self
    }

    /// Declared parameters (`properties`), in declaration order.
    ///
    /// `None` when the schema is absent or declares no `properties` object.
    pub fn parameters(&self) -> Option<&Map<String, Value>> {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .filter(|props| !props.is_empty())
    }

    /// Names of declared parameters that carry real input (the placeholder
    /// key does not count).
    pub fn real_parameter_names(&self) -> Vec<&str> {
        self.parameters()
            .map(|props| {
                props
                    .keys()
                    .map(String::as_str)
                    .filter(|name| *name != PLACEHOLDER_KEY)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the operation must be sent the placeholder argument when it
    /// receives no real input.
    pub fn requires_placeholder(&self) -> bool {
        self.placeholder_hint
            || self
                .parameters()
                .is_some_and(|props| props.contains_key(PLACEHOLDER_KEY))
    }

    /// Names listed in the schema's `required` array.
    pub fn required_parameters(&self) -> Vec<&str> {
        self.input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// `tools/list` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<OperationDescriptor>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// One content part of a `tools/call` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentPart {
    /// Render the part as text: text parts verbatim, anything else as JSON.
    pub fn render(&self) -> String {
        match (&self.kind[..], &self.text) {
            ("text", Some(text)) => text.clone(),
            _ => serde_json::to_string(self).unwrap_or_else(|_| self.kind.clone()),
        }
    }
}

/// `tools/call` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
    #[serde(default, rename = "structuredContent")]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    /// Flatten all content parts into one string, joined by newlines in
    /// response order.
    pub fn text(&self) -> String {
        if self.content.is_empty() {
            if let Some(structured) = &self.structured_content {
                return structured.to_string();
            }
        }
        self.content
            .iter()
            .map(ContentPart::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Successful output of one remote invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub operation: String,
    pub text: String,
    pub part_count: usize,
    pub execution_time_ms: u64,
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

// ─── Standard MCP Error Codes ────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────
