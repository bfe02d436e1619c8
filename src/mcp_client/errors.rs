//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur while talking to the tool server.
///
/// Library code propagates these with `?`. The tool facade is the only place
/// that turns them into text for the host framework.
#[derive(Debug, Error)]
pub enum McpError {
    /// Required configuration (endpoint URL, token, command) is missing.
    /// Raised before any subprocess is started.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// The server process failed to start, the handshake failed or timed out,
    /// or the stream closed underneath an open session.
    #[error("connection to server '{server}' failed: {reason}")]
    Connection { server: String, reason: String },

    /// A frame from the server could not be parsed as the expected structure.
    #[error("protocol error from server '{server}': {reason}")]
    Protocol {
        server: String,
        reason: String,
        /// The offending frame, truncated. Only logged in diagnostic mode.
        raw: Option<String>,
    },

    /// The server executed the request but reported a failure.
    #[error("{message}")]
    Remote { code: Option<i32>, message: String },

    /// A bridged call, scoped session, or discovery batch exceeded its bound.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The caller referenced an operation absent from the catalog.
    #[error("unknown operation: '{name}'{}", format_suggestions(.suggestions))]
    UnknownOperation {
        name: String,
        suggestions: Vec<String>,
    },

    /// Runtime construction failed or the bridge worker thread died.
    #[error("runtime error: {reason}")]
    Runtime { reason: String },
}

impl McpError {
    /// Whether the error happened before or without any subprocess involvement.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            McpError::Configuration { .. } | McpError::UnknownOperation { .. }
        )
    }
}

fn format_suggestions(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}
