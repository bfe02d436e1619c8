//! MCP Client: JSON-RPC over stdio for the Keboola tool server.
//!
//! This module handles:
//! - Spawning the tool server as a child process and speaking line-delimited
//!   JSON-RPC 2.0 over its stdio
//! - Session lifecycle: handshake, then scoped use with guaranteed teardown
//! - Operation discovery and lookup
//! - Reconciling caller arguments against each operation's input schema
//!
//! The [`crate::adapter`] module builds the host-framework tool surface on top
//! of this.

pub mod catalog;
pub mod config;
pub mod errors;
pub mod reconcile;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use catalog::{OperationCatalog, OperationCategory};
pub use config::{ServerConfig, Settings, Timeouts};
pub use errors::McpError;
pub use reconcile::{reconcile, ArgumentPayload};
pub use session::{scoped, Session};
pub use types::{OperationDescriptor, ToolOutput};
