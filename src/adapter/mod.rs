//! Host-framework adapter over the MCP client.
//!
//! - [`bridge`]: run async tool-server work from synchronous callers
//! - [`facade`]: the [`Tool`] trait and one-operation [`McpTool`] wrappers
//! - [`toolbox`]: discovery and the resulting set of tools

pub mod bridge;
pub mod facade;
pub mod toolbox;

pub use bridge::call_blocking;
pub use facade::{McpTool, Tool, ToolInput};
pub use toolbox::Toolbox;
