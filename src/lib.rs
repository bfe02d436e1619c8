//! Adapter between agent frameworks and the Keboola MCP tool server.
//!
//! [`mcp_client`] speaks MCP to the server over a child process's stdio;
//! [`adapter`] turns each discovered operation into a synchronous,
//! string-returning tool.
//!
//! ```no_run
//! use kbc_toolbridge::{Settings, Tool, Toolbox};
//!
//! # fn main() -> Result<(), kbc_toolbridge::McpError> {
//! kbc_toolbridge::init_tracing();
//! let toolbox = Toolbox::discover_blocking(Settings::from_env()?)?;
//! let buckets = toolbox.tool("keboola_list_buckets")?.invoke("".into());
//! println!("{buckets}");
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod mcp_client;

pub use adapter::{McpTool, Tool, ToolInput, Toolbox};
pub use mcp_client::{
    McpError, OperationCatalog, OperationDescriptor, ServerConfig, Settings, Timeouts, ToolOutput,
};

/// Environment variable selecting the log format (`json` or plain text).
pub const ENV_LOG_FORMAT: &str = "TOOLBRIDGE_LOG_FORMAT";

/// Initialize the tracing subscriber, writing to stderr.
///
/// stdout stays free for protocol traffic. The filter comes from `RUST_LOG`,
/// defaulting to `kbc_toolbridge=info,warn`; `TOOLBRIDGE_LOG_FORMAT=json`
/// switches to JSON lines. Calling this more than once is harmless.
pub fn init_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("kbc_toolbridge=info,warn"));

    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false);

    // A subscriber may already be installed (tests, host application).
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "tracing initialized"
    );
}
