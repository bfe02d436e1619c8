//! Sync-over-async execution bridge.
//!
//! Host frameworks call tools synchronously, sometimes from a thread that is
//! already driving a tokio runtime. Blocking on a nested runtime there would
//! panic, so [`call_blocking`] picks one of two paths:
//!
//! - no runtime on this thread: build a current-thread runtime and block on it
//!   directly;
//! - a runtime is active: hand the work to a dedicated worker thread that owns
//!   its own runtime, and wait for its result with a bound.

use std::future::Future;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};

use crate::mcp_client::McpError;

/// Extra wait on top of bound + grace before the caller gives up on a worker.
const WORKER_MARGIN: Duration = Duration::from_millis(500);

/// Run an async operation to completion from synchronous code.
///
/// `bound` is the operation's own limit; the operation is expected to enforce
/// it (and release its subprocess) itself. `grace` covers that release, so
/// the bridge only steps in when the operation overruns `bound + grace`.
/// The runtime used for the call is shut down before this returns, except
/// when an overrunning worker has to be left behind.
pub fn call_blocking<T, F, Fut>(
    label: &str,
    bound: Duration,
    grace: Duration,
    make: F,
) -> Result<T, McpError>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, McpError>>,
    T: Send + 'static,
{
    match Handle::try_current() {
        Err(_) => {
            tracing::debug!(operation = label, "bridging on a fresh runtime");
            run_on_fresh_runtime(label, bound, grace, make)
        }
        Ok(handle) => {
            tracing::debug!(
                operation = label,
                flavor = ?handle.runtime_flavor(),
                "runtime already active; bridging through a worker thread"
            );
            run_on_worker(label, bound, grace, handle.runtime_flavor(), make)
        }
    }
}

/// Build a current-thread runtime, drive `make()` on it, shut it down.
fn run_on_fresh_runtime<T, F, Fut>(
    label: &str,
    bound: Duration,
    grace: Duration,
    make: F,
) -> Result<T, McpError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, McpError>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| McpError::Runtime {
            reason: format!("failed to build runtime for {label}: {e}"),
        })?;

    let outcome = runtime.block_on(async { tokio::time::timeout(bound + grace, make()).await });
    runtime.shutdown_timeout(grace);

    outcome.unwrap_or_else(|_| {
        Err(McpError::Timeout {
            operation: label.to_string(),
            timeout_ms: bound.as_millis() as u64,
        })
    })
}

fn run_on_worker<T, F, Fut>(
    label: &str,
    bound: Duration,
    grace: Duration,
    flavor: RuntimeFlavor,
    make: F,
) -> Result<T, McpError>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, McpError>>,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let worker_label = label.to_string();

    std::thread::Builder::new()
        .name(format!("toolbridge:{label}"))
        .spawn(move || {
            let result = run_on_fresh_runtime(&worker_label, bound, grace, make);
            // The caller may have stopped waiting.
            let _ = tx.send(result);
        })
        .map_err(|e| McpError::Runtime {
            reason: format!("failed to spawn bridge worker for {label}: {e}"),
        })?;

    let wait = bound + grace + WORKER_MARGIN;
    let received = if flavor == RuntimeFlavor::MultiThread {
        tokio::task::block_in_place(|| rx.recv_timeout(wait))
    } else {
        rx.recv_timeout(wait)
    };

    match received {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(
                operation = label,
                bound_ms = bound.as_millis() as u64,
                "bridge worker overran its bound; detaching"
            );
            Err(McpError::Timeout {
                operation: label.to_string(),
                timeout_ms: bound.as_millis() as u64,
            })
        }
        Err(RecvTimeoutError::Disconnected) => Err(McpError::Runtime {
            reason: format!("bridge worker for {label} terminated without a result"),
        }),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
