//! Shared helpers for tests that drive the bundled stub tool server.

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use kbc_toolbridge::{ServerConfig, Settings, Timeouts};

/// Path of the stub server binary built alongside the tests.
pub const STUB_BIN: &str = env!("CARGO_BIN_EXE_stub-tool-server");

/// Launch configuration for the stub server in its default mode.
pub fn stub_config() -> ServerConfig {
    ServerConfig::new(STUB_BIN, &[])
}

/// Launch configuration for the stub server in the given `STUB_SERVER_MODE`.
pub fn stub_config_with_mode(mode: &str) -> ServerConfig {
    stub_config().with_env("STUB_SERVER_MODE", mode)
}

/// Settings for the stub server with test-friendly bounds.
pub fn stub_settings() -> Settings {
    Settings::new(stub_config()).with_timeouts(Timeouts {
        handshake: Duration::from_secs(10),
        call: Duration::from_secs(10),
        discovery: Duration::from_secs(10),
        discovery_bridge: Duration::from_secs(15),
        batch: Duration::from_secs(15),
        shutdown: Duration::from_secs(2),
    })
}

/// Whether a process with `pid` still exists (Linux only).
pub fn process_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

/// A server that records its pid in `pid_file` and then never speaks.
pub fn silent_server_config(pid_file: &Path) -> ServerConfig {
    let script = format!("echo $$ > '{}'; exec sleep 30", pid_file.display());
    ServerConfig::new("sh", &["-c", script.as_str()])
}

/// Read the pid the stub wrote to `path`.
pub fn read_pid(path: &Path) -> u32 {
    std::fs::read_to_string(path)
        .expect("pid file should exist")
        .trim()
        .parse()
        .expect("pid file should hold a number")
}
