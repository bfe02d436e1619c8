//! End-to-end tests against the bundled stub tool server.

mod common;

use std::time::{Duration, Instant};

use serde_json::{json, Map};

use common::{stub_config, stub_config_with_mode, stub_settings};
use kbc_toolbridge::mcp_client::Session;
use kbc_toolbridge::{
    McpError, McpTool, OperationDescriptor, Settings, Timeouts, Tool, ToolInput, Toolbox,
};

fn discover() -> Toolbox {
    Toolbox::discover_blocking(stub_settings()).expect("discovery against the stub should succeed")
}

// ─── Discovery ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_discovery_follows_pagination_in_order() {
    let toolbox = Toolbox::discover(stub_settings()).await.unwrap();
    assert_eq!(
        toolbox.catalog().names(),
        vec!["echo", "list_buckets", "get_table", "whoami", "fail", "sleep", "multi_part"]
    );
    assert_eq!(toolbox.tools()[0].name(), "keboola_echo");
    assert_eq!(
        toolbox.tools()[0].description(),
        "Keboola MCP Tool: Echo the given text back"
    );
}

#[test]
fn test_discover_blocking_without_runtime() {
    let toolbox = discover();
    assert_eq!(toolbox.len(), 7);
    assert!(toolbox.tool("keboola_list_buckets").unwrap().operation().requires_placeholder());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_discover_blocking_inside_runtime() {
    let toolbox = Toolbox::discover_blocking(stub_settings()).unwrap();
    assert_eq!(toolbox.len(), 7);
}

#[tokio::test]
async fn test_session_reports_server_info_and_closes() {
    let mut session = Session::open(&stub_config(), &Timeouts::default()).await.unwrap();
    assert!(session.pid().is_some());
    let info = session.server_info().expect("stub reports server info");
    assert_eq!(info.name.as_deref(), Some("stub-tool-server"));

    let operations = session.list_operations().await.unwrap();
    assert_eq!(operations.len(), 7);

    session.close().await;
    session.close().await;
}

// ─── Invocation through the facade ───────────────────────────────────────────

#[test]
fn test_echo_from_plain_thread() {
    let toolbox = discover();
    let out = toolbox.tool("keboola_echo").unwrap().invoke("hello".into());
    assert_eq!(out, "hello");
}

#[tokio::test]
async fn test_echo_blocking_inside_current_thread_runtime() {
    let toolbox = Toolbox::discover(stub_settings()).await.unwrap();
    let out = toolbox.tool("keboola_echo").unwrap().invoke("hello".into());
    assert_eq!(out, "hello");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_echo_blocking_inside_multi_thread_runtime() {
    let toolbox = Toolbox::discover(stub_settings()).await.unwrap();
    let out = toolbox.tool("keboola_echo").unwrap().invoke("hello".into());
    assert_eq!(out, "hello");
}

#[tokio::test]
async fn test_echo_async() {
    let toolbox = Toolbox::discover(stub_settings()).await.unwrap();
    let tool = toolbox.tool("echo").unwrap();
    assert_eq!(tool.invoke_async(r#"{"text": "from json"}"#.into()).await, "from json");
}

#[test]
fn test_plain_thread_and_runtime_agree() {
    let toolbox = discover();
    let inputs = ["hello", r#"{"text": "mapped"}"#, ""];

    let direct: Vec<String> = inputs
        .iter()
        .map(|input| toolbox.tool("keboola_echo").unwrap().invoke((*input).into()))
        .collect();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let bridged: Vec<String> = runtime.block_on(async {
        inputs
            .iter()
            .map(|input| toolbox.tool("keboola_echo").unwrap().invoke((*input).into()))
            .collect()
    });

    assert_eq!(direct, bridged);
    assert_eq!(direct[0], "hello");
    assert_eq!(direct[1], "mapped");
    // Nothing to reconcile: the stub echoes the (empty) arguments back.
    assert_eq!(direct[2], "{}");
}

#[test]
fn test_placeholder_sent_for_parameterless_operation() {
    let toolbox = discover();
    let tool = toolbox.tool("keboola_list_buckets").unwrap();
    assert_eq!(tool.invoke(ToolInput::empty()), r#"{"random_string":"dummy"}"#);
    assert_eq!(tool.invoke("whatever the agent says".into()), r#"{"random_string":"dummy"}"#);
}

#[test]
fn test_placeholder_hint_on_empty_schema() {
    let settings = stub_settings();
    let hinted = McpTool::new(
        OperationDescriptor::new("whoami", "", json!({})).with_placeholder_hint(),
        &settings,
    );
    assert_eq!(hinted.invoke(ToolInput::empty()), r#"{"random_string":"dummy"}"#);

    let plain = McpTool::new(OperationDescriptor::new("whoami", "", json!({})), &settings);
    assert_eq!(plain.invoke(ToolInput::empty()), "{}");
}

#[test]
fn test_text_maps_onto_first_string_parameter() {
    let toolbox = discover();
    let tool = toolbox.tool("keboola_get_table").unwrap();
    assert_eq!(tool.invoke("in.c-main.orders".into()), r#"{"table_id":"in.c-main.orders"}"#);
    assert_eq!(
        tool.invoke(r#"{"table_id": "t", "limit": 5, "format": "csv", "verbose": null}"#.into()),
        r#"{"table_id":"t","limit":5}"#
    );
}

#[test]
fn test_multi_part_content_is_joined() {
    let toolbox = discover();
    let out = toolbox.call_blocking("keboola_multi_part", ToolInput::empty()).unwrap();
    assert_eq!(out.text, "part one\npart two");
    assert_eq!(out.part_count, 2);
    assert_eq!(out.operation, "multi_part");
}

// ─── Failures ────────────────────────────────────────────────────────────────

#[test]
fn test_remote_failure_is_rendered_as_text() {
    let toolbox = discover();
    let out = toolbox.tool("keboola_fail").unwrap().invoke(ToolInput::empty());
    assert_eq!(out, "Error running MCP tool fail: simulated failure");
}

#[tokio::test]
async fn test_remote_failure_is_remote_error() {
    let toolbox = Toolbox::discover(stub_settings()).await.unwrap();
    let err = toolbox.call("fail", ToolInput::empty()).await.unwrap_err();
    assert!(matches!(err, McpError::Remote { code: None, .. }), "{err:?}");
}

#[tokio::test]
async fn test_json_rpc_error_is_remote_error() {
    let mut session = Session::open(&stub_config(), &Timeouts::default()).await.unwrap();
    let err = session.invoke("not_in_catalog", Map::new()).await.unwrap_err();
    session.close().await;
    match err {
        McpError::Remote { code, message } => {
            assert_eq!(code, Some(-32602));
            assert_eq!(message, "Unknown tool: not_in_catalog");
        }
        other => panic!("expected Remote, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_operation_is_lookup_error() {
    let toolbox = Toolbox::discover(stub_settings()).await.unwrap();
    let err = toolbox.call("keboola_get_tabel", "x").await.unwrap_err();
    match err {
        McpError::UnknownOperation { suggestions, .. } => {
            assert_eq!(suggestions.first().map(String::as_str), Some("keboola_get_table"));
        }
        other => panic!("expected UnknownOperation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_exiting_immediately_is_connection_error() {
    let err = Session::open(&stub_config_with_mode("exit"), &Timeouts::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, McpError::Connection { .. }), "{err:?}");
}

#[test]
fn test_server_exiting_immediately_renders_connection_error() {
    let settings = Settings::new(stub_config_with_mode("exit"));
    let tool = McpTool::new(
        OperationDescriptor::new("echo", "", json!({"properties": {"text": {"type": "string"}}})),
        &settings,
    );
    let out = tool.invoke("hello".into());
    assert!(out.starts_with("Error running MCP tool echo: connection to server"), "{out}");
}

#[tokio::test]
async fn test_garbage_frames_are_protocol_errors() {
    let mut session = Session::open(&stub_config_with_mode("garbage"), &Timeouts::default())
        .await
        .unwrap();
    let err = session.list_operations().await.unwrap_err();
    session.abort().await;
    match err {
        McpError::Protocol { raw, .. } => assert_eq!(raw.as_deref(), Some("this is not json-rpc")),
        other => panic!("expected Protocol, got {other:?}"),
    }
}

#[test]
fn test_missing_credentials_fail_before_spawn() {
    let err = Settings::from_lookup(|_| None).unwrap_err();
    assert!(matches!(err, McpError::Configuration { .. }));
    assert!(err.to_string().contains("KBC_STORAGE_API_URL"));
    assert!(err.to_string().contains("KBC_STORAGE_TOKEN"));
}

#[test]
fn test_override_file_launches_stub() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server.json");
    std::fs::write(
        &path,
        serde_json::to_string(&json!({"command": common::STUB_BIN})).unwrap(),
    )
    .unwrap();

    let path_str = path.to_string_lossy().into_owned();
    let settings = Settings::from_lookup(|key| match key {
        "KBC_STORAGE_API_URL" => Some("https://connection.keboola.com".into()),
        "KBC_STORAGE_TOKEN" => Some("secret".into()),
        "TOOLBRIDGE_SERVER_CONFIG" => Some(path_str.clone()),
        _ => None,
    })
    .unwrap();
    assert_eq!(settings.server.env["KBC_STORAGE_TOKEN"], "secret");

    let toolbox = Toolbox::discover_blocking(settings).unwrap();
    assert_eq!(toolbox.len(), 7);
}

// ─── Bounds and teardown ─────────────────────────────────────────────────────

#[cfg(target_os = "linux")]
#[test]
fn test_call_timeout_leaves_no_subprocess() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("stub.pid");

    let mut settings = stub_settings();
    settings.server = settings
        .server
        .with_env("STUB_PID_FILE", &pid_file.to_string_lossy());
    settings.timeouts.call = Duration::from_millis(1500);

    let tool = McpTool::new(
        OperationDescriptor::new(
            "sleep",
            "",
            json!({"properties": {"seconds": {"type": "number"}}}),
        ),
        &settings,
    );

    let start = Instant::now();
    let err = tool.try_invoke(ToolInput::empty()).unwrap_err();
    assert!(matches!(err, McpError::Timeout { timeout_ms: 1500, .. }), "{err:?}");
    assert!(start.elapsed() < Duration::from_secs(10));

    let pid = common::read_pid(&pid_file);
    assert!(!common::process_exists(pid), "stub {pid} outlived the timeout");
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_call_timeout_inside_runtime_leaves_no_subprocess() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("stub.pid");

    let mut settings = stub_settings();
    settings.server = settings
        .server
        .with_env("STUB_PID_FILE", &pid_file.to_string_lossy());
    settings.timeouts.call = Duration::from_millis(1500);

    let tool = McpTool::new(
        OperationDescriptor::new(
            "sleep",
            "",
            json!({"properties": {"seconds": {"type": "number"}}}),
        ),
        &settings,
    );

    let out = tool.invoke(ToolInput::empty());
    assert!(out.starts_with("Error running MCP tool sleep: "), "{out}");
    assert!(out.contains("timed out after 1500ms"), "{out}");

    let pid = common::read_pid(&pid_file);
    assert!(!common::process_exists(pid), "stub {pid} outlived the timeout");
}

/// Settings for a server that never answers the handshake, with a discovery
/// bound well below the handshake bound.
#[cfg(target_os = "linux")]
fn hung_server_settings(pid_file: &std::path::Path) -> Settings {
    let mut settings = Settings::new(common::silent_server_config(pid_file));
    settings.timeouts.handshake = Duration::from_secs(30);
    settings.timeouts.discovery = Duration::from_millis(500);
    settings.timeouts.discovery_bridge = Duration::from_millis(500);
    settings
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_discovery_timeout_during_handshake_leaves_no_subprocess() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("server.pid");

    let start = Instant::now();
    let err = Toolbox::discover(hung_server_settings(&pid_file)).await.unwrap_err();
    assert!(matches!(err, McpError::Timeout { timeout_ms: 500, .. }), "{err:?}");
    assert!(start.elapsed() < Duration::from_secs(10));

    let pid = common::read_pid(&pid_file);
    assert!(!common::process_exists(pid), "server {pid} outlived the timeout");
}

#[cfg(target_os = "linux")]
#[test]
fn test_blocking_discovery_timeout_during_handshake_leaves_no_subprocess() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("server.pid");

    let start = Instant::now();
    let err = Toolbox::discover_blocking(hung_server_settings(&pid_file)).unwrap_err();
    assert!(matches!(err, McpError::Timeout { timeout_ms: 500, .. }), "{err:?}");
    assert!(start.elapsed() < Duration::from_secs(10));

    let pid = common::read_pid(&pid_file);
    assert!(!common::process_exists(pid), "server {pid} outlived the timeout");
}

// ─── Batches ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_batch_shares_one_session() {
    let toolbox = Toolbox::discover(stub_settings()).await.unwrap();
    let results = toolbox
        .call_batch(vec![
            ("keboola_echo", ToolInput::from("one")),
            ("keboola_nope", ToolInput::empty()),
            ("get_table", ToolInput::from("in.c-main.orders")),
            ("fail", ToolInput::empty()),
        ])
        .await
        .unwrap();

    assert_eq!(results.len(), 4);
    assert_eq!(results[0].as_ref().unwrap().text, "one");
    assert!(matches!(results[1], Err(McpError::UnknownOperation { .. })));
    assert_eq!(
        results[2].as_ref().unwrap().text,
        r#"{"table_id":"in.c-main.orders"}"#
    );
    assert!(matches!(results[3], Err(McpError::Remote { .. })));
}

#[test]
fn test_function_specs_match_tools() {
    let toolbox = discover();
    let specs = toolbox.function_specs();
    let names: Vec<&str> = specs
        .iter()
        .filter_map(|s| s["function"]["name"].as_str())
        .collect();
    let tool_names: Vec<&str> = toolbox.tools().iter().map(|t| t.name()).collect();
    assert_eq!(names, tool_names);
    assert_eq!(specs[2]["function"]["parameters"]["required"], json!(["table_id"]));
    assert!(toolbox.capability_summary().starts_with("Available operations (7 total)"));
    assert_eq!(toolbox.tools()[0].input_schema()["type"], "object");
}
