//! Tool-server launch configuration.
//!
//! The configuration is built once (usually from the process environment by
//! [`Settings::from_env`]) and passed explicitly into every session. Nothing
//! below the facade reads the environment on its own.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::errors::McpError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Environment variable carrying the Storage API endpoint.
pub const ENV_API_URL: &str = "KBC_STORAGE_API_URL";
/// Environment variable carrying the Storage API token.
pub const ENV_TOKEN: &str = "KBC_STORAGE_TOKEN";
/// Environment variable carrying the optional workspace schema.
pub const ENV_WORKSPACE_SCHEMA: &str = "KBC_WORKSPACE_SCHEMA";
/// When set (to anything), enables diagnostic logging.
pub const ENV_DEBUG: &str = "DEBUG_MCP_TOOLS";
/// Optional path to a JSON file overriding the launch command.
pub const ENV_SERVER_CONFIG: &str = "TOOLBRIDGE_SERVER_CONFIG";

/// Executable used to launch the tool server.
const DEFAULT_COMMAND: &str = "uvx";

/// Package pin and transport mode for the tool server.
const DEFAULT_ARGS: &[&str] = &[
    "--from",
    "keboola-mcp-server@1.0.0",
    "keboola-mcp-server",
    "--transport",
    "stdio",
];

/// Prefix applied to operation names when exposed as tools.
const DEFAULT_TOOL_PREFIX: &str = "keboola";

// ─── ServerConfig ────────────────────────────────────────────────────────────

/// How to launch the tool server subprocess.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Human-readable name used in logs and errors.
    #[serde(default = "default_server_name")]
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    /// Environment keys that must be present and non-empty before spawning.
    #[serde(default)]
    pub required_env: Vec<String>,
}

fn default_server_name() -> String {
    "keboola".to_string()
}

impl ServerConfig {
    /// A bare launch configuration with no environment.
    pub fn new(command: &str, args: &[&str]) -> Self {
        Self {
            name: default_server_name(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            cwd: None,
            required_env: Vec::new(),
        }
    }

    /// Set an environment variable for the child.
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Check that the configuration is launchable.
    pub fn validate(&self) -> Result<(), McpError> {
        if self.command.trim().is_empty() {
            return Err(McpError::Configuration {
                reason: format!("server '{}' has an empty command", self.name),
            });
        }

        let missing: Vec<&str> = self
            .required_env
            .iter()
            .filter(|key| {
                self.env
                    .get(key.as_str())
                    .map_or(true, |v| v.trim().is_empty())
            })
            .map(String::as_str)
            .collect();

        if !missing.is_empty() {
            return Err(McpError::Configuration {
                reason: format!("missing required environment: {}", missing.join(", ")),
            });
        }

        Ok(())
    }
}

// ─── Timeouts ────────────────────────────────────────────────────────────────

/// Time bounds for every suspending step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Spawn plus `initialize` exchange.
    pub handshake: Duration,
    /// One bridged tool invocation, including its own session.
    pub call: Duration,
    /// Discovery on the caller's runtime (all-or-nothing).
    pub discovery: Duration,
    /// Discovery through the execution bridge.
    pub discovery_bridge: Duration,
    /// Several calls on one shared session.
    pub batch: Duration,
    /// Grace period between closing stdin and killing the child.
    pub shutdown: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            call: Duration::from_secs(30),
            discovery: Duration::from_secs(45),
            discovery_bridge: Duration::from_secs(60),
            batch: Duration::from_secs(120),
            shutdown: Duration::from_secs(5),
        }
    }
}

// ─── Settings ────────────────────────────────────────────────────────────────

/// Everything the adapter needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub timeouts: Timeouts,
    /// Tools are exposed as `{tool_prefix}_{operation}`.
    pub tool_prefix: String,
    /// Log arguments, schemas, and raw frames.
    pub diagnostics: bool,
}

impl Settings {
    /// Settings for an arbitrary server with default timeouts.
    pub fn new(server: ServerConfig) -> Self {
        Self {
            server,
            timeouts: Timeouts::default(),
            tool_prefix: DEFAULT_TOOL_PREFIX.to_string(),
            diagnostics: false,
        }
    }

    /// Build settings from the process environment.
    pub fn from_env() -> Result<Self, McpError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    ///
    /// The endpoint URL and token are mandatory; their absence is reported
    /// here, before anything is spawned. When `TOOLBRIDGE_SERVER_CONFIG`
    /// names a file, its launch command replaces the default one while the
    /// credentials are still injected into the child's environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, McpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let missing: Vec<&str> = [ENV_API_URL, ENV_TOKEN]
            .into_iter()
            .filter(|key| get(*key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(McpError::Configuration {
                reason: format!("missing required environment: {}", missing.join(", ")),
            });
        }

        let mut server = match get(ENV_SERVER_CONFIG) {
            Some(path) => load_server_config(Path::new(&path), &lookup)?,
            None => ServerConfig::new(DEFAULT_COMMAND, DEFAULT_ARGS),
        };

        for key in [ENV_API_URL, ENV_TOKEN] {
            if let Some(value) = get(key) {
                server.env.insert(key.to_string(), value);
            }
        }
        server.env.insert(
            ENV_WORKSPACE_SCHEMA.to_string(),
            get(ENV_WORKSPACE_SCHEMA).unwrap_or_default(),
        );
        for key in [ENV_API_URL, ENV_TOKEN] {
            if !server.required_env.iter().any(|k| k == key) {
                server.required_env.push(key.to_string());
            }
        }

        let mut settings = Self::new(server);
        settings.diagnostics = lookup(ENV_DEBUG).is_some();
        Ok(settings)
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_tool_prefix(mut self, prefix: &str) -> Self {
        self.tool_prefix = prefix.to_string();
        self
    }
}

// ─── Override file ───────────────────────────────────────────────────────────

/// Load a JSON launch configuration.
///
/// Performs variable interpolation on string values matching `${VAR_NAME}`
/// or `${VAR_NAME:-default}`, resolving names through `lookup`.
pub fn load_server_config<F>(path: &Path, lookup: F) -> Result<ServerConfig, McpError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = std::fs::read_to_string(path).map_err(|e| McpError::Configuration {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let interpolated = interpolate_env_vars(&raw, &lookup);

    let config: ServerConfig =
        serde_json::from_str(&interpolated).map_err(|e| McpError::Configuration {
            reason: format!("failed to parse {}: {e}", path.display()),
        })?;

    tracing::info!(
        path = %path.display(),
        command = %config.command,
        "loaded tool server override"
    );

    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr, lookup));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => lookup(var_name).unwrap_or_else(|| expand_tilde(default)),
        None => lookup(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_builds_default_launch() {
        let settings = Settings::from_lookup(lookup_from(&[
            (ENV_API_URL, "https://connection.keboola.com"),
            (ENV_TOKEN, "secret"),
        ]))
        .unwrap();

        assert_eq!(settings.server.command, "uvx");
        assert!(settings.server.args.contains(&"keboola-mcp-server@1.0.0".to_string()));
        assert_eq!(&settings.server.args[3..], ["--transport", "stdio"]);
        assert_eq!(settings.server.env[ENV_TOKEN], "secret");
        assert_eq!(settings.server.env[ENV_WORKSPACE_SCHEMA], "");
        assert_eq!(settings.tool_prefix, "keboola");
        assert!(!settings.diagnostics);
        assert!(settings.server.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_missing_token() {
        let err = Settings::from_lookup(lookup_from(&[(ENV_API_URL, "https://x")])).unwrap_err();
        match err {
            McpError::Configuration { reason } => {
                assert!(reason.contains(ENV_TOKEN));
                assert!(!reason.contains(ENV_API_URL));
            }
            other => panic!("expected Configuration, got {other:?}"),
        }
    }

    #[test]
    fn test_from_lookup_blank_values_count_as_missing() {
        let err = Settings::from_lookup(lookup_from(&[(ENV_API_URL, "  "), (ENV_TOKEN, "")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_API_URL));
        assert!(err.to_string().contains(ENV_TOKEN));
    }

    #[test]
    fn test_diagnostics_flag() {
        let settings = Settings::from_lookup(lookup_from(&[
            (ENV_API_URL, "https://x"),
            (ENV_TOKEN, "t"),
            (ENV_DEBUG, "1"),
        ]))
        .unwrap();
        assert!(settings.diagnostics);
    }

    #[test]
    fn test_validate_required_env() {
        let mut config = ServerConfig::new("uvx", &[]);
        config.required_env.push(ENV_TOKEN.to_string());
        assert!(matches!(
            config.validate(),
            Err(McpError::Configuration { .. })
        ));

        let config = config.with_env(ENV_TOKEN, "t");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_command() {
        let config = ServerConfig::new(" ", &[]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_override_file_replaces_command() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(
            &path,
            r#"{"command": "node", "args": ["dist/index.js"], "cwd": "${__TOOLBRIDGE_UNSET__:-/opt/kbc}"}"#,
        )
        .unwrap();

        let settings = Settings::from_lookup(lookup_from(&[
            (ENV_API_URL, "https://x"),
            (ENV_TOKEN, "t"),
            (ENV_SERVER_CONFIG, path.to_str().unwrap()),
        ]))
        .unwrap();

        assert_eq!(settings.server.command, "node");
        assert_eq!(settings.server.args, vec!["dist/index.js"]);
        assert_eq!(settings.server.cwd.as_deref(), Some("/opt/kbc"));
        assert_eq!(settings.server.env[ENV_API_URL], "https://x");
        assert_eq!(settings.server.required_env.len(), 2);
    }

    #[test]
    fn test_override_file_unparsable() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            load_server_config(&path, |_| None),
            Err(McpError::Configuration { .. })
        ));
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain text with no variables";
        assert_eq!(interpolate_env_vars(input, &|_| None), input);
    }

    #[test]
    fn test_interpolation_uses_the_given_lookup() {
        let lookup = lookup_from(&[("KBC_MCP_HOME", "/srv/kbc")]);
        assert_eq!(
            interpolate_env_vars("${KBC_MCP_HOME}/bin:${MISSING:-fallback}:${MISSING}", &lookup),
            "/srv/kbc/bin:fallback:"
        );
    }

    #[test]
    fn test_override_file_resolves_variables_from_lookup() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(
            &path,
            r#"{"command": "${KBC_MCP_BIN}", "args": ["--transport", "${KBC_MCP_TRANSPORT:-stdio}"]}"#,
        )
        .unwrap();

        let settings = Settings::from_lookup(lookup_from(&[
            (ENV_API_URL, "https://x"),
            (ENV_TOKEN, "t"),
            (ENV_SERVER_CONFIG, path.to_str().unwrap()),
            ("KBC_MCP_BIN", "/opt/kbc/keboola-mcp-server"),
        ]))
        .unwrap();

        assert_eq!(settings.server.command, "/opt/kbc/keboola-mcp-server");
        assert_eq!(settings.server.args, vec!["--transport", "stdio"]);
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/Documents");
        assert!(!result.starts_with('~'), "tilde should be expanded");
        assert!(result.ends_with("/Documents"));
    }

    #[test]
    fn test_default_timeouts() {
        let t = Timeouts::default();
        assert_eq!(t.call, Duration::from_secs(30));
        assert_eq!(t.discovery, Duration::from_secs(45));
        assert_eq!(t.discovery_bridge, Duration::from_secs(60));
    }
}
