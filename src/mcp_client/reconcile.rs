//! Argument reconciliation.
//!
//! Maps a caller's loosely structured input onto an operation's declared
//! parameters. Pure and connection-free.

use serde_json::{Map, Value};

use super::types::{OperationDescriptor, PLACEHOLDER_KEY, PLACEHOLDER_VALUE};

/// Key used for free-text input.
pub const QUERY_KEY: &str = "query";

/// Raw caller input before reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentPayload {
    /// Named arguments.
    Mapping(Map<String, Value>),
    /// A single free-text query.
    Text(String),
}

impl ArgumentPayload {
    /// An empty mapping.
    pub fn empty() -> Self {
        Self::Mapping(Map::new())
    }

    fn into_mapping(self) -> Map<String, Value> {
        match self {
            Self::Mapping(map) => map,
            Self::Text(text) => {
                let mut map = Map::new();
                map.insert(QUERY_KEY.to_string(), Value::String(text));
                map
            }
        }
    }
}

impl From<Map<String, Value>> for ArgumentPayload {
    fn from(map: Map<String, Value>) -> Self {
        Self::Mapping(map)
    }
}

impl From<&str> for ArgumentPayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ArgumentPayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Produce the arguments actually sent for `payload` against `operation`.
///
/// 1. Text becomes `{"query": text}`.
/// 2. `null` values are dropped.
/// 3. No real parameters + placeholder hint: exactly the placeholder.
/// 4. Otherwise keep only declared parameters (no schema: keep everything).
/// 5. If nothing survived but `query` was given, move its value onto the
///    first declared string parameter.
pub fn reconcile(payload: ArgumentPayload, operation: &OperationDescriptor) -> Map<String, Value> {
    let mut args = payload.into_mapping();
    args.retain(|_, v| !v.is_null());

    if operation.real_parameter_names().is_empty() && operation.requires_placeholder() {
        let mut placeholder = Map::new();
        placeholder.insert(
            PLACEHOLDER_KEY.to_string(),
            Value::String(PLACEHOLDER_VALUE.to_string()),
        );
        return placeholder;
    }

    let Some(declared) = operation.parameters() else {
        return args;
    };

    let filtered: Map<String, Value> = args
        .iter()
        .filter(|(key, _)| declared.contains_key(key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    if !filtered.is_empty() {
        return filtered;
    }

    let Some(query) = args.remove(QUERY_KEY) else {
        return filtered;
    };

    let first_string_param = declared
        .iter()
        .find(|(_, def)| def.get("type").and_then(Value::as_str) == Some("string"))
        .map(|(name, _)| name.clone());

    match first_string_param {
        Some(name) => {
            let mut remapped = Map::new();
            remapped.insert(name, query);
            remapped
        }
        None => filtered,
    }
}

/// Required parameters missing from reconciled arguments.
pub fn missing_required<'a>(
    arguments: &Map<String, Value>,
    operation: &'a OperationDescriptor,
) -> Vec<&'a str> {
    operation
        .required_parameters()
        .into_iter()
        .filter(|name| !arguments.contains_key(*name))
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
