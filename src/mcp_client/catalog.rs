//! Operation catalog: the operations discovered from one tool server.
//!
//! Provides:
//! - Lookup by operation name, with similar-name suggestions on a miss
//! - Declaration-order iteration (the order the server listed them)
//! - Grouping into functional categories and a compact capability summary
//! - Serialization into the OpenAI function-calling format
//!
//! A catalog is immutable once built.

use std::collections::HashMap;

use super::errors::McpError;
use super::types::OperationDescriptor;

/// Minimum similarity for a name to be offered as a suggestion.
const SUGGESTION_FLOOR: f64 = 0.5;

/// Maximum number of suggestions attached to a lookup error.
const MAX_SUGGESTIONS: usize = 3;

// ─── OperationCatalog ────────────────────────────────────────────────────────

/// Discovered operations, in server order, indexed by name.
#[derive(Debug, Clone, Default)]
pub struct OperationCatalog {
    operations: Vec<OperationDescriptor>,
    index: HashMap<String, usize>,
}

impl OperationCatalog {
    /// Build a catalog from a discovery response.
    ///
    /// Names are unique within a session; if a server repeats one anyway, the
    /// first occurrence wins and the duplicate is logged.
    pub fn new(operations: Vec<OperationDescriptor>) -> Self {
        let mut kept = Vec::with_capacity(operations.len());
        let mut index = HashMap::with_capacity(operations.len());

        for op in operations {
            if index.contains_key(&op.name) {
                tracing::warn!(
                    operation = %op.name,
                    "duplicate operation name in discovery; ignoring"
                );
                continue;
            }
            index.insert(op.name.clone(), kept.len());
            kept.push(op);
        }

        Self {
            operations: kept,
            index,
        }
    }

    /// Look up an operation by name.
    pub fn get(&self, name: &str) -> Option<&OperationDescriptor> {
        self.index.get(name).map(|&i| &self.operations[i])
    }

    /// Look up an operation, failing with suggestions when it is absent.
    pub fn lookup(&self, name: &str) -> Result<&OperationDescriptor, McpError> {
        self.get(name).ok_or_else(|| McpError::UnknownOperation {
            name: name.to_string(),
            suggestions: self.find_similar(name, MAX_SUGGESTIONS),
        })
    }

    /// All operations in the order the server listed them.
    pub fn operations(&self) -> &[OperationDescriptor] {
        &self.operations
    }

    /// All operation names in server order.
    pub fn names(&self) -> Vec<&str> {
        self.operations.iter().map(|op| op.name.as_str()).collect()
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Find up to `max_results` operation names most similar to `name`,
    /// best first.
    pub fn find_similar(&self, name: &str, max_results: usize) -> Vec<String> {
        let mut scored: Vec<(&str, f64)> = self
            .operations
            .iter()
            .map(|op| (op.name.as_str(), similarity(name, &op.name)))
            .filter(|(_, score)| *score >= SUGGESTION_FLOOR)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);
        scored.into_iter().map(|(name, _)| name.to_string()).collect()
    }

    /// Group operations by functional category, in [`OperationCategory`]
    /// order. Empty categories are omitted.
    pub fn by_category(&self) -> Vec<(OperationCategory, Vec<&str>)> {
        OperationCategory::ALL
            .iter()
            .filter_map(|&category| {
                let members: Vec<&str> = self
                    .operations
                    .iter()
                    .filter(|op| OperationCategory::of(&op.name) == category)
                    .map(|op| op.name.as_str())
                    .collect();
                (!members.is_empty()).then_some((category, members))
            })
            .collect()
    }

    /// Compact overview of what the server offers, suitable for a system
    /// prompt or a startup log line.
    pub fn capability_summary(&self) -> String {
        if self.is_empty() {
            return "No tool server operations available.".to_string();
        }

        let groups: Vec<String> = self
            .by_category()
            .into_iter()
            .map(|(category, members)| format!("{} ({})", category.label(), members.len()))
            .collect();

        format!(
            "Available operations ({} total): {}.",
            self.len(),
            groups.join(", ")
        )
    }

    /// Serialize operations into OpenAI function-calling format, using
    /// `name_for` to map operation names to exposed tool names.
    pub fn to_openai_tools<F>(&self, name_for: F) -> Vec<serde_json::Value>
    where
        F: Fn(&str) -> String,
    {
        self.operations
            .iter()
            .map(|op| {
                let mut parameters = match &op.input_schema {
                    serde_json::Value::Object(schema) => schema.clone(),
                    _ => serde_json::Map::new(),
                };
                parameters
                    .entry("type")
                    .or_insert_with(|| serde_json::json!("object"));
                parameters
                    .entry("properties")
                    .or_insert_with(|| serde_json::json!({}));
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": name_for(&op.name),
                        "description": op.description,
                        "parameters": parameters,
                    }
                })
            })
            .collect()
    }
}

// ─── Categories ──────────────────────────────────────────────────────────────

/// Functional grouping of tool-server operations, derived from their names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationCategory {
    Components,
    Storage,
    Transformations,
    Jobs,
    Sql,
    Documentation,
    Other,
}

impl OperationCategory {
    /// All categories in display order.
    pub const ALL: [OperationCategory; 7] = [
        OperationCategory::Components,
        OperationCategory::Storage,
        OperationCategory::Transformations,
        OperationCategory::Jobs,
        OperationCategory::Sql,
        OperationCategory::Documentation,
        OperationCategory::Other,
    ];

    /// Classify an operation by keywords in its name (first match wins).
    pub fn of(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        let has = |keywords: &[&str]| keywords.iter().any(|k| name.contains(k));

        if has(&["component"]) {
            Self::Components
        } else if has(&["bucket", "table", "storage"]) {
            Self::Storage
        } else if has(&["transformation"]) {
            Self::Transformations
        } else if has(&["job"]) {
            Self::Jobs
        } else if has(&["sql", "query"]) {
            Self::Sql
        } else if has(&["docs"]) {
            Self::Documentation
        } else {
            Self::Other
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Components => "Components",
            Self::Storage => "Storage",
            Self::Transformations => "Transformations",
            Self::Jobs => "Jobs",
            Self::Sql => "SQL",
            Self::Documentation => "Documentation",
            Self::Other => "Other",
        }
    }
}

// ─── Edit Distance ──────────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    let n = b_bytes.len();

    // Single-row DP
    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for (i, &ca) in a_bytes.iter().enumerate() {
        curr[0] = i + 1;
        for j in 1..=n {
            let cost = usize::from(ca != b_bytes[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Normalized similarity between two strings (0.0 = completely different, 1.0 = identical).
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
