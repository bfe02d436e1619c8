//! Toolbox: the discovered tool surface for one tool server.
//!
//! Discovery runs once, in its own short-lived session, and yields one
//! [`McpTool`] per operation. After that the toolbox is immutable; every call
//! opens a fresh session unless it is part of a batch.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::bridge::call_blocking;
use super::facade::{tool_name, McpTool, Tool, ToolInput};
use crate::mcp_client::session::scoped;
use crate::mcp_client::{McpError, OperationCatalog, Settings, ToolOutput};

/// Label used in logs and timeout errors for discovery.
const DISCOVERY_LABEL: &str = "discovery";

/// Label used in logs and timeout errors for shared-session batches.
const BATCH_LABEL: &str = "batch";

/// Operation name and reconciled arguments, ready to send.
type PreparedCall = (String, Map<String, Value>);

/// Discovered tools, in the order the server listed them.
#[derive(Debug, Clone)]
pub struct Toolbox {
    settings: Settings,
    catalog: Arc<OperationCatalog>,
    tools: Vec<McpTool>,
    /// Operation name → index into `tools`.
    index: HashMap<String, usize>,
}

impl Toolbox {
    /// Build a toolbox over an already known catalog.
    pub fn from_catalog(settings: Settings, catalog: OperationCatalog) -> Self {
        let server = Arc::new(settings.server.clone());
        let tools: Vec<McpTool> = catalog
            .operations()
            .iter()
            .map(|op| McpTool::from_shared(Arc::new(op.clone()), Arc::clone(&server), &settings))
            .collect();
        let index = tools
            .iter()
            .enumerate()
            .map(|(i, tool)| (tool.operation().name.clone(), i))
            .collect();

        Self {
            settings,
            catalog: Arc::new(catalog),
            tools,
            index,
        }
    }

    /// Discover every operation the server exposes.
    ///
    /// All-or-nothing within the discovery bound: on timeout or any failure
    /// no partial toolbox is returned and the subprocess is released.
    pub async fn discover(settings: Settings) -> Result<Self, McpError> {
        let operations = scoped(
            &settings.server,
            &settings.timeouts,
            settings.diagnostics,
            DISCOVERY_LABEL,
            settings.timeouts.discovery,
            |session| Box::pin(session.list_operations()),
        )
        .await?;

        let catalog = OperationCatalog::new(operations);
        tracing::info!(
            server = %settings.server.name,
            operations = catalog.len(),
            "discovered tool server operations"
        );
        Ok(Self::from_catalog(settings, catalog))
    }

    /// [`Toolbox::discover`] from synchronous code, with or without an active
    /// runtime.
    pub fn discover_blocking(settings: Settings) -> Result<Self, McpError> {
        let bound = settings.timeouts.discovery_bridge;
        let grace = settings.timeouts.shutdown;
        call_blocking(DISCOVERY_LABEL, bound, grace, move || Self::discover(settings))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &OperationCatalog {
        &self.catalog
    }

    /// All tools in server order.
    pub fn tools(&self) -> &[McpTool] {
        &self.tools
    }

    /// All tools as trait objects, for frameworks that take `Box<dyn Tool>`.
    pub fn boxed_tools(&self) -> Vec<Box<dyn Tool>> {
        self.tools
            .iter()
            .cloned()
            .map(|tool| Box::new(tool) as Box<dyn Tool>)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Find a tool by its exposed name (`keboola_get_table`) or by the raw
    /// operation name (`get_table`).
    pub fn tool(&self, name: &str) -> Result<&McpTool, McpError> {
        let stripped = if self.settings.tool_prefix.is_empty() {
            None
        } else {
            name.strip_prefix(self.settings.tool_prefix.as_str())
                .and_then(|rest| rest.strip_prefix('_'))
        };

        for candidate in [Some(name), stripped].into_iter().flatten() {
            if let Some(&i) = self.index.get(candidate) {
                return Ok(&self.tools[i]);
            }
        }

        let raw = stripped.unwrap_or(name);
        Err(McpError::UnknownOperation {
            name: name.to_string(),
            suggestions: self
                .catalog
                .find_similar(raw, 3)
                .into_iter()
                .map(|op| tool_name(&self.settings.tool_prefix, &op))
                .collect(),
        })
    }

    /// Call one tool on the caller's runtime, in its own session.
    pub async fn call(
        &self,
        name: &str,
        input: impl Into<ToolInput>,
    ) -> Result<ToolOutput, McpError> {
        self.tool(name)?.try_invoke_async(input.into()).await
    }

    /// Call one tool from synchronous code, in its own session.
    pub fn call_blocking(
        &self,
        name: &str,
        input: impl Into<ToolInput>,
    ) -> Result<ToolOutput, McpError> {
        self.tool(name)?.try_invoke(input.into())
    }

    /// Run several calls one after another on a single shared session.
    ///
    /// Results line up with `calls`. Unknown names fail individually without
    /// touching the subprocess, and a batch made only of unknown names never
    /// starts one. The outer error covers the session itself: spawn or
    /// handshake failure, or the whole batch exceeding the batch bound.
    pub async fn call_batch<N, I>(
        &self,
        calls: Vec<(N, I)>,
    ) -> Result<Vec<Result<ToolOutput, McpError>>, McpError>
    where
        N: AsRef<str>,
        I: Into<ToolInput>,
    {
        let prepared: Vec<Result<PreparedCall, McpError>> = calls
            .into_iter()
            .map(|(name, input)| -> Result<PreparedCall, McpError> {
                let tool = self.tool(name.as_ref())?;
                Ok((tool.operation().name.clone(), tool.prepare(input.into())))
            })
            .collect();

        if prepared.iter().all(Result::is_err) {
            return Ok(prepared.into_iter().filter_map(Result::err).map(Err).collect());
        }

        tracing::debug!(calls = prepared.len(), "running batch on a shared session");

        scoped(
            &self.settings.server,
            &self.settings.timeouts,
            self.settings.diagnostics,
            BATCH_LABEL,
            self.settings.timeouts.batch,
            move |session| {
                Box::pin(async move {
                    let mut results = Vec::with_capacity(prepared.len());
                    for entry in prepared {
                        match entry {
                            Ok((operation, arguments)) => {
                                results.push(session.invoke(&operation, arguments).await)
                            }
                            Err(e) => results.push(Err(e)),
                        }
                    }
                    Ok(results)
                })
            },
        )
        .await
    }

    /// OpenAI function-calling definitions for every tool.
    pub fn function_specs(&self) -> Vec<Value> {
        let prefix = self.settings.tool_prefix.as_str();
        self.catalog.to_openai_tools(|op| tool_name(prefix, op))
    }

    /// Compact text overview of the available operations.
    pub fn capability_summary(&self) -> String {
        self.catalog.capability_summary()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
