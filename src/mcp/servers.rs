//! Multi-server orchestration.
//!
//! `McpServers` owns one [`ServerProcess`] per enabled server, fans
//! `tools/list` out to all of them concurrently, merges the results into
//! a [`Catalog`], and dispatches `tools/call` requests to the owning
//! process. One server failing to spawn, failing its health check, or
//! timing out never affects discovery for the others.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};

use crate::router::{RouterError, ToolProvider};

use super::catalog::{Catalog, ToolRecord};
use super::errors::McpError;
use super::process::ServerProcess;
use super::types::{McpServersConfig, ParamSpec};

/// Prompt line published ahead of the MCP tool list.
const MCP_PROMPT: &str = "These functions are available from MCP servers:";

/// All configured MCP servers and the catalog from the latest pass.
pub struct McpServers {
    processes: HashMap<String, Arc<ServerProcess>>,
    records: Vec<ToolRecord>,
    catalog: Catalog,
}

impl McpServers {
    /// Build from configuration. Disabled servers are dropped here and
    /// never started; processes are created lazily on the first
    /// discovery pass.
    pub fn new(config: McpServersConfig) -> Self {
        let processes = config
            .servers
            .into_iter()
            .filter(|(name, server)| {
                if server.disabled {
                    tracing::info!(server = %name, "skipping disabled MCP server");
                }
                !server.disabled
            })
            .map(|(name, server)| {
                let process = Arc::new(ServerProcess::new(name.clone(), server));
                (name, process)
            })
            .collect();

        Self {
            processes,
            records: Vec::new(),
            catalog: Catalog::default(),
        }
    }

    /// Configured (enabled) server names, sorted.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of tools found by the latest discovery pass.
    pub fn tool_count(&self) -> usize {
        self.records.len()
    }

    /// Exposed names from the current catalog, in record order.
    pub fn exposed_names(&self) -> Vec<String> {
        self.catalog.names().map(str::to_string).collect()
    }

    // ─── Discovery ───────────────────────────────────────────────────────

    /// Query every enabled server for its tools, concurrently.
    ///
    /// Servers are visited in sorted name order so catalogs come out
    /// deterministic. Results are merged only after every per-server
    /// task has finished; a failed server contributes zero tools.
    pub async fn discover_all(&mut self) {
        let mut tasks = Vec::with_capacity(self.processes.len());
        for name in self.server_names() {
            let process = Arc::clone(&self.processes[&name]);
            tasks.push(tokio::spawn(discover_server(process)));
        }

        let mut records = Vec::new();
        for task in join_all(tasks).await {
            match task {
                Ok(mut found) => records.append(&mut found),
                Err(e) => tracing::error!(error = %e, "discovery task panicked"),
            }
        }

        tracing::info!(tools = records.len(), "discovery pass complete");
        self.records = records;
    }

    /// Resolve exposed names for the latest pass and return the
    /// function-calling schemas. The catalog is rebuilt wholesale, so
    /// dispatch only ever sees names from a single pass.
    pub fn get_tools(&mut self, prefix: &str, delimiter: &str) -> Vec<Value> {
        self.catalog = Catalog::build(self.records.clone(), prefix, delimiter);
        self.catalog.to_function_schemas()
    }

    // ─── Dispatch ────────────────────────────────────────────────────────

    /// Call a tool by its exposed name.
    ///
    /// An unknown name is a hard error. Everything else comes back as a
    /// JSON string: either the normalized tool result or a structured
    /// `{"status":"error","message":…}` payload.
    pub async fn call_function(&self, name: &str, arguments: Value) -> Result<String, McpError> {
        let Some(record) = self.catalog.lookup(name) else {
            return Err(McpError::UnknownTool {
                name: name.to_string(),
            });
        };

        let unavailable = McpError::ServerUnavailable {
            name: record.server.clone(),
        };
        let Some(process) = self.processes.get(&record.server) else {
            return Ok(error_payload(&unavailable.to_string()));
        };
        if !process.is_running().await {
            return Ok(error_payload(&unavailable.to_string()));
        }

        let params = json!({ "name": record.tool, "arguments": arguments });
        match process.request("tools/call", Some(params)).await {
            Some(result) => Ok(normalize_result(result)),
            None => Ok(error_payload(&format!(
                "failed to call MCP tool '{}' on server '{}'",
                record.tool, record.server
            ))),
        }
    }

    /// Stop every running server process.
    pub async fn stop_all(&self) {
        for process in self.processes.values() {
            process.stop().await;
        }
    }
}

/// Bring one server up (with a single restart-and-recheck on an
/// unhealthy process) and ask it for its tools.
async fn discover_server(process: Arc<ServerProcess>) -> Vec<ToolRecord> {
    let name = process.name().to_string();
    tracing::info!(server = %name, "discovering tools");

    if !process.is_running().await {
        if let Err(e) = process.start().await {
            tracing::error!(server = %name, error = %e, "failed to start server, skipping");
            return Vec::new();
        }
    }

    if !process.check_health().await {
        tracing::warn!(server = %name, "server unhealthy, restarting once");
        if let Err(e) = process.restart().await {
            tracing::error!(server = %name, error = %e, "restart failed, skipping");
            return Vec::new();
        }
        if !process.check_health().await {
            tracing::error!(server = %name, "server still unhealthy after restart, skipping");
            return Vec::new();
        }
    }

    let Some(result) = process.request("tools/list", None).await else {
        tracing::warn!(server = %name, "no tools/list result, skipping");
        return Vec::new();
    };

    parse_tool_list(&name, &result)
}

/// Map a `tools/list` result onto [`ToolRecord`]s, filling the defaults
/// for anything the server left out.
fn parse_tool_list(server: &str, result: &Value) -> Vec<ToolRecord> {
    let Some(tools) = result.get("tools").and_then(Value::as_array) else {
        tracing::warn!(server = %server, "tools/list result missing tools array");
        return Vec::new();
    };

    let mut records = Vec::new();
    for tool in tools {
        let Some(tool_name) = tool.get("name").and_then(Value::as_str) else {
            tracing::warn!(server = %server, "tool entry missing name, skipping");
            continue;
        };

        let description = tool
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Tool from {server}"));

        let schema = tool.get("inputSchema");

        let mut parameters = HashMap::new();
        if let Some(props) = schema
            .and_then(|s| s.get("properties"))
            .and_then(Value::as_object)
        {
            for (param_name, param_schema) in props {
                let param_type = param_schema
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("string")
                    .to_string();
                let description = param_schema
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Parameter {param_name}"));
                parameters.insert(
                    param_name.clone(),
                    ParamSpec {
                        param_type,
                        description,
                    },
                );
            }
        }

        let required = schema
            .and_then(|s| s.get("required"))
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        records.push(ToolRecord {
            server: server.to_string(),
            tool: tool_name.to_string(),
            description,
            parameters,
            required,
        });
    }

    tracing::info!(server = %server, tools = records.len(), "registered tools");
    records
}

/// Collapse whatever the server returned into a single JSON string.
///
/// A string that already parses as JSON passes through untouched; any
/// other string is wrapped as `{"content": …}`; structured values are
/// serialized directly.
fn normalize_result(result: Value) -> String {
    match result {
        Value::String(s) => {
            if serde_json::from_str::<Value>(&s).is_ok() {
                s
            } else {
                json!({ "content": s }).to_string()
            }
        }
        other => other.to_string(),
    }
}

fn error_payload(message: &str) -> String {
    json!({ "status": "error", "message": message }).to_string()
}

// ─── Provider Surface ────────────────────────────────────────────────────────

#[async_trait]
impl ToolProvider for McpServers {
    fn name(&self) -> &str {
        "mcp"
    }

    fn prompt(&self) -> String {
        MCP_PROMPT.to_string()
    }

    fn tool_names(&self) -> Vec<String> {
        self.exposed_names()
    }

    async fn get_tools(&mut self, prefix: &str, delimiter: &str) -> Vec<Value> {
        self.discover_all().await;
        McpServers::get_tools(self, prefix, delimiter)
    }

    async fn call_function(
        &mut self,
        name: &str,
        arguments: Value,
        _token: Option<&str>,
        _oauth_token: Option<&str>,
    ) -> Result<String, RouterError> {
        McpServers::call_function(self, name, arguments)
            .await
            .map_err(RouterError::from)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
