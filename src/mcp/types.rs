//! Wire protocol and configuration types.
//!
//! JSON-RPC 2.0 message types for the line-delimited stdio protocol and
//! the server configuration structures loaded from `mcp-servers.json`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request line.
///
/// Request IDs are strings minted from the per-process counter. `params`
/// is always present on the wire, defaulting to an empty object.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: &str, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: id.to_string(),
            method: method.to_string(),
            params: params.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

// ─── Tool Schemas ────────────────────────────────────────────────────────────

/// One parameter of a discovered tool.
///
/// Servers that omit the type get `"string"`; servers that omit the
/// description get a generated placeholder. Both defaults are applied
/// during discovery, so records built from a `tools/list` reply are
/// always complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
}

// ─── Server Configuration ────────────────────────────────────────────────────

/// One configured MCP server. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Disabled servers are never started.
    #[serde(default)]
    pub disabled: bool,
}

/// Top-level servers configuration file: `{"mcpServers": {name: {...}}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpServersConfig {
    #[serde(rename = "mcpServers", default)]
    pub servers: HashMap<String, ServerConfig>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
