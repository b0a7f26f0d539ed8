//! MCP subsystem error types.
//!
//! Only failures that callers must act on surface as `McpError`. Transient
//! conditions (single timeouts, malformed or unknown-ID response lines,
//! JSON-RPC error replies) are absorbed where they occur: logged, counted
//! where relevant, and resolved as null results.

use thiserror::Error;

/// Errors surfaced by the MCP subsystem.
#[derive(Debug, Error)]
pub enum McpError {
    /// The server process could not be spawned.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// A dispatch target whose process is not running. Converted to a
    /// structured error payload at the dispatcher boundary.
    #[error("MCP server '{name}' is not running")]
    ServerUnavailable { name: String },

    /// Exposed tool name absent from the current catalog. A hard failure:
    /// it indicates a caller bug or stale configuration, not a transient
    /// condition.
    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
