//! toolbridge routes tool calls from an LLM agent to backend tool
//! providers.
//!
//! The crate ships one concrete provider, the [`mcp`] subsystem, which
//! supervises local MCP server processes and speaks JSON-RPC 2.0 over
//! their standard streams. Other backends (OpenAPI endpoints, a canvas
//! bridge) plug into the same [`router::ToolProvider`] seam.
//!
//! A typical embedding loads the servers file, wires the MCP provider
//! into a [`router::ToolRouter`], publishes the merged tool list to the
//! agent, and dispatches the agent's calls back through the router.

pub mod config;
pub mod logging;
pub mod mcp;
pub mod router;

pub use config::load_servers_config;
pub use mcp::{McpError, McpServers, McpServersConfig, ServerConfig};
pub use router::{ReferenceStore, RouterError, ToolProvider, ToolRouter};
