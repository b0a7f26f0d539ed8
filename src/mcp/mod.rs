//! MCP (Model Context Protocol) process and protocol subsystem.
//!
//! This module handles:
//! - Spawning and supervising one child process per configured server
//! - JSON-RPC 2.0 over line-delimited stdio, with requests and
//!   out-of-order responses correlated by ID
//! - Concurrent tool discovery with per-server failure isolation
//! - Exposed-name resolution under a 64-character budget
//! - Call dispatch and response normalization
//!
//! The subsystem is surfaced to the router as one more
//! [`ToolProvider`](crate::router::ToolProvider) alongside external
//! backends.

pub mod catalog;
pub mod errors;
pub mod names;
pub mod process;
pub mod servers;
pub mod types;

// Re-exports for convenience
pub use catalog::{Catalog, ToolRecord};
pub use errors::McpError;
pub use process::ServerProcess;
pub use servers::McpServers;
pub use types::{McpServersConfig, ServerConfig};
