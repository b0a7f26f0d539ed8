//! Configuration loading.
//!
//! The servers file is JSON in the shape
//! `{"mcpServers": {name: {command, args, env, disabled}}}`. Paths may
//! start with `~/`, which is expanded against the home directory.

use std::path::{Path, PathBuf};

use crate::mcp::errors::McpError;
use crate::mcp::types::McpServersConfig;

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Load the servers configuration file.
pub fn load_servers_config(path: impl AsRef<Path>) -> Result<McpServersConfig, McpError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let config: McpServersConfig = serde_json::from_str(&content)?;
    tracing::info!(
        path = %path.display(),
        servers = config.servers.len(),
        "loaded MCP servers config"
    );
    Ok(config)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_servers_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp-servers.json");
        std::fs::write(
            &path,
            r#"{
                "mcpServers": {
                    "alpha": {"command": "alpha-server", "args": ["--stdio"]},
                    "beta": {"command": "beta-server", "disabled": true}
                }
            }"#,
        )
        .unwrap();

        let config = load_servers_config(&path).unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers["alpha"].command, "alpha-server");
        assert!(config.servers["beta"].disabled);
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let err = load_servers_config("/nonexistent/toolbridge.json").unwrap_err();
        assert!(matches!(err, McpError::Io(_)));
    }

    #[test]
    fn test_load_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = load_servers_config(&path).unwrap_err();
        assert!(matches!(err, McpError::Json(_)));
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/mcp.json"), home.join("mcp.json"));
        }
        assert_eq!(expand_home("/etc/mcp.json"), PathBuf::from("/etc/mcp.json"));
        assert_eq!(expand_home("relative.json"), PathBuf::from("relative.json"));
    }
}
