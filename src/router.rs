//! Provider seam and the multi-provider router.
//!
//! Backends publish function-calling schemas under a prefix and receive
//! calls addressed by the published names. The MCP subsystem is the
//! in-crate [`ToolProvider`]; OpenAPI endpoints and the canvas bridge
//! live behind the same seam. Large results can optionally be parked in
//! an external [`ReferenceStore`] and passed around by reference key.
//!
//! Per-tool call surfaces (for plugin APIs and the like) are expected to
//! be generated by iterating the published schemas, never by emitting
//! and executing source text at runtime.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::mcp::errors::McpError;

/// Separator between the provider prefix and the tool name.
pub const DEFAULT_DELIMITER: &str = "____";

const DEFAULT_PROMPT: &str = "These functions are available from the given API server:";

/// Key shape produced by upstream tool-call bookkeeping. String
/// arguments matching it are dereferenced through the reference store
/// before dispatch.
fn reference_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^call_[A-Za-z0-9]{24}$").expect("valid pattern"))
}

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Hard routing failures. Transient backend conditions come back as
/// structured payloads in the result string instead.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("malformed tool name '{name}': missing delimiter")]
    MalformedName { name: String },

    #[error("no provider registered for prefix '{prefix}'")]
    UnknownPrefix { prefix: String },

    #[error(transparent)]
    Mcp(#[from] McpError),
}

// ─── Seams ───────────────────────────────────────────────────────────────────

/// A backend that can publish tools and execute calls.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Stable short name; doubles as the routing prefix.
    fn name(&self) -> &str;

    /// Prompt section describing this provider. Empty string means the
    /// router's default prompt is used.
    fn prompt(&self) -> String;

    /// Names currently published by this provider, in full prefixed form.
    fn tool_names(&self) -> Vec<String>;

    /// Publish function-calling schemas under `prefix` and `delimiter`.
    async fn get_tools(&mut self, prefix: &str, delimiter: &str) -> Vec<Value>;

    /// Execute a call addressed by a published name. Returns a JSON
    /// string.
    async fn call_function(
        &mut self,
        name: &str,
        arguments: Value,
        token: Option<&str>,
        oauth_token: Option<&str>,
    ) -> Result<String, RouterError>;
}

/// External key-value collaborator for passing large results by
/// reference instead of by value.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn store(&self, key: &str, value: &str);
    async fn retrieve(&self, key: &str) -> Option<String>;
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Merges provider catalogs into one flat tool list and routes calls
/// back to the owning provider by prefix.
pub struct ToolRouter {
    providers: Vec<Box<dyn ToolProvider>>,
    delimiter: String,
    reference_store: Option<Box<dyn ReferenceStore>>,
}

impl ToolRouter {
    pub fn new() -> Self {
        Self::with_delimiter(DEFAULT_DELIMITER)
    }

    pub fn with_delimiter(delimiter: &str) -> Self {
        Self {
            providers: Vec::new(),
            delimiter: delimiter.to_string(),
            reference_store: None,
        }
    }

    /// Register a provider. Its `name()` becomes the routing prefix and
    /// must be unique among registered providers.
    pub fn add_provider(&mut self, provider: Box<dyn ToolProvider>) {
        self.providers.push(provider);
    }

    pub fn set_reference_store(&mut self, store: Box<dyn ReferenceStore>) {
        self.reference_store = Some(store);
    }

    /// All tools from all providers, as one flat list.
    pub async fn get_tools(&mut self) -> Vec<Value> {
        let delimiter = self.delimiter.clone();
        let mut tools = Vec::new();
        for provider in &mut self.providers {
            let prefix = provider.name().to_string();
            tools.extend(provider.get_tools(&prefix, &delimiter).await);
        }
        tools
    }

    /// Prompt text describing every provider and its tools.
    pub fn get_prompt(&self) -> String {
        let mut sections = Vec::new();
        for provider in &self.providers {
            let prompt = provider.prompt();
            let mut section = if prompt.is_empty() {
                DEFAULT_PROMPT.to_string()
            } else {
                prompt
            };
            for name in provider.tool_names() {
                section.push('\n');
                section.push_str(&name);
            }
            sections.push(section);
        }
        sections.join("\n\n")
    }

    /// Route a call to the provider owning `name`.
    ///
    /// String arguments holding reference keys are dereferenced first.
    /// When a `tool_call_id` is supplied and a reference store is
    /// configured, the result is stored under that id and a reference
    /// marker is returned instead of the payload.
    pub async fn call_function(
        &mut self,
        name: &str,
        arguments: Value,
        token: Option<&str>,
        oauth_token: Option<&str>,
        tool_call_id: Option<&str>,
    ) -> Result<String, RouterError> {
        let Some((prefix, _)) = name.split_once(&self.delimiter) else {
            return Err(RouterError::MalformedName {
                name: name.to_string(),
            });
        };
        let prefix = prefix.to_string();

        let arguments = self.dereference_arguments(arguments).await;

        let provider = self
            .providers
            .iter_mut()
            .find(|p| p.name() == prefix)
            .ok_or(RouterError::UnknownPrefix { prefix })?;

        let result = provider
            .call_function(name, arguments, token, oauth_token)
            .await?;

        if let (Some(store), Some(call_id)) = (&self.reference_store, tool_call_id) {
            if !call_id.is_empty() {
                store.store(call_id, &result).await;
                return Ok(format!("reference: '{call_id}'"));
            }
        }

        Ok(result)
    }

    /// Swap any argument holding a reference key for the stored value.
    ///
    /// Stored payloads are often `{"data": …}` envelopes; unwrap those,
    /// pass anything else through as-is. Missing keys leave the argument
    /// untouched.
    async fn dereference_arguments(&self, arguments: Value) -> Value {
        let Some(store) = &self.reference_store else {
            return arguments;
        };
        let Value::Object(map) = arguments else {
            return arguments;
        };

        let mut out = serde_json::Map::with_capacity(map.len());
        for (key, value) in map {
            let reference = match &value {
                Value::String(s) if reference_key_pattern().is_match(s) => Some(s.clone()),
                _ => None,
            };
            let resolved = match reference {
                Some(ref_key) => match store.retrieve(&ref_key).await {
                    Some(stored) => match serde_json::from_str::<Value>(&stored) {
                        Ok(Value::Object(envelope)) if envelope.contains_key("data") => {
                            envelope["data"].clone()
                        }
                        _ => Value::String(stored),
                    },
                    None => {
                        tracing::warn!(key = %ref_key, "reference key not found in store");
                        value
                    }
                },
                None => value,
            };
            out.insert(key, resolved);
        }
        Value::Object(out)
    }
}

impl Default for ToolRouter {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type CallLog = Arc<Mutex<Option<(String, Value)>>>;

    /// Records the last call it receives and replies with a canned
    /// string.
    struct StubProvider {
        name: String,
        reply: String,
        last_call: CallLog,
    }

    impl StubProvider {
        fn new(name: &str, reply: &str) -> Self {
            Self {
                name: name.to_string(),
                reply: reply.to_string(),
                last_call: Arc::new(Mutex::new(None)),
            }
        }

        fn call_log(&self) -> CallLog {
            Arc::clone(&self.last_call)
        }
    }

    #[async_trait]
    impl ToolProvider for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn prompt(&self) -> String {
            String::new()
        }

        fn tool_names(&self) -> Vec<String> {
            vec![format!("{}____ping", self.name)]
        }

        async fn get_tools(&mut self, prefix: &str, delimiter: &str) -> Vec<Value> {
            vec![serde_json::json!({
                "type": "function",
                "function": {"name": format!("{prefix}{delimiter}ping")}
            })]
        }

        async fn call_function(
            &mut self,
            name: &str,
            arguments: Value,
            _token: Option<&str>,
            _oauth_token: Option<&str>,
        ) -> Result<String, RouterError> {
            *self.last_call.lock().unwrap() = Some((name.to_string(), arguments));
            Ok(self.reply.clone())
        }
    }

    /// In-memory stand-in for the external reference store.
    #[derive(Default)]
    struct MemoryStore {
        values: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl ReferenceStore for MemoryStore {
        async fn store(&self, key: &str, value: &str) {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
        }

        async fn retrieve(&self, key: &str) -> Option<String> {
            self.values.lock().unwrap().get(key).cloned()
        }
    }

    fn reference_key() -> String {
        format!("call_{}", "a".repeat(24))
    }

    #[tokio::test]
    async fn test_tools_are_merged_across_providers() {
        let mut router = ToolRouter::new();
        router.add_provider(Box::new(StubProvider::new("files", "ok")));
        router.add_provider(Box::new(StubProvider::new("mail", "ok")));

        let tools = router.get_tools().await;
        let names: Vec<&str> = tools
            .iter()
            .filter_map(|t| t["function"]["name"].as_str())
            .collect();
        assert_eq!(names, vec!["files____ping", "mail____ping"]);
    }

    #[tokio::test]
    async fn test_calls_route_by_prefix() {
        let mut router = ToolRouter::new();
        router.add_provider(Box::new(StubProvider::new("files", "from files")));
        router.add_provider(Box::new(StubProvider::new("mail", "from mail")));

        let result = router
            .call_function("mail____ping", serde_json::json!({}), None, None, None)
            .await
            .unwrap();
        assert_eq!(result, "from mail");
    }

    #[tokio::test]
    async fn test_unknown_prefix_is_a_hard_error() {
        let mut router = ToolRouter::new();
        router.add_provider(Box::new(StubProvider::new("files", "ok")));

        let err = router
            .call_function("ghost____ping", serde_json::json!({}), None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownPrefix { .. }));
    }

    #[tokio::test]
    async fn test_missing_delimiter_is_a_hard_error() {
        let mut router = ToolRouter::new();
        let err = router
            .call_function("no-delimiter-here", serde_json::json!({}), None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::MalformedName { .. }));
    }

    #[tokio::test]
    async fn test_reference_arguments_are_dereferenced() {
        let store = MemoryStore::default();
        let key = reference_key();
        store.store(&key, r#"{"data": "the real value"}"#).await;

        let provider = StubProvider::new("files", "ok");
        let log = provider.call_log();
        let mut router = ToolRouter::new();
        router.add_provider(Box::new(provider));
        router.set_reference_store(Box::new(store));

        router
            .call_function(
                "files____ping",
                serde_json::json!({"doc": key, "plain": "untouched"}),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        let (_, received) = log.lock().unwrap().clone().unwrap();
        assert_eq!(received["doc"], "the real value");
        assert_eq!(received["plain"], "untouched");
    }

    #[tokio::test]
    async fn test_missing_reference_passes_through() {
        let provider = StubProvider::new("files", "ok");
        let log = provider.call_log();
        let mut router = ToolRouter::new();
        router.add_provider(Box::new(provider));
        router.set_reference_store(Box::new(MemoryStore::default()));

        let key = reference_key();
        router
            .call_function(
                "files____ping",
                serde_json::json!({"doc": key}),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        let (_, received) = log.lock().unwrap().clone().unwrap();
        assert_eq!(received["doc"], key);
    }

    #[tokio::test]
    async fn test_results_are_stored_by_call_id() {
        let mut router = ToolRouter::new();
        router.add_provider(Box::new(StubProvider::new("files", "a large result")));
        router.set_reference_store(Box::new(MemoryStore::default()));

        let result = router
            .call_function(
                "files____ping",
                serde_json::json!({}),
                None,
                None,
                Some("call_123"),
            )
            .await
            .unwrap();
        assert_eq!(result, "reference: 'call_123'");
    }

    #[tokio::test]
    async fn test_prompt_lists_provider_tools() {
        let mut router = ToolRouter::new();
        router.add_provider(Box::new(StubProvider::new("files", "ok")));

        let prompt = router.get_prompt();
        assert!(prompt.contains("These functions are available"));
        assert!(prompt.contains("files____ping"));
    }

    #[test]
    fn test_reference_key_pattern() {
        assert!(reference_key_pattern().is_match(&reference_key()));
        assert!(!reference_key_pattern().is_match("call_short"));
        assert!(!reference_key_pattern().is_match("not_a_reference"));
        let too_long = format!("call_{}", "a".repeat(25));
        assert!(!reference_key_pattern().is_match(&too_long));
    }
}
