//! The tool catalog: records from one discovery pass plus the
//! exposed-name index used for dispatch.
//!
//! A catalog is built in one shot and replaced wholesale on the next
//! pass; readers never see a half-merged state.

use std::collections::HashMap;

use serde_json::{json, Value};

use super::names::NameResolver;
use super::types::ParamSpec;

/// One tool as reported by a server during discovery. Immutable once
/// created; addressed externally only by its exposed name.
#[derive(Debug, Clone)]
pub struct ToolRecord {
    /// Configured name of the owning server.
    pub server: String,
    /// Raw tool name as the server knows it.
    pub tool: String,
    pub description: String,
    pub parameters: HashMap<String, ParamSpec>,
    pub required: Vec<String>,
}

/// Ordered tool records plus an injective exposed-name index.
#[derive(Debug, Default)]
pub struct Catalog {
    records: Vec<ToolRecord>,
    exposed: Vec<String>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Resolve exposed names for `records` in order and build the index.
    pub fn build(records: Vec<ToolRecord>, prefix: &str, delimiter: &str) -> Self {
        let mut resolver = NameResolver::new(prefix, delimiter);
        let mut exposed = Vec::with_capacity(records.len());
        let mut index = HashMap::with_capacity(records.len());

        for (i, record) in records.iter().enumerate() {
            let name = resolver.resolve(&record.server, &record.tool);
            index.insert(name.clone(), i);
            exposed.push(name);
        }

        Self {
            records,
            exposed,
            index,
        }
    }

    /// Look up a record by its exposed name.
    pub fn lookup(&self, exposed_name: &str) -> Option<&ToolRecord> {
        self.index.get(exposed_name).map(|&i| &self.records[i])
    }

    /// Exposed names in record order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.exposed.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ToolRecord)> {
        self.exposed
            .iter()
            .map(String::as_str)
            .zip(self.records.iter())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize the catalog into function-calling schemas.
    pub fn to_function_schemas(&self) -> Vec<Value> {
        self.iter()
            .map(|(name, record)| {
                let mut properties = serde_json::Map::new();
                for (param, spec) in &record.parameters {
                    let mut schema = json!({
                        "type": spec.param_type,
                        "description": spec.description,
                    });
                    // Array parameters need an item type; servers in the
                    // wild rarely say, so assume strings.
                    if spec.param_type == "array" {
                        schema["items"] = json!({"type": "string"});
                    }
                    properties.insert(param.clone(), schema);
                }

                json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": record.description,
                        "strict": false,
                        "parameters": {
                            "type": "object",
                            "properties": properties,
                            "required": record.required,
                            "additionalProperties": false
                        }
                    }
                })
            })
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn record(server: &str, tool: &str) -> ToolRecord {
        ToolRecord {
            server: server.to_string(),
            tool: tool.to_string(),
            description: format!("Tool from {server}"),
            parameters: HashMap::from([(
                "path".to_string(),
                ParamSpec {
                    param_type: "string".to_string(),
                    description: "Parameter path".to_string(),
                },
            )]),
            required: vec!["path".to_string()],
        }
    }

    #[test]
    fn test_build_and_lookup() {
        let catalog = Catalog::build(
            vec![record("alpha", "echo"), record("beta", "reverse")],
            "mcp",
            "____",
        );

        assert_eq!(catalog.len(), 2);
        let echo = catalog.lookup("mcp____alpha_X_echo").unwrap();
        assert_eq!(echo.server, "alpha");
        assert_eq!(echo.tool, "echo");
        assert!(catalog.lookup("mcp____nope").is_none());
    }

    #[test]
    fn test_index_is_total_and_injective() {
        let records = vec![
            record("alpha", "echo"),
            record("alpha", "echo.v2"),
            record("a-server-with-a-very-long-name", "and_an_overlong_tool_name_too"),
            record("a-server-with-a-very-long-name", "and_an_overlong_tool_name_two"),
        ];
        let catalog = Catalog::build(records, "mcp", "____");

        let names: Vec<&str> = catalog.names().collect();
        assert_eq!(names.len(), 4);
        let unique: std::collections::HashSet<&&str> = names.iter().collect();
        assert_eq!(unique.len(), 4);

        for name in names {
            assert!(name.len() <= 64);
            assert!(catalog.lookup(name).is_some());
        }
    }

    #[test]
    fn test_function_schemas_shape() {
        let catalog = Catalog::build(vec![record("alpha", "echo")], "mcp", "____");
        let schemas = catalog.to_function_schemas();
        assert_eq!(schemas.len(), 1);

        let function = &schemas[0]["function"];
        assert_eq!(schemas[0]["type"], "function");
        assert_eq!(function["name"], "mcp____alpha_X_echo");
        assert_eq!(function["strict"], false);
        assert_eq!(function["parameters"]["type"], "object");
        assert_eq!(
            function["parameters"]["properties"]["path"]["type"],
            "string"
        );
        assert_eq!(function["parameters"]["required"][0], "path");
        assert_eq!(function["parameters"]["additionalProperties"], false);
    }

    #[test]
    fn test_array_parameters_get_item_type() {
        let mut rec = record("alpha", "bulk");
        rec.parameters.insert(
            "paths".to_string(),
            ParamSpec {
                param_type: "array".to_string(),
                description: "Paths to read".to_string(),
            },
        );
        let catalog = Catalog::build(vec![rec], "mcp", "____");
        let schemas = catalog.to_function_schemas();
        assert_eq!(
            schemas[0]["function"]["parameters"]["properties"]["paths"]["items"]["type"],
            "string"
        );
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = Catalog::default();
        assert!(catalog.is_empty());
        assert!(catalog.to_function_schemas().is_empty());
    }
}
