//! Tool trait, registry, and the built-in tool surface the orchestrator
//! exposes to the LLM.

pub mod builtins;
mod context;

pub use context::{ExecutionGate, GateDecision, ToolContext};

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

// ── Tool trait and registry ──────────────────────────────────────────────────

/// Describes a single parameter that a tool accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl ToolParam {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
        }
    }
}

/// Static metadata about a tool, used by the LLM to decide which to call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ToolParam>,
}

/// The result returned after a tool runs.  `output` is fed back to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn fail(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Trait implemented by every tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn run(&self, args: &HashMap<String, String>) -> Result<ToolOutput>;
}

/// Central registry for all available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn list_specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.spec().name == name)
            .map(|t| t.as_ref())
    }
}

/// Build the OpenAI-compatible `tools` JSON array from specs, optionally
/// restricted to an allow-list (used by query-intent requests).
pub fn specs_to_openai_tools(specs: &[ToolSpec], allowed: Option<&[&str]>) -> serde_json::Value {
    let array: Vec<serde_json::Value> = specs
        .iter()
        .filter(|spec| allowed.is_none_or(|names| names.contains(&spec.name.as_str())))
        .map(|spec| {
            let mut properties = serde_json::Map::new();
            let mut required = Vec::new();
            for param in &spec.params {
                properties.insert(
                    param.name.clone(),
                    json!({"type": "string", "description": param.description}),
                );
                if param.required {
                    required.push(param.name.clone());
                }
            }
            json!({
                "type": "function",
                "function": {
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": {
                        "type": "object",
                        "properties": properties,
                        "required": required,
                    },
                },
            })
        })
        .collect();
    serde_json::Value::Array(array)
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    struct DummyTool {
        name: String,
    }

    #[async_trait]
    impl Tool for DummyTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.clone(),
                description: format!("Dummy tool: {}", self.name),
                params: vec![ToolParam::required("input", "test param")],
            }
        }
        async fn run(&self, _args: &HashMap<String, String>) -> Result<ToolOutput> {
            Ok(ToolOutput::ok(format!("ran {}", self.name)))
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(DummyTool { name: "alpha".into() }));
        registry.register(Box::new(DummyTool { name: "beta".into() }));

        assert!(registry.get("alpha").is_some());
        assert!(registry.get("gamma").is_none());
        assert_eq!(registry.list_specs().len(), 2);
    }

    #[test]
    fn openai_schema_shape() {
        let specs = vec![ToolSpec {
            name: "execute_command".to_string(),
            description: "Run a command".to_string(),
            params: vec![
                ToolParam::required("target", "Target host"),
                ToolParam::optional("reason", "Why"),
            ],
        }];
        let tools = specs_to_openai_tools(&specs, None);
        let arr = tools.as_array().unwrap();
        assert_eq!(arr[0]["function"]["name"], "execute_command");
        assert_eq!(arr[0]["function"]["parameters"]["required"][0], "target");
    }

    #[test]
    fn allow_list_filters_schema() {
        let specs = vec![
            ToolSpec { name: "list_hosts".into(), description: String::new(), params: vec![] },
            ToolSpec { name: "execute_command".into(), description: String::new(), params: vec![] },
        ];
        let tools = specs_to_openai_tools(&specs, Some(&["list_hosts"]));
        assert_eq!(tools.as_array().unwrap().len(), 1);
    }
}
