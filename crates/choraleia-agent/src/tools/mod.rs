//! Tool capability set presented to the model.
//!
//! Each tool is a record of name, JSON Schema, and an `invoke` that returns a
//! text result; the registry is a map keyed by name, and the agent loop calls
//! `invoke` by name. A failing tool never aborts the conversation — every
//! failure becomes an error-flagged result the model can react to.

pub mod browser;
pub mod terminal;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::provider::ToolDefinition;

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text content returned to the LLM.
    pub content: String,
    /// Whether the tool execution failed.
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Trait that all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name, part of the protocol (e.g. "terminal_exec_command").
    fn name(&self) -> &str;
    /// Description shown to the model.
    fn description(&self) -> &str;
    /// JSON Schema for the input parameters.
    fn input_schema(&self) -> serde_json::Value;
    /// Execute with the given arguments.
    async fn invoke(&self, args: serde_json::Value) -> ToolResult;
}

/// Capability set keyed by tool name.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Definitions in stable (sorted) order for the model request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let tool = &self.tools[name];
                ToolDefinition {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    input_schema: tool.input_schema(),
                }
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Dispatch by name. Unknown names and argument-JSON failures become
    /// error results, not errors.
    pub async fn invoke(&self, name: &str, arguments_json: &str) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            return ToolResult::error(format!("unknown tool: {name}"));
        };
        let args: serde_json::Value = match serde_json::from_str(arguments_json) {
            Ok(v) => v,
            Err(e) => return ToolResult::error(format!("invalid tool arguments: {e}")),
        };
        debug!(tool = name, "invoking tool");
        tool.invoke(args).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn invoke(&self, args: serde_json::Value) -> ToolResult {
            match args.get("text").and_then(|v| v.as_str()) {
                Some(text) => ToolResult::success(text),
                None => ToolResult::error("missing required parameter: text"),
            }
        }
    }

    #[tokio::test]
    async fn registry_dispatches_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));

        let result = registry.invoke("echo", r#"{"text":"hi"}"#).await;
        assert!(!result.is_error);
        assert_eq!(result.content, "hi");
    }

    #[tokio::test]
    async fn unknown_tool_becomes_an_error_result() {
        let registry = ToolRegistry::new();
        let result = registry.invoke("nope", "{}").await;
        assert!(result.is_error);
        assert!(result.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn bad_arguments_become_an_error_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let result = registry.invoke("echo", "{not json").await;
        assert!(result.is_error);
    }

    #[test]
    fn definitions_are_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }
}
