//! Tool registry for the Code-Chat Agent (spec §4.12).
//!
//! Tools are registered objects with a JSON parameter schema; a subset
//! requires user confirmation before the agent loop executes them.

pub mod file_ops;
pub mod git;
pub mod search;

use crate::error::{SandboxError, SandboxResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema describing accepted parameters, shown to the planner.
    fn schema(&self) -> Value;
    /// File write, file delete, and git commit require a user confirmation.
    fn requires_confirmation(&self) -> bool {
        false
    }
    async fn execute(&self, args: Value) -> SandboxResult<Value>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> SandboxResult<Arc<dyn Tool>> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| SandboxError::UnknownTool(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Rendered for the planner's system prompt, one line per tool.
    pub fn describe_all(&self) -> String {
        let mut names: Vec<&Arc<dyn Tool>> = self.tools.values().collect();
        names.sort_by_key(|t| t.name());
        names
            .into_iter()
            .map(|t| format!("- {}({}): {}", t.name(), t.schema(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn schema(&self) -> Value {
            serde_json::json!({"text": "string"})
        }
        async fn execute(&self, args: Value) -> SandboxResult<Value> {
            Ok(args)
        }
    }

    #[test]
    fn unregistered_tool_is_an_error() {
        let registry = ToolRegistry::new();
        assert!(registry.get("echo").is_err());
    }

    #[tokio::test]
    async fn registered_tool_executes() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let tool = registry.get("echo").unwrap();
        let result = tool.execute(serde_json::json!({"text": "hi"})).await.unwrap();
        assert_eq!(result["text"], "hi");
    }
}
