//! Name → tool lookup exposed to the agent loop and the model

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::contract::{Tool, ToolDefinition, ToolResult};
use crate::llm::Tool as ModelTool;

/// Opening words of the result for a name nobody registered
pub const UNKNOWN_TOOL_PREFIX: &str = "Unknown tool";

/// Enabled tools in registration order
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing (and returning) any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        debug!(tool = tool.name(), "Registering tool");
        match self.position(tool.name()) {
            Some(index) => Some(std::mem::replace(&mut self.tools[index], tool)),
            None => {
                self.tools.push(tool);
                None
            }
        }
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(index) => {
                self.tools.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.position(name).map(|index| self.tools[index].clone())
    }

    pub fn has(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Registered tool names, in registration order
    pub fn list(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Every definition in the function-calling shape the model expects
    pub fn to_model_tools(&self) -> Vec<ModelTool> {
        self.definitions()
            .iter()
            .map(ToolDefinition::to_model_tool)
            .collect()
    }

    /// One line per tool for the system instructions
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Look up and run a tool; an unknown name is a validation error
    pub async fn execute(&self, name: &str, args: Value) -> ToolResult {
        match self.get(name) {
            Some(tool) => tool.validate_and_execute(args).await,
            None => ToolResult::validation_failed(format!(
                "{} '{}'. Available tools: {}",
                UNKNOWN_TOOL_PREFIX,
                name,
                self.list().join(", ")
            )),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.tools.iter().position(|t| t.name() == name)
    }
}
