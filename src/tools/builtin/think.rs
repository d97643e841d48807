//! `think`: a scratchpad for reasoning that has no side effects

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::tools::contract::{str_arg, ParamType, Tool, ToolError, ToolParameter, ToolResult};

#[derive(Debug, Default)]
pub struct ThinkTool;

#[async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Record a thought: plan the next steps, reflect on a result or reason \
         about a problem. Nothing in the workspace changes."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required(
            "thought",
            ParamType::String,
            "Your reasoning",
        )]
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolResult, ToolError> {
        let thought = str_arg(&args, "thought")?;
        Ok(ToolResult::ok("Thought recorded. Continue with your plan.")
            .with_metadata("thought_length", thought.chars().count()))
    }
}
