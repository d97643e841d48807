//! `bash`: run a shell command inside the sandbox

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::sandbox::{SandboxEnvironment, SandboxError};
use crate::security::WORKSPACE_ROOT;
use crate::tools::contract::{
    str_arg, InputSchema, ParamType, Tool, ToolError, ToolParameter, ToolResult,
};

/// Hard ceiling on a single command
const MAX_TIMEOUT_SECS: u64 = 600;

pub struct BashTool {
    sandbox: Arc<dyn SandboxEnvironment>,
    default_timeout: Duration,
    schema: InputSchema,
}

impl BashTool {
    pub fn new(sandbox: Arc<dyn SandboxEnvironment>, default_timeout: Duration) -> Result<Self, ToolError> {
        let schema = InputSchema::new(json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "minLength": 1},
                "workdir": {"type": "string"},
                "timeout": {"type": "number", "exclusiveMinimum": 0, "maximum": MAX_TIMEOUT_SECS}
            },
            "required": ["command"],
            "examples": [{"command": "python3 main.py", "workdir": "/workspace"}]
        }))?
        .with_workspace_paths(&["workdir"]);

        Ok(Self {
            sandbox,
            default_timeout,
            schema,
        })
    }
}

/// `[SUCCESS]`/`[ERROR]` header followed by the combined output
pub fn format_output(exit_code: i32, stdout: &str, stderr: &str) -> String {
    let header = if exit_code == 0 {
        "[SUCCESS] Execution successful".to_string()
    } else {
        format!("[ERROR] Exit code {}", exit_code)
    };

    let mut body = String::new();
    if !stdout.trim().is_empty() {
        body.push_str(stdout.trim_end());
    }
    if !stderr.trim().is_empty() {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(stderr.trim_end());
    }
    if body.is_empty() {
        body.push_str("(no output)");
    }

    format!("{}\n{}", header, body)
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the sandboxed workspace and return its output. \
         Use it to run programs, install packages, list files or run tests. \
         Commands run in /workspace unless workdir is given."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("command", ParamType::String, "The shell command to run"),
            ToolParameter::optional("workdir", ParamType::String, "Working directory inside /workspace")
                .with_default(json!(WORKSPACE_ROOT)),
            ToolParameter::optional("timeout", ParamType::Number, "Timeout in seconds")
                .with_default(json!(self.default_timeout.as_secs())),
        ]
    }

    fn input_schema(&self) -> Option<&InputSchema> {
        Some(&self.schema)
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolResult, ToolError> {
        let command = str_arg(&args, "command")?;
        let workdir = args
            .get("workdir")
            .and_then(Value::as_str)
            .unwrap_or(WORKSPACE_ROOT);
        let timeout = args
            .get("timeout")
            .and_then(Value::as_f64)
            .filter(|secs| *secs > 0.0)
            .map(|secs| Duration::from_secs_f64(secs.min(MAX_TIMEOUT_SECS as f64)))
            .unwrap_or(self.default_timeout);

        let output = match self.sandbox.execute(command, Some(workdir), timeout).await {
            Ok(output) => output,
            Err(SandboxError::Security(e)) => {
                return Ok(ToolResult::failed(format!("Failed to execute command: {}", e))
                    .with_metadata("exit_code", 1))
            }
            Err(e) => return Err(e.into()),
        };

        let formatted = format_output(output.exit_code, &output.stdout, &output.stderr);
        let result = if output.success() {
            ToolResult::ok(formatted)
        } else if output.timed_out {
            ToolResult::failed(format!("Command timed out after {}s", timeout.as_secs()))
                .with_output(formatted)
        } else {
            ToolResult::failed(format!("Command failed with exit code {}", output.exit_code))
                .with_output(formatted)
        };

        Ok(result
            .with_metadata("exit_code", output.exit_code)
            .with_metadata("timed_out", output.timed_out))
    }
}
