//! `file_read` and `file_write`

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::sandbox::{FileContent, SandboxEnvironment, SandboxError};
use crate::security::{allowed_file_patterns, is_allowed_file, SecurityError};
use crate::tools::contract::{
    str_arg, InputSchema, ParamType, Tool, ToolError, ToolParameter, ToolResult,
};

/// Prefix every line with its 1-based number
pub fn number_lines(text: &str) -> String {
    text.lines()
        .enumerate()
        .map(|(i, line)| format!("{}: {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn read_failure(path: &str, error: SandboxError) -> ToolResult {
    let message = match error {
        SandboxError::NotFound(_) => format!("File not found or cannot be read: {}", path),
        other => other.to_string(),
    };
    ToolResult::failed(message).with_metadata("path", path)
}

// ═══════════════════════════════════════════════════════════════════════════
// file_read
// ═══════════════════════════════════════════════════════════════════════════

pub struct FileReadTool {
    sandbox: Arc<dyn SandboxEnvironment>,
    schema: InputSchema,
}

impl FileReadTool {
    pub fn new(sandbox: Arc<dyn SandboxEnvironment>) -> Result<Self, ToolError> {
        let schema = InputSchema::new(json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "pattern": "^/workspace(/|$)"}
            },
            "required": ["path"],
            "additionalProperties": false,
            "examples": [{"path": "/workspace/main.py"}]
        }))?
        .with_workspace_paths(&["path"]);

        Ok(Self { sandbox, schema })
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace. Text files come back with line numbers \
         (\"N: line\"); images and other binary files are described instead. \
         Always read a file before editing it."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required(
            "path",
            ParamType::String,
            "Absolute path of the file, e.g. /workspace/main.py",
        )]
    }

    fn input_schema(&self) -> Option<&InputSchema> {
        Some(&self.schema)
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolResult, ToolError> {
        let path = str_arg(&args, "path")?;

        let content = match self.sandbox.read_file(path).await {
            Ok(content) => content,
            Err(e) => return Ok(read_failure(path, e)),
        };

        let result = match content {
            FileContent::Text(text) => ToolResult::ok(number_lines(&text))
                .with_metadata("path", path)
                .with_metadata("line_count", text.lines().count()),
            FileContent::Binary(file) => {
                let is_image = file.is_image();
                let kind = if is_image { "image" } else { "binary" };
                let mut result = ToolResult::ok(format!(
                    "[{} file: {} ({}, {} bytes)]",
                    if is_image { "Image" } else { "Binary" },
                    file.filename,
                    file.mime_type,
                    file.size
                ))
                .with_metadata("path", path)
                .with_metadata("is_binary", true)
                .with_metadata("type", kind)
                .with_metadata("mime_type", file.mime_type.as_str())
                .with_metadata("filename", file.filename.as_str())
                .with_metadata("size", file.size);
                if let Some(preview) = file.preview.filter(|_| is_image) {
                    result = result.with_metadata("image_data", preview);
                }
                result
            }
        };

        Ok(result)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// file_write
// ═══════════════════════════════════════════════════════════════════════════

pub struct FileWriteTool {
    sandbox: Arc<dyn SandboxEnvironment>,
    schema: InputSchema,
}

impl FileWriteTool {
    pub fn new(sandbox: Arc<dyn SandboxEnvironment>) -> Result<Self, ToolError> {
        let schema = InputSchema::new(json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "pattern": "^/workspace/"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"],
            "additionalProperties": false,
            "examples": [{"path": "/workspace/hello.py", "content": "print('hello')\n"}]
        }))?
        .with_workspace_paths(&["path"]);

        Ok(Self { sandbox, schema })
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file in the workspace with the given content. \
         Parent directories are created automatically. Only source, text, \
         config and markup file types may be written."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("path", ParamType::String, "Absolute path under /workspace"),
            ToolParameter::required("content", ParamType::String, "Full file content"),
        ]
    }

    fn input_schema(&self) -> Option<&InputSchema> {
        Some(&self.schema)
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolResult, ToolError> {
        let path = str_arg(&args, "path")?;
        let content = str_arg(&args, "content")?;

        let filename = path.rsplit('/').next().unwrap_or(path);
        if !is_allowed_file(filename) {
            let error = SecurityError::DisallowedFileType {
                filename: filename.to_string(),
            };
            return Ok(ToolResult::failed(format!(
                "{}. Allowed: {}",
                error,
                allowed_file_patterns().join(", ")
            ))
            .with_metadata("path", path));
        }

        let written = match self.sandbox.write_file(path, content.as_bytes()).await {
            Ok(written) => written,
            Err(e) => return Ok(ToolResult::failed(e.to_string()).with_metadata("path", path)),
        };

        if !written {
            return Ok(ToolResult::failed(format!("Failed to write file: {}", path))
                .with_metadata("path", path));
        }

        Ok(ToolResult::ok(format!(
            "Wrote {} bytes ({} lines) to {}",
            content.len(),
            content.lines().count(),
            path
        ))
        .with_metadata("path", path)
        .with_metadata("bytes", content.len()))
    }
}
