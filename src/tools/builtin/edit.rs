//! `edit_lines`: replace, insert or delete a range of lines
//!
//! Line numbers are 1-based and refer to the numbers `file_read` shows.
//! `insert_line = 0` inserts at the top of the file.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::sandbox::{FileContent, SandboxEnvironment, SandboxError};
use crate::tools::contract::{
    str_arg, uint_arg, InputSchema, ParamType, Tool, ToolError, ToolParameter, ToolResult,
};

/// Lines of removed/added text echoed back in the result
const MAX_ECHO_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditCommand {
    Replace { start: usize, end: usize },
    Insert { after: usize },
    Delete { start: usize, end: usize },
}

/// Result of applying an edit to a list of lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub lines: Vec<String>,
    pub removed: Vec<String>,
    pub added: Vec<String>,
}

fn check_range(start: usize, end: usize, line_count: usize) -> Result<(), String> {
    if start == 0 {
        return Err("start_line must be at least 1".to_string());
    }
    if end < start {
        return Err(format!("end_line {} is before start_line {}", end, start));
    }
    if end > line_count {
        return Err(format!(
            "end_line {} exceeds file length ({} lines)",
            end, line_count
        ));
    }
    Ok(())
}

/// Re-indent `new_lines` with the indentation of `reference` when they carry none
fn auto_indent(new_lines: Vec<String>, reference: Option<&str>) -> Vec<String> {
    let Some(reference) = reference else {
        return new_lines;
    };
    let indent: String = reference
        .chars()
        .take_while(|c| c.is_whitespace())
        .collect();
    let already_indented = new_lines
        .iter()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.starts_with(char::is_whitespace))
        .unwrap_or(true);
    if indent.is_empty() || already_indented {
        return new_lines;
    }
    new_lines
        .into_iter()
        .map(|l| {
            if l.trim().is_empty() {
                l
            } else {
                format!("{}{}", indent, l)
            }
        })
        .collect()
}

/// `\r\n` when the file already uses it, `\n` otherwise
fn line_ending(text: &str) -> &'static str {
    if text.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

/// Join edited lines back into file text, keeping the original's line
/// endings and trailing newline
fn render_lines(lines: &[String], original: &str) -> String {
    let ending = line_ending(original);
    let mut text = lines.join(ending);
    if original.ends_with('\n') || original.is_empty() {
        text.push_str(ending);
    }
    text
}

/// Apply an edit; errors are messages for the model
pub fn apply_edit(
    lines: &[String],
    command: EditCommand,
    new_content: Option<&str>,
    indent: bool,
) -> Result<EditOutcome, String> {
    let new_lines = |reference: Option<&str>| -> Vec<String> {
        let raw: Vec<String> = new_content
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect();
        if indent {
            auto_indent(raw, reference)
        } else {
            raw
        }
    };

    let mut result = lines.to_vec();
    match command {
        EditCommand::Replace { start, end } => {
            check_range(start, end, lines.len())?;
            if new_content.is_none() {
                return Err("new_content is required for replace".to_string());
            }
            let added = new_lines(lines.get(start - 1).map(String::as_str));
            let removed: Vec<String> = result.splice(start - 1..end, added.clone()).collect();
            Ok(EditOutcome {
                lines: result,
                removed,
                added,
            })
        }
        EditCommand::Insert { after } => {
            if after > lines.len() {
                return Err(format!(
                    "insert_line {} exceeds file length ({} lines)",
                    after,
                    lines.len()
                ));
            }
            if new_content.is_none() {
                return Err("new_content is required for insert".to_string());
            }
            let reference = if after == 0 { lines.first() } else { lines.get(after - 1) };
            let added = new_lines(reference.map(String::as_str));
            result.splice(after..after, added.clone());
            Ok(EditOutcome {
                lines: result,
                removed: Vec::new(),
                added,
            })
        }
        EditCommand::Delete { start, end } => {
            check_range(start, end, lines.len())?;
            let removed: Vec<String> = result.drain(start - 1..end).collect();
            Ok(EditOutcome {
                lines: result,
                removed,
                added: Vec::new(),
            })
        }
    }
}

fn echo_block(label: &str, lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut block = format!("{}:\n", label);
    for line in lines.iter().take(MAX_ECHO_LINES) {
        block.push_str(&format!("  {}\n", line));
    }
    if lines.len() > MAX_ECHO_LINES {
        block.push_str(&format!("  ... ({} more lines)\n", lines.len() - MAX_ECHO_LINES));
    }
    block
}

pub struct EditLinesTool {
    sandbox: Arc<dyn SandboxEnvironment>,
    schema: InputSchema,
}

impl EditLinesTool {
    pub fn new(sandbox: Arc<dyn SandboxEnvironment>) -> Result<Self, ToolError> {
        let schema = InputSchema::new(json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "enum": ["replace", "insert", "delete"]},
                "path": {"type": "string", "pattern": "^/workspace/"},
                "start_line": {"type": "integer", "minimum": 1},
                "end_line": {"type": "integer", "minimum": 1},
                "insert_line": {"type": "integer", "minimum": 0},
                "new_content": {"type": "string"},
                "auto_indent": {"type": "boolean"}
            },
            "required": ["command", "path"],
            "additionalProperties": false,
            "allOf": [
                {
                    "if": {"properties": {"command": {"const": "replace"}}},
                    "then": {"required": ["start_line", "new_content"]}
                },
                {
                    "if": {"properties": {"command": {"const": "insert"}}},
                    "then": {"required": ["insert_line", "new_content"]}
                },
                {
                    "if": {"properties": {"command": {"const": "delete"}}},
                    "then": {"required": ["start_line"]}
                }
            ],
            "examples": [{
                "command": "replace",
                "path": "/workspace/main.py",
                "start_line": 3,
                "end_line": 4,
                "new_content": "def greet(name):\n    return f\"Hello, {name}\""
            }]
        }))?
        .with_workspace_paths(&["path"]);

        Ok(Self { sandbox, schema })
    }

    fn parse_command(args: &Map<String, Value>) -> Result<EditCommand, ToolError> {
        let command = str_arg(args, "command")?;
        let start = uint_arg(args, "start_line")?;
        let end = uint_arg(args, "end_line")?;
        let range = || -> Result<(usize, usize), ToolError> {
            let start = start.ok_or_else(|| {
                ToolError::InvalidArguments(format!("start_line is required for {}", command))
            })? as usize;
            Ok((start, end.map(|e| e as usize).unwrap_or(start)))
        };

        match command {
            "replace" => {
                let (start, end) = range()?;
                Ok(EditCommand::Replace { start, end })
            }
            "delete" => {
                let (start, end) = range()?;
                Ok(EditCommand::Delete { start, end })
            }
            "insert" => {
                let after = uint_arg(args, "insert_line")?.ok_or_else(|| {
                    ToolError::InvalidArguments("insert_line is required for insert".to_string())
                })?;
                Ok(EditCommand::Insert {
                    after: after as usize,
                })
            }
            other => Err(ToolError::InvalidArguments(format!(
                "Unknown command '{}'; use replace, insert or delete",
                other
            ))),
        }
    }
}

#[async_trait]
impl Tool for EditLinesTool {
    fn name(&self) -> &str {
        "edit_lines"
    }

    fn description(&self) -> &str {
        "Edit a file by line numbers: replace a line range, insert lines after a \
         given line (0 = top of file) or delete a line range. Line numbers are the \
         ones file_read shows; read the file first."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("command", ParamType::String, "replace, insert or delete"),
            ToolParameter::required("path", ParamType::String, "Absolute path under /workspace"),
            ToolParameter::optional("start_line", ParamType::Number, "First line of the range (1-based)"),
            ToolParameter::optional("end_line", ParamType::Number, "Last line of the range, inclusive (defaults to start_line)"),
            ToolParameter::optional("insert_line", ParamType::Number, "Insert after this line (0 = top)"),
            ToolParameter::optional("new_content", ParamType::String, "Replacement or inserted text"),
            ToolParameter::optional("auto_indent", ParamType::Boolean, "Indent new lines like the surrounding code")
                .with_default(json!(false)),
        ]
    }

    fn input_schema(&self) -> Option<&InputSchema> {
        Some(&self.schema)
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolResult, ToolError> {
        let path = str_arg(&args, "path")?;
        let command = Self::parse_command(&args)?;
        let new_content = args.get("new_content").and_then(Value::as_str);
        let indent = args
            .get("auto_indent")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let original = match self.sandbox.read_file(path).await {
            Ok(FileContent::Text(text)) => text,
            Ok(FileContent::Binary(file)) => {
                return Ok(ToolResult::failed(format!(
                    "Cannot edit binary file {} ({})",
                    path, file.mime_type
                )))
            }
            Err(SandboxError::NotFound(_)) => {
                return Ok(ToolResult::failed(format!(
                    "File not found or cannot be read: {}",
                    path
                )))
            }
            Err(e) => return Ok(ToolResult::failed(e.to_string())),
        };

        let lines: Vec<String> = original.lines().map(str::to_string).collect();
        let outcome = match apply_edit(&lines, command, new_content, indent) {
            Ok(outcome) => outcome,
            Err(message) => {
                return Ok(ToolResult::failed(message)
                    .with_metadata("path", path)
                    .with_metadata("lines_before", lines.len()))
            }
        };

        let updated = render_lines(&outcome.lines, &original);

        if !self.sandbox.write_file(path, updated.as_bytes()).await? {
            return Ok(ToolResult::failed(format!("Failed to write file: {}", path)));
        }

        let summary = match command {
            EditCommand::Replace { start, end } => {
                format!("Replaced lines {}-{} in {}", start, end, path)
            }
            EditCommand::Insert { after } => format!(
                "Inserted {} line(s) after line {} in {}",
                outcome.added.len(),
                after,
                path
            ),
            EditCommand::Delete { start, end } => {
                format!("Deleted lines {}-{} in {}", start, end, path)
            }
        };

        let output = format!(
            "{}\n{}{}",
            summary,
            echo_block("Removed", &outcome.removed),
            echo_block("Added", &outcome.added)
        );

        Ok(ToolResult::ok(output.trim_end())
            .with_metadata("path", path)
            .with_metadata("lines_before", lines.len())
            .with_metadata("lines_after", outcome.lines.len()))
    }
}
