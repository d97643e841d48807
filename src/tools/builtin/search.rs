//! `search`: find files by name or by content
//!
//! Both modes shell out to `find`/`grep` inside the sandbox with the search
//! directory as the working directory, so they behave the same on the host
//! and in a container.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::sandbox::{SandboxEnvironment, SandboxError};
use crate::security::WORKSPACE_ROOT;
use crate::tools::contract::{
    str_arg, uint_arg, InputSchema, ParamType, Tool, ToolError, ToolParameter, ToolResult,
};

const DEFAULT_MAX_RESULTS: u64 = 50;
const CONTEXT_LINES: usize = 3;
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

lazy_static! {
    static ref FILENAME_QUERY: Regex =
        Regex::new(r"^[\w\-.*?]+\.\w+$").expect("filename pattern is valid");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Text,
    Filename,
}

impl SearchMode {
    /// Globs and `name.ext` shapes are filename searches, everything else is text
    pub fn detect(query: &str) -> Self {
        if query.contains('*') || FILENAME_QUERY.is_match(query) {
            SearchMode::Filename
        } else {
            SearchMode::Text
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            SearchMode::Text => "text",
            SearchMode::Filename => "filename",
        }
    }
}

/// Single-quote a string for `/bin/sh`
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `./src/a.py` found under `/workspace/proj` becomes `/workspace/proj/src/a.py`
fn display_path(base: &str, found: &str) -> String {
    let relative = found.trim_start_matches("./");
    format!("{}/{}", base.trim_end_matches('/'), relative)
}

fn non_empty_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

pub struct SearchTool {
    sandbox: Arc<dyn SandboxEnvironment>,
    schema: InputSchema,
}

impl SearchTool {
    pub fn new(sandbox: Arc<dyn SandboxEnvironment>) -> Result<Self, ToolError> {
        let schema = InputSchema::new(json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "minLength": 1},
                "mode": {"type": "string", "enum": ["auto", "text", "filename"]},
                "path": {"type": "string", "pattern": "^/workspace(/|$)"},
                "file_pattern": {"type": "string"},
                "max_results": {"type": "integer", "minimum": 1, "maximum": 500}
            },
            "required": ["query"],
            "additionalProperties": false,
            "examples": [{"query": "def main", "path": "/workspace", "file_pattern": "*.py"}]
        }))?
        .with_workspace_paths(&["path"]);

        Ok(Self { sandbox, schema })
    }

    async fn run(&self, command: &str, workdir: &str) -> Result<String, ToolError> {
        match self.sandbox.execute(command, Some(workdir), SEARCH_TIMEOUT).await {
            Ok(output) if output.timed_out => Err(ToolError::Execution(
                "Search failed: timed out".to_string(),
            )),
            // grep exits 1 when nothing matched
            Ok(output) if output.exit_code <= 1 => Ok(output.stdout),
            Ok(output) => Err(ToolError::Execution(format!(
                "Search failed: {}",
                output.stderr.trim()
            ))),
            Err(SandboxError::Security(e)) => {
                Err(ToolError::Execution(format!("Search failed: {}", e)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn by_filename(&self, query: &str, path: &str, limit: usize) -> Result<ToolResult, ToolError> {
        let stdout = self
            .run(
                &format!("find . -type f -name {} 2>/dev/null", shell_quote(query)),
                path,
            )
            .await?;

        let mut files: Vec<String> = non_empty_lines(&stdout)
            .map(|f| display_path(path, f))
            .collect();
        files.sort();
        files.truncate(limit);

        if files.is_empty() {
            return Ok(ToolResult::ok(format!("No files found matching: {}", query)));
        }

        let mut output = format!("Found {} file(s) matching '{}':\n", files.len(), query);
        for file in &files {
            output.push_str(&format!("  - {}\n", file));
        }
        Ok(ToolResult::ok(output.trim_end()).with_metadata("matches", files.len()))
    }

    async fn by_text(
        &self,
        query: &str,
        path: &str,
        file_pattern: Option<&str>,
        limit: usize,
    ) -> Result<ToolResult, ToolError> {
        let include = file_pattern
            .map(|p| format!(" --include={}", shell_quote(p)))
            .unwrap_or_default();
        let stdout = self
            .run(
                &format!("grep -rlF{} -- {} . 2>/dev/null", include, shell_quote(query)),
                path,
            )
            .await?;

        let mut files: Vec<&str> = non_empty_lines(&stdout).collect();
        files.sort_unstable();
        files.truncate(limit);

        if files.is_empty() {
            return Ok(ToolResult::ok(format!("No files found containing: {}", query)));
        }

        let mut output = format!("Found '{}' in {} file(s):\n", query, files.len());
        for file in &files {
            output.push_str(&format!("\n{}:\n", display_path(path, file)));
            let context = self
                .run(
                    &format!(
                        "grep -nF -m {} -- {} {} 2>/dev/null",
                        CONTEXT_LINES,
                        shell_quote(query),
                        shell_quote(file)
                    ),
                    path,
                )
                .await
                .unwrap_or_default();
            for line in non_empty_lines(&context).take(CONTEXT_LINES) {
                output.push_str(&format!("  {}\n", line));
            }
        }
        Ok(ToolResult::ok(output.trim_end()).with_metadata("matches", files.len()))
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the workspace. Text mode lists files containing the query with \
         matching lines; filename mode finds files by name or glob (e.g. *.py). \
         Mode 'auto' picks filename mode for globs and names like main.py."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("query", ParamType::String, "Text, file name or glob to search for"),
            ToolParameter::optional("mode", ParamType::String, "auto, text or filename")
                .with_default(json!("auto")),
            ToolParameter::optional("path", ParamType::String, "Directory to search")
                .with_default(json!(WORKSPACE_ROOT)),
            ToolParameter::optional("file_pattern", ParamType::String, "Only search files matching this glob (text mode)"),
            ToolParameter::optional("max_results", ParamType::Number, "Maximum number of files to list")
                .with_default(json!(DEFAULT_MAX_RESULTS)),
        ]
    }

    fn input_schema(&self) -> Option<&InputSchema> {
        Some(&self.schema)
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolResult, ToolError> {
        let query = str_arg(&args, "query")?;
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or(WORKSPACE_ROOT);
        let file_pattern = args.get("file_pattern").and_then(Value::as_str);
        let limit = uint_arg(&args, "max_results")?.unwrap_or(DEFAULT_MAX_RESULTS) as usize;

        let mode = match args.get("mode").and_then(Value::as_str).unwrap_or("auto") {
            "text" => SearchMode::Text,
            "filename" => SearchMode::Filename,
            _ => SearchMode::detect(query),
        };

        let result = match mode {
            SearchMode::Filename => self.by_filename(query, path, limit).await,
            SearchMode::Text => self.by_text(query, path, file_pattern, limit).await,
        };

        let result = match result {
            Ok(result) => result,
            Err(ToolError::Execution(message)) => ToolResult::failed(message),
            Err(e) => return Err(e),
        };

        Ok(result
            .with_metadata("query", query)
            .with_metadata("mode", mode.as_str()))
    }
}
