//! The interface every agent action implements
//!
//! A tool declares its parameters, optionally a JSON Schema for its input,
//! and an async `execute`. [`Tool::validate_and_execute`] is the only entry
//! point the agent loop uses: it never returns an error, every failure is
//! folded into a [`ToolResult`].
//!
//! ```text
//! args ──► object? ──► defaults ──► schema? ──► workspace paths ──► execute
//!            │                        │               │               │
//!            ▼                        ▼               ▼               ▼
//!     validation error        validation error  validation error  ToolResult
//!                                                             (Err → "Tool execution error")
//! ```

use std::fmt;

use async_trait::async_trait;
use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::llm::{Tool as ModelTool, ToolFunction};
use crate::sandbox::SandboxError;
use crate::security::{validate_file_path, WORKSPACE_ROOT};

/// Errors a tool's `execute` may raise
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Execution(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Invalid input schema: {0}")]
    Schema(String),
}

/// Primitive type tag of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ToolParameter {
    pub fn required(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            description: description.to_string(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, param_type: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Model-facing description of one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolDefinition {
    /// Function-calling schema: object properties plus the required list
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut property = json!({
                "type": param.param_type.to_string(),
                "description": param.description,
            });
            if let Some(default) = &param.default {
                property["default"] = default.clone();
            }
            properties.insert(param.name.clone(), property);
        }

        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub fn to_model_tool(&self) -> ModelTool {
        ModelTool {
            tool_type: "function".to_string(),
            function: ToolFunction {
                name: self.name.clone(),
                description: self.description.clone(),
                parameters: self.parameters_schema(),
            },
        }
    }
}

/// Outcome of one tool call
///
/// Built only through the constructors, so a validation error is never
/// marked successful.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    success: bool,
    output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    metadata: Map<String, Value>,
    is_validation_error: bool,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            metadata: Map::new(),
            is_validation_error: false,
        }
    }

    /// Ran, but the underlying operation failed
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            metadata: Map::new(),
            is_validation_error: false,
        }
    }

    /// Bad parameters; the model should fix them and retry
    pub fn validation_failed(error: impl Into<String>) -> Self {
        Self {
            is_validation_error: true,
            ..Self::failed(error)
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn is_validation_error(&self) -> bool {
        self.is_validation_error
    }

    /// Text handed back to the model: output, then the error if any
    pub fn model_text(&self) -> String {
        match (&self.error, self.output.is_empty()) {
            (None, _) => self.output.clone(),
            (Some(error), true) => format!("Error: {}", error),
            (Some(error), false) => format!("{}\nError: {}", self.output, error),
        }
    }
}

/// One failing field and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Compiled JSON Schema (Draft 7) for a tool's input
pub struct InputSchema {
    raw: Value,
    compiled: JSONSchema,
    workspace_paths: Vec<String>,
}

impl fmt::Debug for InputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSchema")
            .field("raw", &self.raw)
            .field("workspace_paths", &self.workspace_paths)
            .finish()
    }
}

impl InputSchema {
    pub fn new(raw: Value) -> Result<Self, ToolError> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&raw)
            .map_err(|e| ToolError::Schema(e.to_string()))?;
        Ok(Self {
            raw,
            compiled,
            workspace_paths: Vec::new(),
        })
    }

    /// String fields that must name a path inside `/workspace`
    pub fn with_workspace_paths(mut self, fields: &[&str]) -> Self {
        self.workspace_paths = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Names listed under the schema's top-level `required`
    pub fn required(&self) -> Vec<String> {
        self.raw["required"]
            .as_array()
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First entry of `examples`, or `example`
    pub fn example(&self) -> Option<&Value> {
        self.raw["examples"]
            .as_array()
            .and_then(|examples| examples.first())
            .or_else(|| self.raw.get("example"))
    }

    pub fn validate(&self, args: &Value) -> Vec<FieldError> {
        let mut errors: Vec<FieldError> = match self.compiled.validate(args) {
            Ok(()) => Vec::new(),
            Err(iter) => iter
                .map(|e| {
                    let field = match &e.kind {
                        ValidationErrorKind::Required { property } => property
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| property.to_string()),
                        _ => {
                            let segments = e.instance_path.clone().into_vec();
                            if segments.is_empty() {
                                "(root)".to_string()
                            } else {
                                segments.join(".")
                            }
                        }
                    };
                    FieldError {
                        field,
                        message: e.to_string(),
                    }
                })
                .collect(),
        };

        for field in &self.workspace_paths {
            if let Some(path) = args.get(field).and_then(Value::as_str) {
                if !validate_file_path(path, WORKSPACE_ROOT) {
                    errors.push(FieldError {
                        field: field.clone(),
                        message: format!(
                            "invalid path '{}': must be an absolute path inside {}",
                            path, WORKSPACE_ROOT
                        ),
                    });
                }
            }
        }

        errors
    }
}

/// Opening words of every validation failure message
pub const VALIDATION_FAILED_PREFIX: &str = "Parameter validation failed";

/// The message the model reads to correct its own call
pub fn format_validation_error(
    tool_name: &str,
    errors: &[FieldError],
    schema: Option<&InputSchema>,
) -> String {
    let mut message = format!("{} for '{}':\n", VALIDATION_FAILED_PREFIX, tool_name);
    for error in errors {
        message.push_str(&format!("  - {}: {}\n", error.field, error.message));
    }

    if let Some(schema) = schema {
        if let Some(example) = schema.example() {
            let pretty = serde_json::to_string_pretty(example).unwrap_or_else(|_| example.to_string());
            message.push_str(&format!("\nExample valid call:\n{}\n", pretty));
        }
        let required = schema.required();
        if !required.is_empty() {
            message.push_str(&format!("\nRequired parameters: {}\n", required.join(", ")));
        }
    }

    message.push_str("\nPlease check the parameters and try again.");
    message
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Ordered parameter declarations
    fn parameters(&self) -> Vec<ToolParameter>;

    /// Structured input schema; without one arguments go straight to `execute`
    fn input_schema(&self) -> Option<&InputSchema> {
        None
    }

    /// Override to customise what the model sees on bad parameters
    fn format_validation_error(&self, errors: &[FieldError]) -> String {
        format_validation_error(self.name(), errors, self.input_schema())
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolResult, ToolError>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }

    /// Validate (when a schema is declared), then execute.
    ///
    /// Never fails: raised errors become `"Tool execution error: ..."`.
    async fn validate_and_execute(&self, args: Value) -> ToolResult {
        let mut args = match args {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let errors = [FieldError {
                    field: "(root)".to_string(),
                    message: format!("arguments must be a JSON object, got {}", other),
                }];
                return ToolResult::validation_failed(self.format_validation_error(&errors));
            }
        };

        for param in self.parameters() {
            if let Some(default) = param.default {
                args.entry(param.name).or_insert(default);
            }
        }

        if let Some(schema) = self.input_schema() {
            let errors = schema.validate(&Value::Object(args.clone()));
            if !errors.is_empty() {
                return ToolResult::validation_failed(self.format_validation_error(&errors));
            }
        }

        match self.execute(args).await {
            Ok(result) => result,
            Err(e) => ToolResult::failed(format!("Tool execution error: {}", e)),
        }
    }
}

/// Read a string argument
pub fn str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("'{}' must be a string", name)))
}

/// Read an optional non-negative integer argument (accepts integral floats)
pub fn uint_arg(args: &Map<String, Value>, name: &str) -> Result<Option<u64>, ToolError> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .or_else(|| {
                value
                    .as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| f as u64)
            })
            .map(Some)
            .ok_or_else(|| {
                ToolError::InvalidArguments(format!("'{}' must be a non-negative integer", name))
            }),
    }
}
