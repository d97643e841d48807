//! Tool contract, registry and the built-in tool set

pub mod builtin;
pub mod contract;
pub mod registry;

pub use builtin::{registry_for, BUILTIN_TOOLS};
pub use contract::{
    format_validation_error, str_arg, uint_arg, FieldError, InputSchema, ParamType, Tool,
    ToolDefinition, ToolError, ToolParameter, ToolResult, VALIDATION_FAILED_PREFIX,
};
pub use registry::{ToolRegistry, UNKNOWN_TOOL_PREFIX};
