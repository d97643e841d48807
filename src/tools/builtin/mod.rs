//! Tools shipped with the agent
//!
//! Every tool except `think` acts on a single [`SandboxEnvironment`].

mod bash;
mod edit;
mod files;
mod search;
mod think;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::sandbox::SandboxEnvironment;
use crate::tools::{Tool, ToolError, ToolRegistry};

pub use bash::{format_output, BashTool};
pub use edit::{apply_edit, EditCommand, EditLinesTool, EditOutcome};
pub use files::{number_lines, FileReadTool, FileWriteTool};
pub use search::{shell_quote, SearchMode, SearchTool};
pub use think::ThinkTool;

/// Names of every built-in tool, in registration order
pub const BUILTIN_TOOLS: &[&str] = &["bash", "file_read", "file_write", "edit_lines", "search", "think"];

fn build(
    name: &str,
    sandbox: &Arc<dyn SandboxEnvironment>,
    default_timeout: Duration,
) -> Result<Option<Arc<dyn Tool>>, ToolError> {
    let tool: Arc<dyn Tool> = match name {
        "bash" => Arc::new(BashTool::new(sandbox.clone(), default_timeout)?),
        "file_read" => Arc::new(FileReadTool::new(sandbox.clone())?),
        "file_write" => Arc::new(FileWriteTool::new(sandbox.clone())?),
        "edit_lines" => Arc::new(EditLinesTool::new(sandbox.clone())?),
        "search" => Arc::new(SearchTool::new(sandbox.clone())?),
        "think" => Arc::new(ThinkTool),
        _ => return Ok(None),
    };
    Ok(Some(tool))
}

/// Registry of built-in tools bound to `sandbox`
///
/// `enabled` restricts (and orders) the set; unknown names are skipped
/// with a warning. `None` registers everything.
pub fn registry_for(
    sandbox: Arc<dyn SandboxEnvironment>,
    enabled: Option<&[String]>,
    default_timeout: Duration,
) -> Result<ToolRegistry, ToolError> {
    let names: Vec<&str> = match enabled {
        Some(names) => names.iter().map(String::as_str).collect(),
        None => BUILTIN_TOOLS.to_vec(),
    };

    let mut registry = ToolRegistry::new();
    for name in names {
        match build(name, &sandbox, default_timeout)? {
            Some(tool) => {
                registry.register(tool);
            }
            None => warn!(tool = name, "Unknown tool name in configuration, skipping"),
        }
    }
    Ok(registry)
}
