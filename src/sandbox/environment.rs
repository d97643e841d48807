//! The primitives every sandbox backend exposes to the tool layer
//!
//! Tools never touch the host directly; they go through
//! [`SandboxEnvironment`], and every implementation applies the security
//! policy at this boundary.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::security::SecurityError;

/// Errors surfaced by sandbox operations
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("Invalid conversation id: {0}")]
    InvalidConversationId(String),

    #[error("Unknown environment type: {0}")]
    UnknownEnvironment(String),

    #[error("Failed to provision sandbox: {0}")]
    Provision(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Failed to read file {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Liveness of a sandbox environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Running,
    Stopped,
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxStatus::Running => write!(f, "running"),
            SandboxStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Result of one command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecOutput {
    /// The shape every execution-layer failure is reported with
    pub fn execution_error(reason: impl fmt::Display) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: format!("Execution error: {}", reason),
            timed_out: false,
        }
    }

    pub fn timed_out(timeout: Duration, stdout: String) -> Self {
        Self {
            exit_code: 124,
            stdout,
            stderr: format!("Command timed out after {}s", timeout.as_secs()),
            timed_out: true,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Descriptor for non-text file content
///
/// Raw bytes are never embedded, except for a bounded data-URL preview of
/// images so they can be displayed directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinaryFile {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl BinaryFile {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// What `read_file` hands back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(BinaryFile),
}

impl FileContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FileContent::Text(text) => Some(text),
            FileContent::Binary(_) => None,
        }
    }
}

/// One isolated, resource-bounded execution context bound to a conversation
#[async_trait]
pub trait SandboxEnvironment: Send + Sync {
    /// Environment identifier (embeds the conversation id)
    fn id(&self) -> &str;

    fn conversation_id(&self) -> &str;

    /// Host directory mounted as `/workspace` inside the sandbox
    fn workspace_path(&self) -> &Path;

    /// Short backend label for logs and metrics ("local", "container")
    fn backend(&self) -> &'static str;

    /// Run a shell command.
    ///
    /// `Err` only for security rejections. Execution-layer failures come back
    /// as `Ok` with exit code 1 and an "Execution error: ..." stderr; a
    /// timeout comes back as a non-zero exit with `timed_out` set.
    async fn execute(
        &self,
        command: &str,
        workdir: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecOutput, SandboxError>;

    /// Read a file addressed by its in-sandbox path
    async fn read_file(&self, path: &str) -> Result<FileContent, SandboxError>;

    /// Write a file, creating parent directories.
    ///
    /// `Err` for paths outside the workspace, `Ok(false)` on I/O failure.
    async fn write_file(&self, path: &str, content: &[u8]) -> Result<bool, SandboxError>;

    /// Liveness check. Any failure to check reads as "not running".
    async fn is_running(&self) -> bool;

    /// Best-effort stop; never fails
    async fn stop(&self);

    /// Best-effort removal of runtime resources; never fails
    async fn remove(&self);

    async fn status(&self) -> SandboxStatus {
        if self.is_running().await {
            SandboxStatus::Running
        } else {
            SandboxStatus::Stopped
        }
    }
}
