//! The streaming model interface the agent loop consumes

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::Stream;
use thiserror::Error;

use super::message::{ChatMessage, Tool};

/// One increment of a streamed model turn.
///
/// Either a plain text fragment or a fragment of a tool call. Tool-call
/// fragments are keyed by `index`; the name usually arrives once and the
/// arguments text may arrive in several pieces.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelDelta {
    Text(String),
    ToolCall {
        index: usize,
        name: Option<String>,
        arguments: String,
    },
}

impl ModelDelta {
    pub fn text(content: impl Into<String>) -> Self {
        ModelDelta::Text(content.into())
    }

    pub fn tool_call(index: usize, name: Option<&str>, arguments: impl Into<String>) -> Self {
        ModelDelta::ToolCall {
            index,
            name: name.map(str::to_string),
            arguments: arguments.into(),
        }
    }
}

/// Errors from the model backend; any of them ends the run
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Model backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Model stream failed: {0}")]
    Stream(String),
}

/// `Pin<Box<dyn Stream>>` so backends can hand back any stream type
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelDelta, BackendError>> + Send>>;

/// Everything sent to the model for one turn
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<Tool>,
    pub temperature: f32,
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Short label for logs
    fn name(&self) -> &str;

    /// Start one streamed turn
    async fn stream_chat(&self, request: ChatRequest) -> Result<ModelStream, BackendError>;
}
