//! Language-model integration
//!
//! The agent loop talks to any [`ModelBackend`]; [`OllamaBackend`] streams
//! from Ollama's `/api/chat`.

pub mod backend;
pub mod message;
pub mod ollama;

pub use backend::{BackendError, ChatRequest, ModelBackend, ModelDelta, ModelStream};
pub use message::{ChatMessage, FunctionCall, Tool, ToolCall, ToolFunction};
pub use ollama::{parse_chat_line, OllamaBackend, DEFAULT_OLLAMA_URL};
