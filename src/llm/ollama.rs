//! Ollama `/api/chat` backend with streaming tool calls
//!
//! Ollama streams newline-delimited JSON objects. Each one carries a
//! `message` with a content fragment and, once the model decides to call a
//! tool, complete `tool_calls` entries. Network chunks do not line up with
//! JSON lines, so bytes are buffered until a newline arrives.

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::stream::StreamExt;
use serde_json::Value;
use tracing::debug;

use super::backend::{BackendError, ChatRequest, ModelBackend, ModelDelta, ModelStream};

/// Default Ollama server address
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Upper bound for one unterminated NDJSON line
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Client for Ollama's /api/chat endpoint
#[derive(Clone)]
pub struct OllamaBackend {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new backend
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Ollama server (e.g., "http://localhost:11434")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn request_body(request: &ChatRequest) -> Result<Value, BackendError> {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "stream": true,
            "options": {
                "temperature": request.temperature
            }
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::to_value(&request.tools)?;
        }
        Ok(body)
    }
}

/// Parsed content of one NDJSON line
#[derive(Debug, Default, PartialEq)]
pub struct ChatLine {
    pub deltas: Vec<ModelDelta>,
    pub done: bool,
}

/// Turn one line of the `/api/chat` stream into deltas
pub fn parse_chat_line(line: &str) -> Result<ChatLine, BackendError> {
    let data: Value = serde_json::from_str(line)?;

    if let Some(error) = data.get("error").and_then(Value::as_str) {
        return Err(BackendError::Stream(error.to_string()));
    }

    let mut parsed = ChatLine {
        deltas: Vec::new(),
        done: data["done"].as_bool() == Some(true),
    };

    let message = &data["message"];
    if let Some(content) = message["content"].as_str() {
        if !content.is_empty() {
            parsed.deltas.push(ModelDelta::text(content));
        }
    }

    if let Some(calls) = message["tool_calls"].as_array() {
        for (position, call) in calls.iter().enumerate() {
            let function = &call["function"];
            let index = function["index"]
                .as_u64()
                .map(|i| i as usize)
                .unwrap_or(position);
            let arguments = match &function["arguments"] {
                Value::String(raw) => raw.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            parsed.deltas.push(ModelDelta::tool_call(
                index,
                function["name"].as_str(),
                arguments,
            ));
        }
    }

    Ok(parsed)
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ModelStream, BackendError> {
        let endpoint = format!("{}/api/chat", self.base_url);
        let body = Self::request_body(&request)?;

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending chat request"
        );

        let response = self.client.post(&endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let mut bytes_stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        let stream = try_stream! {
            'outer: while let Some(chunk) = bytes_stream.next().await {
                buffer.extend_from_slice(&chunk?);

                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    let parsed = parse_chat_line(line)?;
                    for delta in parsed.deltas {
                        yield delta;
                    }
                    if parsed.done {
                        break 'outer;
                    }
                }

                if buffer.len() > MAX_LINE_BYTES {
                    Err::<(), _>(BackendError::Stream("response line exceeded 1 MiB".to_string()))?;
                }
            }

            let rest = String::from_utf8_lossy(&buffer).trim().to_string();
            if !rest.is_empty() {
                for delta in parse_chat_line(&rest)?.deltas {
                    yield delta;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
