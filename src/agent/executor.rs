//! The ReAct loop
//!
//! One [`AgentExecutor::run`] call drives one run: model turn, optional tool
//! call, observation, repeat. Everything it produces is an [`AgentEvent`];
//! tool and validation failures are fed back to the model and never end the
//! run. Only a failing model stream does.
//!
//! ```text
//!            ┌──────────────────────── RUNNING ◄─────────────────────────┐
//!            │                            │                              │
//!            ▼                            ▼                              │
//!     STREAMING_TEXT ◄──────────► STREAMING_TOOL_CALL                    │
//!            │                            │                              │
//!            ▼                            ▼                              │
//!     EMITTING_FINAL               EXECUTING_TOOL ───────────────────────┘
//!            │
//!            ▼
//!     TERMINATED (completed | error | cancelled | max_iterations)
//! ```
//!
//! Cancellation is cooperative: the token is checked before each model call,
//! before each chunk is processed and before a tool runs. A tool that has
//! started always finishes.

use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use futures_util::{Stream, StreamExt};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use super::assembly::{ToolCallAccumulator, ToolCallState, ToolCallStatus};
use super::events::{AgentEvent, AgentResponse, ResponseCollector, CANCELLED_MESSAGE};
use super::policy::{
    check_read_before_edit, ReadLedger, ToolCallHistory, LOOP_DETECTED_HINT,
    VALIDATION_EXHAUSTED_HINT,
};
use super::prompt::{render_system_instructions, DEFAULT_SYSTEM_INSTRUCTIONS};
use crate::config::AgentConfig;
use crate::llm::{ChatMessage, ChatRequest, ModelBackend, ModelDelta, Tool as ModelTool, ToolCall};
use crate::metrics::{
    AGENT_ITERATIONS, AGENT_RUNS, EDIT_PRECONDITION_REJECTIONS, LLM_CALL_DURATION,
    LOOP_DETECTIONS, TOOL_CALLS, TOOL_VALIDATION_FAILURES,
};
use crate::tools::{format_validation_error, FieldError, ToolRegistry};

/// `[SUCCESS]`/`[FAILED]` framing of a tool result in the conversation
pub fn frame_tool_result(tool: &str, success: bool, content: &str) -> String {
    format!(
        "[{}] Tool '{}' result:\n{}",
        if success { "SUCCESS" } else { "FAILED" },
        tool,
        content
    )
}

/// Parse streamed argument text; empty text means no arguments
fn parse_arguments(raw: &str) -> Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(raw).map_err(|e| format!("arguments are not valid JSON: {}", e))
}

fn cancelled() -> AgentEvent {
    AgentEvent::Cancelled {
        content: CANCELLED_MESSAGE.to_string(),
    }
}

/// Runs the ReAct loop against a model backend and a tool registry
///
/// Cheap to clone; each run owns its own history and counters, so one
/// executor can serve many concurrent runs.
#[derive(Clone)]
pub struct AgentExecutor {
    backend: Arc<dyn ModelBackend>,
    tools: ToolRegistry,
    config: AgentConfig,
}

impl AgentExecutor {
    pub fn new(backend: Arc<dyn ModelBackend>, tools: ToolRegistry, config: AgentConfig) -> Self {
        Self {
            backend,
            tools,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// System instructions with the tool list filled in
    pub fn system_message(&self) -> String {
        let template = self
            .config
            .system_instructions
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_INSTRUCTIONS);
        render_system_instructions(template, &self.tools)
    }

    /// Start a run; nothing happens until the stream is polled.
    ///
    /// `history` is the prior conversation (system messages in it are
    /// replaced by this executor's instructions). The last event is always
    /// `final_answer`, `error` or `cancelled`.
    pub fn run(
        &self,
        prompt: &str,
        history: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = AgentEvent> + Send + 'static {
        let mut run = Run::start(self.clone(), prompt, history);

        stream! {
            let max_iterations = run.executor.config.max_iterations;

            while run.iterations < max_iterations {
                if cancel.is_cancelled() {
                    run.finish("cancelled");
                    yield cancelled();
                    return;
                }

                run.iterations += 1;
                let llm_span = info_span!(
                    parent: &run.span,
                    "llm_call",
                    iteration = run.iterations,
                    otel.name = "llm_call"
                );
                let started = Instant::now();

                let opened = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    opened = run.executor.backend.stream_chat(run.request()).instrument(llm_span) => Some(opened),
                };
                let mut deltas = match opened {
                    None => {
                        run.finish("cancelled");
                        yield cancelled();
                        return;
                    }
                    Some(Err(e)) => {
                        warn!(parent: &run.span, error = %e, "Model call failed");
                        run.finish("error");
                        yield AgentEvent::Error { content: e.to_string() };
                        return;
                    }
                    Some(Ok(deltas)) => deltas,
                };

                let mut text = String::new();
                let mut calls = ToolCallAccumulator::new(run.steps + 1);

                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        next = deltas.next() => Some(next),
                    };
                    let delta = match next {
                        _ if cancel.is_cancelled() => {
                            run.finish("cancelled");
                            yield cancelled();
                            return;
                        }
                        None | Some(None) => break,
                        Some(Some(Err(e))) => {
                            warn!(parent: &run.span, error = %e, "Model stream failed");
                            run.finish("error");
                            yield AgentEvent::Error { content: e.to_string() };
                            return;
                        }
                        Some(Some(Ok(delta))) => delta,
                    };

                    match delta {
                        ModelDelta::Text(content) => {
                            if content.is_empty() {
                                continue;
                            }
                            text.push_str(&content);
                            yield AgentEvent::Chunk { content };
                        }
                        ModelDelta::ToolCall { index, name, arguments } => {
                            let streaming = calls
                                .push(index, name.as_deref(), &arguments)
                                .map(|state| AgentEvent::ActionStreaming {
                                    tool: state.name.clone(),
                                    arguments: state.arguments.clone(),
                                    step: state.step,
                                });
                            if let Some(event) = streaming {
                                yield event;
                            }
                        }
                    }
                }

                LLM_CALL_DURATION
                    .with_label_values(&[&run.executor.config.model])
                    .observe(started.elapsed().as_secs_f64());

                if calls.len() > 1 {
                    debug!(parent: &run.span, started = calls.len(), "Model started several tool calls, running the first");
                }

                let mut call = match calls.into_promoted() {
                    Some(call) => call,
                    None => {
                        run.finish("completed");
                        yield AgentEvent::FinalAnswer { content: text, completed: true };
                        return;
                    }
                };

                if cancel.is_cancelled() {
                    run.finish("cancelled");
                    yield cancelled();
                    return;
                }

                call.status = ToolCallStatus::Running;
                match run.handle_call(call, text).await {
                    CallOutcome::Corrected => {}
                    CallOutcome::Executed { action, observation } => {
                        yield action;
                        yield observation;
                    }
                }
            }

            run.finish("max_iterations");
            yield AgentEvent::FinalAnswer {
                content: format!(
                    "Reached maximum iterations ({}) without a final answer.",
                    max_iterations
                ),
                completed: false,
            };
        }
    }

    /// Drive a run to its end and fold it into an [`AgentResponse`]
    pub async fn run_to_completion(
        &self,
        prompt: &str,
        history: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> AgentResponse {
        let mut collector = ResponseCollector::new();
        let events = self.run(prompt, history, cancel);
        futures_util::pin_mut!(events);
        while let Some(event) = events.next().await {
            collector.push(&event);
        }
        collector.finish()
    }
}

enum CallOutcome {
    /// Nothing was executed; a corrective message went into the history
    Corrected,
    Executed {
        action: AgentEvent,
        observation: AgentEvent,
    },
}

/// Per-run state; never shared between runs
struct Run {
    executor: AgentExecutor,
    span: Span,
    messages: Vec<ChatMessage>,
    model_tools: Vec<ModelTool>,
    call_history: ToolCallHistory,
    reads: ReadLedger,
    validation_retries: usize,
    steps: usize,
    iterations: usize,
}

impl Run {
    fn start(executor: AgentExecutor, prompt: &str, history: Vec<ChatMessage>) -> Self {
        let run_id = Uuid::now_v7();
        let span = info_span!(
            "agent_run",
            run_id = %run_id,
            model = %executor.config.model,
            otel.name = "agent_run"
        );
        info!(parent: &span, run_id = %run_id, history = history.len(), "Starting agent run");

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(executor.system_message()));
        messages.extend(history.into_iter().filter(|m| !m.is_role("system")));
        let reads = ReadLedger::from_history(&messages, &executor.config.read_tools);
        messages.push(ChatMessage::user(prompt));

        let model_tools = executor.tools.to_model_tools();

        Self {
            executor,
            span,
            messages,
            model_tools,
            call_history: ToolCallHistory::new(),
            reads,
            validation_retries: 0,
            steps: 0,
            iterations: 0,
        }
    }

    fn request(&self) -> ChatRequest {
        ChatRequest {
            model: self.executor.config.model.clone(),
            messages: self.messages.clone(),
            tools: self.model_tools.clone(),
            temperature: self.executor.config.temperature,
        }
    }

    fn finish(&self, outcome: &str) {
        AGENT_RUNS.with_label_values(&[outcome]).inc();
        AGENT_ITERATIONS.observe(self.iterations as f64);
        info!(
            parent: &self.span,
            outcome,
            iterations = self.iterations,
            steps = self.steps,
            "Agent run finished"
        );
    }

    /// The assistant's call and its result, as two history messages
    ///
    /// The chat API only accepts object arguments, so anything else is
    /// recorded as `{}`.
    fn push_exchange(&mut self, tool: &str, arguments: Value, text: String, success: bool, content: &str) {
        let arguments = match arguments {
            Value::Object(_) => arguments,
            _ => Value::Object(Map::new()),
        };
        self.messages
            .push(ChatMessage::assistant_tool_call(text, ToolCall::new(tool, arguments)));
        self.messages
            .push(ChatMessage::tool_result(tool, frame_tool_result(tool, success, content)));
    }

    fn validation_failed(&mut self, tool: &str, arguments: Value, text: String, error: &str) {
        TOOL_VALIDATION_FAILURES.with_label_values(&[tool]).inc();
        debug!(parent: &self.span, tool, retries = self.validation_retries + 1, "Tool call failed validation");
        self.push_exchange(tool, arguments, text, false, error);

        self.validation_retries += 1;
        if self.validation_retries > self.executor.config.max_validation_retries {
            warn!(parent: &self.span, tool, "Validation retries exhausted");
            self.messages.push(ChatMessage::user(VALIDATION_EXHAUSTED_HINT));
            self.validation_retries = 0;
        }
    }

    async fn handle_call(&mut self, mut call: ToolCallState, text: String) -> CallOutcome {
        let tool = std::mem::take(&mut call.name);

        let arguments = match parse_arguments(&call.arguments) {
            Ok(arguments) => arguments,
            Err(message) => {
                let errors = [FieldError {
                    field: "(root)".to_string(),
                    message: format!("{}; received {:?}", message, call.arguments),
                }];
                let error = format_validation_error(&tool, &errors, None);
                self.validation_failed(&tool, Value::Object(Map::new()), text, &error);
                return CallOutcome::Corrected;
            }
        };

        let config = &self.executor.config;
        if let Some(message) = check_read_before_edit(
            &tool,
            &arguments,
            &self.reads,
            &config.edit_tools,
            &config.read_tools,
        ) {
            EDIT_PRECONDITION_REJECTIONS.inc();
            info!(parent: &self.span, tool = %tool, "Edit rejected, file not read first");
            self.push_exchange(&tool, arguments, text, false, &message);
            return CallOutcome::Corrected;
        }

        let tool_span = info_span!(
            parent: &self.span,
            "tool_call",
            tool = %tool,
            step = call.step,
            otel.name = "tool_call"
        );
        let started = Instant::now();
        let result = self
            .executor
            .tools
            .execute(&tool, arguments.clone())
            .instrument(tool_span)
            .await;
        call.status = ToolCallStatus::Done;

        if result.is_validation_error() {
            let error = result.error().unwrap_or_default().to_string();
            self.validation_failed(&tool, arguments, text, &error);
            return CallOutcome::Corrected;
        }

        self.reads
            .observe(&tool, &arguments, &self.executor.config.read_tools);

        self.steps += 1;
        let step = self.steps;
        let status = if result.success() { "success" } else { "failure" };
        TOOL_CALLS.with_label_values(&[&tool, status]).inc();
        debug!(
            parent: &self.span,
            tool = %tool,
            step,
            status,
            call_status = ?call.status,
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Tool call finished"
        );

        self.push_exchange(&tool, arguments.clone(), text, result.success(), &result.model_text());
        self.call_history.record(&tool, &arguments, result.success());

        if self.call_history.is_looping(self.executor.config.max_same_tool_retries) {
            LOOP_DETECTIONS.inc();
            warn!(parent: &self.span, tool = %tool, "Repeated failing tool call, asking for a new approach");
            self.messages.push(ChatMessage::user(LOOP_DETECTED_HINT));
            self.call_history.clear();
        }

        CallOutcome::Executed {
            action: AgentEvent::Action {
                tool: tool.clone(),
                input: arguments,
                step,
            },
            observation: AgentEvent::Observation {
                tool,
                output: result.output().to_string(),
                success: result.success(),
                error: result.error().map(str::to_string),
                metadata: result.metadata().clone(),
                step,
            },
        }
    }
}
