//! What a run emits, and the summary folded from it

use serde::Serialize;
use serde_json::{Map, Value};

/// Content of the `cancelled` event
pub const CANCELLED_MESSAGE: &str = "Execution cancelled by user";

/// One event of a run's output stream
///
/// `FinalAnswer`, `Error` and `Cancelled` are terminal: exactly one of them
/// closes every run and nothing follows it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Streamed model text
    Chunk { content: String },

    /// Arguments of the tracked tool call so far
    ActionStreaming {
        tool: String,
        arguments: String,
        step: usize,
    },

    /// A tool call that passed validation and ran
    Action {
        tool: String,
        input: Value,
        step: usize,
    },

    Observation {
        tool: String,
        output: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        metadata: Map<String, Value>,
        step: usize,
    },

    /// `completed` is false when the answer is the iteration-limit notice
    FinalAnswer { content: String, completed: bool },

    Error { content: String },

    Cancelled { content: String },
}

impl AgentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::FinalAnswer { .. } | AgentEvent::Error { .. } | AgentEvent::Cancelled { .. }
        )
    }

    /// Wire name of the variant (`chunk`, `action`, ...)
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Chunk { .. } => "chunk",
            AgentEvent::ActionStreaming { .. } => "action_streaming",
            AgentEvent::Action { .. } => "action",
            AgentEvent::Observation { .. } => "observation",
            AgentEvent::FinalAnswer { .. } => "final_answer",
            AgentEvent::Error { .. } => "error",
            AgentEvent::Cancelled { .. } => "cancelled",
        }
    }
}

/// One completed iteration that ran a tool
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentStep {
    pub thought: Option<String>,
    pub action: Option<String>,
    pub action_input: Option<Value>,
    pub observation: Option<String>,
    pub step_number: usize,
}

/// Terminal summary of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentResponse {
    pub final_answer: Option<String>,
    pub steps: Vec<AgentStep>,
    pub completed: bool,
    pub cancelled: bool,
    pub error: Option<String>,
}

/// Folds an event stream into an [`AgentResponse`]
///
/// Text streamed in a turn that ends in an action becomes that step's
/// thought.
#[derive(Debug, Default)]
pub struct ResponseCollector {
    response: AgentResponse,
    text: String,
    pending: Option<AgentStep>,
}

impl ResponseCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::Chunk { content } => self.text.push_str(content),
            AgentEvent::ActionStreaming { .. } => {}
            AgentEvent::Action { tool, input, step } => {
                self.flush_pending();
                let thought = std::mem::take(&mut self.text);
                let thought = thought.trim();
                self.pending = Some(AgentStep {
                    thought: (!thought.is_empty()).then(|| thought.to_string()),
                    action: Some(tool.clone()),
                    action_input: Some(input.clone()),
                    observation: None,
                    step_number: *step,
                });
            }
            AgentEvent::Observation { output, error, .. } => {
                let observation = match error {
                    Some(error) if output.is_empty() => format!("Error: {}", error),
                    Some(error) => format!("{}\nError: {}", output, error),
                    None => output.clone(),
                };
                if let Some(mut step) = self.pending.take() {
                    step.observation = Some(observation);
                    self.response.steps.push(step);
                }
            }
            AgentEvent::FinalAnswer { content, completed } => {
                self.flush_pending();
                self.text.clear();
                self.response.final_answer = Some(content.clone());
                self.response.completed = *completed;
            }
            AgentEvent::Error { content } => {
                self.flush_pending();
                self.response.error = Some(content.clone());
                self.response.completed = false;
            }
            AgentEvent::Cancelled { .. } => {
                self.flush_pending();
                self.response.cancelled = true;
                self.response.completed = false;
            }
        }
    }

    pub fn finish(mut self) -> AgentResponse {
        self.flush_pending();
        self.response
    }

    fn flush_pending(&mut self) {
        if let Some(step) = self.pending.take() {
            self.response.steps.push(step);
        }
    }
}
