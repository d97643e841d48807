//! Integration tests for the agent loop
//!
//! A scripted model backend replays fixed turns (text and tool-call
//! fragments) and records every request, so the loop's policies can be
//! checked without a live model.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use reactbox::agent::{AgentEvent, AgentExecutor, LOOP_DETECTED_HINT, VALIDATION_EXHAUSTED_HINT};
use reactbox::config::AgentConfig;
use reactbox::llm::{BackendError, ChatMessage, ChatRequest, ModelBackend, ModelDelta, ModelStream};
use reactbox::tools::{
    InputSchema, ParamType, Tool, ToolError, ToolParameter, ToolRegistry, ToolResult,
};

// ═══════════════════════════════════════════════════════════════════════════
// Test doubles
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum Step {
    Text(&'static str),
    Call(usize, &'static str, &'static str),
    Fail(&'static str),
    /// Trip the run's cancellation token at this point of the stream
    Cancel,
}

struct ScriptedBackend {
    turns: Mutex<VecDeque<Vec<Step>>>,
    repeat: Option<Vec<Step>>,
    requests: Mutex<Vec<ChatRequest>>,
    token: CancellationToken,
}

impl ScriptedBackend {
    fn new(turns: Vec<Vec<Step>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
            token: CancellationToken::new(),
        }
    }

    /// Replays `turn` for every request
    fn repeating(turn: Vec<Step>) -> Self {
        Self {
            repeat: Some(turn),
            ..Self::new(Vec::new())
        }
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ModelStream, BackendError> {
        self.requests.lock().unwrap().push(request);
        let steps = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat.clone())
            .unwrap_or_else(|| vec![Step::Text("done")]);
        let token = self.token.clone();

        Ok(Box::pin(async_stream::stream! {
            for step in steps {
                match step {
                    Step::Text(text) => yield Ok(ModelDelta::text(text)),
                    Step::Call(index, name, arguments) => {
                        yield Ok(ModelDelta::tool_call(index, Some(name), arguments))
                    }
                    Step::Fail(message) => yield Err(BackendError::Stream(message.to_string())),
                    Step::Cancel => token.cancel(),
                }
            }
        }))
    }
}

struct RecordingTool {
    name: &'static str,
    succeed: bool,
    schema: Option<InputSchema>,
    calls: AtomicUsize,
}

impl RecordingTool {
    fn new(name: &'static str, succeed: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            succeed,
            schema: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn strict(name: &'static str) -> Arc<Self> {
        let schema = InputSchema::new(json!({
            "type": "object",
            "properties": {"command": {"type": "string"}},
            "required": ["command"],
            "examples": [{"command": "ls"}]
        }))
        .unwrap();
        Arc::new(Self {
            name,
            succeed: true,
            schema: Some(schema),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "test tool"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::optional("path", ParamType::String, "path")]
    }

    fn input_schema(&self) -> Option<&InputSchema> {
        self.schema.as_ref()
    }

    async fn execute(&self, _args: Map<String, Value>) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(if self.succeed {
            ToolResult::ok(format!("{} ran", self.name))
        } else {
            ToolResult::failed("Command failed")
        })
    }
}

fn registry(tools: &[Arc<RecordingTool>]) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool.clone());
    }
    registry
}

fn config(max_iterations: usize) -> AgentConfig {
    AgentConfig {
        max_iterations,
        ..AgentConfig::default()
    }
}

async fn run(
    backend: &Arc<ScriptedBackend>,
    tools: ToolRegistry,
    config: AgentConfig,
    prompt: &str,
) -> Vec<AgentEvent> {
    let executor = AgentExecutor::new(backend.clone(), tools, config);
    executor
        .run(prompt, Vec::new(), backend.token.clone())
        .collect()
        .await
}

fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
    events.iter().map(AgentEvent::kind).collect()
}

fn count(events: &[AgentEvent], kind: &str) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

/// The chat API rejects tool calls whose arguments are not objects
fn assert_object_arguments(request: &ChatRequest) {
    let calls: Vec<_> = request
        .messages
        .iter()
        .filter_map(|m| m.tool_calls.as_ref())
        .flatten()
        .collect();
    assert!(!calls.is_empty());
    for call in calls {
        assert!(
            call.function.arguments.is_object(),
            "arguments of {} are {}",
            call.function.name,
            call.function.arguments
        );
    }
}

fn hint_count(request: &ChatRequest, hint: &str) -> usize {
    request.messages.iter().filter(|m| m.content == hint).count()
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_text_turn_is_final_answer() {
    let backend = Arc::new(ScriptedBackend::new(vec![vec![
        Step::Text("Hello, "),
        Step::Text("this is a response."),
    ]]));
    let events = run(&backend, ToolRegistry::new(), config(10), "Hello").await;

    assert_eq!(kinds(&events), vec!["chunk", "chunk", "final_answer"]);
    assert_eq!(
        events[2],
        AgentEvent::FinalAnswer {
            content: "Hello, this is a response.".to_string(),
            completed: true
        }
    );
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn test_tool_call_runs_and_result_is_fed_back() {
    let bash = RecordingTool::new("bash", true);
    let backend = Arc::new(ScriptedBackend::new(vec![
        vec![
            Step::Text("Listing files"),
            Step::Call(0, "bash", "{\"command\":"),
            Step::Call(0, "bash", " \"ls\"}"),
        ],
        vec![Step::Text("All done")],
    ]));
    let events = run(&backend, registry(&[bash.clone()]), config(10), "List").await;

    assert_eq!(
        kinds(&events),
        vec![
            "chunk",
            "action_streaming",
            "action_streaming",
            "action",
            "observation",
            "chunk",
            "final_answer"
        ]
    );
    assert_eq!(bash.calls(), 1);
    match &events[3] {
        AgentEvent::Action { tool, input, step } => {
            assert_eq!(tool, "bash");
            assert_eq!(input, &json!({"command": "ls"}));
            assert_eq!(*step, 1);
        }
        other => panic!("expected action, got {other:?}"),
    }
    match &events[4] {
        AgentEvent::Observation { success, output, .. } => {
            assert!(success);
            assert_eq!(output, "bash ran");
        }
        other => panic!("expected observation, got {other:?}"),
    }

    let second = &backend.requests()[1];
    let last = second.messages.last().unwrap();
    assert!(last.is_role("tool"));
    assert_eq!(last.content, "[SUCCESS] Tool 'bash' result:\nbash ran");
    let call = &second.messages[second.messages.len() - 2];
    assert_eq!(call.content, "Listing files");
    assert_eq!(call.tool_calls.as_ref().unwrap()[0].function.name, "bash");
}

#[tokio::test]
async fn test_max_iterations_emits_one_final_answer() {
    let bash = RecordingTool::new("bash", true);
    let backend = Arc::new(ScriptedBackend::repeating(vec![Step::Call(
        0,
        "bash",
        "{\"command\": \"ls\"}",
    )]));
    let events = run(&backend, registry(&[bash.clone()]), config(2), "Loop").await;

    assert_eq!(count(&events, "final_answer"), 1);
    match events.last().unwrap() {
        AgentEvent::FinalAnswer { content, completed } => {
            assert!(content.to_lowercase().contains("maximum iterations"));
            assert!(!completed);
        }
        other => panic!("expected final answer, got {other:?}"),
    }
    assert!(backend.requests().len() <= 2);
    assert_eq!(bash.calls(), 2);
}

#[tokio::test]
async fn test_cancel_mid_stream_stops_immediately() {
    let bash = RecordingTool::new("bash", true);
    let backend = Arc::new(ScriptedBackend::new(vec![vec![
        Step::Text("partial "),
        Step::Cancel,
        Step::Text("never shown"),
        Step::Call(0, "bash", "{}"),
    ]]));
    let events = run(&backend, registry(&[bash.clone()]), config(10), "Hello").await;

    assert_eq!(kinds(&events), vec!["chunk", "cancelled"]);
    match &events[1] {
        AgentEvent::Cancelled { content } => assert!(content.to_lowercase().contains("cancelled")),
        other => panic!("expected cancelled, got {other:?}"),
    }
    assert_eq!(bash.calls(), 0);
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let backend = Arc::new(ScriptedBackend::new(vec![vec![Step::Text("hi")]]));
    backend.token.cancel();
    let events = run(&backend, ToolRegistry::new(), config(10), "Hello").await;

    assert_eq!(kinds(&events), vec!["cancelled"]);
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_backend_failure_is_one_error_event() {
    let backend = Arc::new(ScriptedBackend::new(vec![vec![
        Step::Text("thinking"),
        Step::Fail("LLM API Error"),
        Step::Text("ignored"),
    ]]));
    let events = run(&backend, ToolRegistry::new(), config(10), "Hello").await;

    assert_eq!(kinds(&events), vec!["chunk", "error"]);
    match &events[1] {
        AgentEvent::Error { content } => assert!(content.contains("LLM API Error")),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_validation_errors_are_internal() {
    let strict = RecordingTool::strict("strict");
    let backend = Arc::new(ScriptedBackend::repeating(vec![Step::Call(0, "strict", "{}")]));
    let agent_config = AgentConfig {
        max_validation_retries: 2,
        ..config(5)
    };
    let events = run(&backend, registry(&[strict.clone()]), agent_config, "Go").await;

    assert_eq!(count(&events, "action"), 0);
    assert_eq!(count(&events, "observation"), 0);
    assert_eq!(count(&events, "error"), 0);
    assert_eq!(strict.calls(), 0);

    let requests = backend.requests();
    assert_eq!(requests.len(), 5);
    let corrective = requests[1].messages.last().unwrap();
    assert!(corrective.content.starts_with("[FAILED] Tool 'strict' result:"));
    assert!(corrective.content.contains("Required parameters: command"));

    // third failure exceeds the limit of two
    assert_eq!(hint_count(&requests[2], VALIDATION_EXHAUSTED_HINT), 0);
    assert_eq!(hint_count(&requests[3], VALIDATION_EXHAUSTED_HINT), 1);
    assert_eq!(hint_count(&requests[4], VALIDATION_EXHAUSTED_HINT), 1);
}

#[tokio::test]
async fn test_malformed_arguments_handled_as_validation() {
    let bash = RecordingTool::new("bash", true);
    let backend = Arc::new(ScriptedBackend::new(vec![
        vec![Step::Call(0, "bash", "{\"command\": ")],
        vec![Step::Text("giving up")],
    ]));
    let events = run(&backend, registry(&[bash.clone()]), config(5), "Go").await;

    assert_eq!(count(&events, "action"), 0);
    assert_eq!(bash.calls(), 0);
    let next = &backend.requests()[1];
    let corrective = next.messages.last().unwrap();
    assert!(corrective.content.contains("not valid JSON"));
    assert!(corrective.content.contains("{\\\"command\\\": "));
    assert_object_arguments(next);
}

#[tokio::test]
async fn test_non_object_arguments_recorded_as_object() {
    let bash = RecordingTool::new("bash", true);
    let backend = Arc::new(ScriptedBackend::new(vec![
        vec![Step::Call(0, "bash", "[\"ls\"]")],
        vec![Step::Text("giving up")],
    ]));
    let events = run(&backend, registry(&[bash.clone()]), config(5), "Go").await;

    assert_eq!(count(&events, "action"), 0);
    assert_eq!(bash.calls(), 0);
    assert_object_arguments(&backend.requests()[1]);
}

#[tokio::test]
async fn test_unknown_tool_is_corrected_not_executed() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        vec![Step::Call(0, "teleport", "{}")],
        vec![Step::Text("ok")],
    ]));
    let events = run(&backend, ToolRegistry::new(), config(5), "Go").await;

    assert_eq!(kinds(&events), vec!["action_streaming", "chunk", "final_answer"]);
    let corrective = backend.requests()[1].messages.last().unwrap().clone();
    assert!(corrective.content.contains("Unknown tool 'teleport'"));
}

#[tokio::test]
async fn test_repeated_failing_call_triggers_loop_hint() {
    let bash = RecordingTool::new("bash", false);
    let backend = Arc::new(ScriptedBackend::repeating(vec![Step::Call(
        0,
        "bash",
        "{\"input\": \"fail\"}",
    )]));
    let agent_config = AgentConfig {
        max_same_tool_retries: 3,
        ..config(7)
    };
    let events = run(&backend, registry(&[bash.clone()]), agent_config, "Keep trying").await;

    assert_eq!(count(&events, "error"), 0);
    assert_eq!(count(&events, "action"), 7);
    assert_eq!(bash.calls(), 7);

    let requests = backend.requests();
    assert_eq!(requests.len(), 7);
    assert_eq!(hint_count(&requests[2], LOOP_DETECTED_HINT), 0);
    assert_eq!(hint_count(&requests[3], LOOP_DETECTED_HINT), 1);
    // history was cleared, so the next hint needs three fresh failures
    assert_eq!(hint_count(&requests[4], LOOP_DETECTED_HINT), 1);
    assert_eq!(hint_count(&requests[5], LOOP_DETECTED_HINT), 1);
    assert_eq!(hint_count(&requests[6], LOOP_DETECTED_HINT), 2);
}

#[tokio::test]
async fn test_succeeding_repeats_are_not_a_loop() {
    let bash = RecordingTool::new("bash", true);
    let backend = Arc::new(ScriptedBackend::repeating(vec![Step::Call(
        0,
        "bash",
        "{\"command\": \"ls\"}",
    )]));
    let agent_config = AgentConfig {
        max_same_tool_retries: 2,
        ..config(4)
    };
    run(&backend, registry(&[bash]), agent_config, "Go").await;

    let requests = backend.requests();
    assert_eq!(hint_count(requests.last().unwrap(), LOOP_DETECTED_HINT), 0);
}

#[tokio::test]
async fn test_edit_requires_prior_read() {
    let edit = RecordingTool::new("edit_lines", true);
    let read = RecordingTool::new("file_read", true);
    let backend = Arc::new(ScriptedBackend::new(vec![
        vec![Step::Call(0, "edit_lines", "{\"path\": \"/workspace/test.py\"}")],
        vec![Step::Call(0, "file_read", "{\"path\": \"/workspace/test.py\"}")],
        vec![Step::Call(0, "edit_lines", "{\"path\": \"/workspace/test.py\"}")],
        vec![Step::Text("edited")],
    ]));
    let events = run(
        &backend,
        registry(&[edit.clone(), read.clone()]),
        config(10),
        "Edit the file",
    )
    .await;

    let actions: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::Action { tool, .. } => Some(tool.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(actions, vec!["file_read", "edit_lines"]);
    assert_eq!(edit.calls(), 1);
    assert_eq!(read.calls(), 1);

    let rejection = backend.requests()[1].messages.last().unwrap().clone();
    assert!(rejection.content.starts_with("[FAILED] Tool 'edit_lines' result:"));
    assert!(rejection.content.contains("file_read"));
}

#[tokio::test]
async fn test_read_that_failed_validation_does_not_unlock_edit() {
    let edit = RecordingTool::new("edit_lines", true);
    let read = RecordingTool::strict("file_read");
    let backend = Arc::new(ScriptedBackend::new(vec![
        vec![Step::Call(0, "file_read", "{\"path\": \"/workspace/test.py\"}")],
        vec![Step::Call(0, "edit_lines", "{\"path\": \"/workspace/test.py\"}")],
        vec![Step::Text("stopped")],
    ]));
    let events = run(
        &backend,
        registry(&[edit.clone(), read.clone()]),
        config(10),
        "Edit the file",
    )
    .await;

    assert_eq!(count(&events, "action"), 0);
    assert_eq!(read.calls(), 0);
    assert_eq!(edit.calls(), 0);

    let rejection = backend.requests()[2].messages.last().unwrap().clone();
    assert!(rejection.content.starts_with("[FAILED] Tool 'edit_lines' result:"));
    assert!(rejection.content.contains("has not been read"));
}

#[tokio::test]
async fn test_history_read_that_failed_validation_does_not_count() {
    let edit = RecordingTool::new("edit_lines", true);
    let backend = Arc::new(ScriptedBackend::new(vec![
        vec![Step::Call(0, "edit_lines", "{\"path\": \"/workspace/test.py\"}")],
        vec![Step::Text("stopped")],
    ]));
    let history = vec![
        ChatMessage::user("Read test.py"),
        ChatMessage::assistant_tool_call(
            "",
            reactbox::llm::ToolCall::new("file_read", json!({"path": "/workspace/test.py"})),
        ),
        ChatMessage::tool_result(
            "file_read",
            "[FAILED] Tool 'file_read' result:\nParameter validation failed for 'file_read':\n  - path: required",
        ),
    ];
    let executor = AgentExecutor::new(backend.clone(), registry(&[edit.clone()]), config(5));
    let events: Vec<AgentEvent> = executor
        .run("Now edit it", history, CancellationToken::new())
        .collect()
        .await;

    assert_eq!(count(&events, "action"), 0);
    assert_eq!(edit.calls(), 0);
}

#[tokio::test]
async fn test_read_in_history_satisfies_edit_check() {
    let edit = RecordingTool::new("edit_lines", true);
    let backend = Arc::new(ScriptedBackend::new(vec![
        vec![Step::Call(0, "edit_lines", "{\"path\": \"/workspace/test.py\"}")],
        vec![Step::Text("edited")],
    ]));
    let history = vec![
        ChatMessage::user("Read test.py"),
        ChatMessage::assistant_tool_call(
            "",
            reactbox::llm::ToolCall::new("file_read", json!({"path": "/workspace/test.py"})),
        ),
        ChatMessage::tool_result("file_read", "[SUCCESS] Tool 'file_read' result:\n1: x = 1"),
    ];
    let executor = AgentExecutor::new(backend.clone(), registry(&[edit.clone()]), config(5));
    let events: Vec<AgentEvent> = executor
        .run("Now edit it", history, CancellationToken::new())
        .collect()
        .await;

    assert_eq!(count(&events, "action"), 1);
    assert_eq!(edit.calls(), 1);
}

#[tokio::test]
async fn test_only_first_tool_call_runs() {
    let bash = RecordingTool::new("bash", true);
    let think = RecordingTool::new("think", true);
    let backend = Arc::new(ScriptedBackend::new(vec![
        vec![
            Step::Call(0, "bash", "{\"command\": \"ls\"}"),
            Step::Call(1, "think", "{\"thought\": \"x\"}"),
        ],
        vec![Step::Text("done")],
    ]));
    let events = run(
        &backend,
        registry(&[bash.clone(), think.clone()]),
        config(5),
        "Go",
    )
    .await;

    assert_eq!(count(&events, "action"), 1);
    assert_eq!(bash.calls(), 1);
    assert_eq!(think.calls(), 0);
    assert!(events.iter().all(|e| match e {
        AgentEvent::ActionStreaming { tool, .. } => tool == "bash",
        _ => true,
    }));
}

#[tokio::test]
async fn test_out_of_order_calls_stream_only_the_call_that_runs() {
    let bash = RecordingTool::new("bash", true);
    let think = RecordingTool::new("think", true);
    let backend = Arc::new(ScriptedBackend::new(vec![
        vec![
            Step::Call(1, "think", "{\"thought\": \"x\"}"),
            Step::Call(0, "bash", "{\"command\": \"ls\"}"),
        ],
        vec![Step::Text("done")],
    ]));
    let events = run(
        &backend,
        registry(&[bash.clone(), think.clone()]),
        config(5),
        "Go",
    )
    .await;

    let streamed: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ActionStreaming { tool, .. } => Some(tool.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, vec!["bash"]);
    assert_eq!(bash.calls(), 1);
    assert_eq!(think.calls(), 0);
}

#[tokio::test]
async fn test_history_framing() {
    let backend = Arc::new(ScriptedBackend::new(vec![vec![Step::Text("ok")]]));
    let executor = AgentExecutor::new(backend.clone(), ToolRegistry::new(), config(3));
    let history = vec![
        ChatMessage::system("stale instructions"),
        ChatMessage::user("Hi"),
        ChatMessage::assistant("Hello"),
    ];
    let _: Vec<AgentEvent> = executor
        .run("Follow up", history, CancellationToken::new())
        .collect()
        .await;

    let messages = &backend.requests()[0].messages;
    let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    assert!(messages[0].content.contains("ReAct"));
    assert!(!messages[0].content.contains("{tools}"));
    assert_eq!(messages[3].content, "Follow up");
}

#[tokio::test]
async fn test_terminal_event_closes_run_and_actions_pair_with_observations() {
    let bash = RecordingTool::new("bash", false);
    let backend = Arc::new(ScriptedBackend::new(vec![
        vec![Step::Call(0, "bash", "{\"command\": \"a\"}")],
        vec![Step::Call(0, "bash", "{\"command\": \"b\"}")],
        vec![Step::Text("finished")],
    ]));
    let events = run(&backend, registry(&[bash]), config(10), "Go").await;

    assert!(events.last().unwrap().is_terminal());
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    for (i, event) in events.iter().enumerate() {
        if let AgentEvent::Action { step, .. } = event {
            match &events[i + 1] {
                AgentEvent::Observation { step: observed, .. } => assert_eq!(observed, step),
                other => panic!("action must be followed by its observation, got {other:?}"),
            }
        }
    }
}

#[tokio::test]
async fn test_run_to_completion_collects_steps() {
    let bash = RecordingTool::new("bash", true);
    let backend = Arc::new(ScriptedBackend::new(vec![
        vec![
            Step::Text("I should list the files"),
            Step::Call(0, "bash", "{\"command\": \"ls\"}"),
        ],
        vec![Step::Text("Task completed")],
    ]));
    let executor = AgentExecutor::new(backend.clone(), registry(&[bash]), config(5));
    let response = executor
        .run_to_completion("List", Vec::new(), CancellationToken::new())
        .await;

    assert!(response.completed);
    assert!(!response.cancelled);
    assert!(response.error.is_none());
    assert_eq!(response.final_answer.as_deref(), Some("Task completed"));
    assert_eq!(response.steps.len(), 1);
    let step = &response.steps[0];
    assert_eq!(step.step_number, 1);
    assert_eq!(step.thought.as_deref(), Some("I should list the files"));
    assert_eq!(step.action.as_deref(), Some("bash"));
    assert_eq!(step.action_input, Some(json!({"command": "ls"})));
    assert_eq!(step.observation.as_deref(), Some("bash ran"));
}

#[tokio::test]
async fn test_concurrent_runs_do_not_share_state() {
    let bash = RecordingTool::new("bash", false);
    let tools = registry(&[bash.clone()]);
    let repeating = || {
        Arc::new(ScriptedBackend::repeating(vec![Step::Call(
            0,
            "bash",
            "{\"command\": \"false\"}",
        )]))
    };
    let (a, b) = (repeating(), repeating());
    let config = AgentConfig {
        max_same_tool_retries: 3,
        ..config(3)
    };

    let run_a = run(&a, tools.clone(), config.clone(), "A");
    let run_b = run(&b, tools, config, "B");
    let (events_a, events_b) = tokio::join!(run_a, run_b);

    assert_eq!(count(&events_a, "action"), 3);
    assert_eq!(count(&events_b, "action"), 3);
    assert_eq!(bash.calls(), 6);
    // each run saw only its own three failures
    for backend in [&a, &b] {
        let requests = backend.requests();
        assert_eq!(hint_count(requests.last().unwrap(), LOOP_DETECTED_HINT), 0);
    }
}
