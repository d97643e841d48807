//! Checks the executor applies around tool calls
//!
//! - read-before-edit: an edit on a path needs an earlier read of that path
//!   that actually ran
//! - loop detection: the same failing call repeated too often is interrupted

use std::collections::HashSet;
use std::path::PathBuf;

use serde_json::Value;

use crate::llm::ChatMessage;
use crate::security::normalize_path;
use crate::tools::{UNKNOWN_TOOL_PREFIX, VALIDATION_FAILED_PREFIX};

/// Appended once validation retries are exhausted
pub const VALIDATION_EXHAUSTED_HINT: &str = "Your tool calls keep failing parameter validation. \
Stop retrying the same call. Re-read the tool descriptions, check the required parameters \
and their types, and change your approach.";

/// Appended when the same failing call repeats
pub const LOOP_DETECTED_HINT: &str = "You are repeating the same failing tool call. \
Stop repeating it and try a different approach: inspect the workspace, read the relevant \
files, or use another tool.";

/// Path argument of a call, whether arguments arrived parsed or as text
fn path_argument(arguments: &Value) -> Option<String> {
    match arguments {
        Value::Object(map) => map.get("path").and_then(Value::as_str).map(str::to_string),
        Value::String(raw) => serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| v.get("path").and_then(Value::as_str).map(str::to_string)),
        _ => None,
    }
}

fn ledger_key(path: &str) -> PathBuf {
    normalize_path(path).unwrap_or_else(|| PathBuf::from(path))
}

/// Whether a tool message reports a call that never ran
fn reports_validation_failure(content: &str) -> bool {
    let body = content
        .strip_prefix("[FAILED]")
        .and_then(|rest| rest.split_once('\n'))
        .map(|(_, body)| body)
        .unwrap_or(content);
    body.starts_with(VALIDATION_FAILED_PREFIX) || body.starts_with(UNKNOWN_TOOL_PREFIX)
}

/// Normalized paths a read tool has actually been run on
#[derive(Debug, Clone, Default)]
pub struct ReadLedger {
    paths: HashSet<PathBuf>,
}

impl ReadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads found in earlier conversation history
    ///
    /// A call counts only when a tool message answers it and that answer is
    /// not a validation failure. Answers pair with calls by position.
    pub fn from_history(messages: &[ChatMessage], read_tools: &[String]) -> Self {
        let mut ledger = Self::new();
        for (i, message) in messages.iter().enumerate() {
            if !message.is_role("assistant") {
                continue;
            }
            let Some(calls) = message.tool_calls.as_ref() else {
                continue;
            };
            let answers = messages[i + 1..].iter().take_while(|m| m.is_role("tool"));
            for (call, answer) in calls.iter().zip(answers) {
                if !reports_validation_failure(&answer.content) {
                    ledger.observe(&call.function.name, &call.function.arguments, read_tools);
                }
            }
        }
        ledger
    }

    /// Record a call that reached execution; only read tools are kept
    pub fn observe(&mut self, tool: &str, arguments: &Value, read_tools: &[String]) {
        if !read_tools.iter().any(|t| t == tool) {
            return;
        }
        if let Some(path) = path_argument(arguments) {
            self.paths.insert(ledger_key(&path));
        }
    }

    pub fn has_read(&self, path: &str) -> bool {
        self.paths.contains(&ledger_key(path))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Corrective message when an edit has no prior read, `None` to proceed
///
/// Calls to tools outside `edit_tools`, and edits without a path argument
/// (left for validation to report), always proceed.
pub fn check_read_before_edit(
    tool: &str,
    arguments: &Value,
    reads: &ReadLedger,
    edit_tools: &[String],
    read_tools: &[String],
) -> Option<String> {
    if !edit_tools.iter().any(|t| t == tool) {
        return None;
    }
    let path = path_argument(arguments)?;
    if reads.has_read(&path) {
        return None;
    }

    let reader = read_tools.first().map(String::as_str).unwrap_or("file_read");
    Some(format!(
        "Cannot run {} on {}: the file has not been read yet. Call {} on {} first, \
         then retry the edit using the line numbers it shows.",
        tool, path, reader, path
    ))
}

/// Canonical text of a call's arguments
///
/// Object keys serialize in sorted order, so argument order does not matter.
pub fn fingerprint(arguments: &Value) -> String {
    arguments.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub tool: String,
    pub fingerprint: String,
    pub success: bool,
}

/// Executed calls of one run, for loop detection only
#[derive(Debug, Default)]
pub struct ToolCallHistory {
    entries: Vec<CallRecord>,
}

impl ToolCallHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, tool: &str, arguments: &Value, success: bool) {
        self.entries.push(CallRecord {
            tool: tool.to_string(),
            fingerprint: fingerprint(arguments),
            success,
        });
    }

    /// The last `threshold` calls are one identical failing call
    pub fn is_looping(&self, threshold: usize) -> bool {
        if threshold == 0 || self.entries.len() < threshold {
            return false;
        }
        let recent = &self.entries[self.entries.len() - threshold..];
        let first = &recent[0];
        recent.iter().all(|entry| {
            !entry.success && entry.tool == first.tool && entry.fingerprint == first.fingerprint
        })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[CallRecord] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;
    use serde_json::json;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn check(tool: &str, path: &str, reads: &ReadLedger) -> Option<String> {
        check_read_before_edit(
            tool,
            &json!({"path": path}),
            reads,
            &names(&["edit_lines"]),
            &names(&["file_read"]),
        )
    }

    #[test]
    fn test_edit_without_read_rejected() {
        let message = check("edit_lines", "/workspace/test.py", &ReadLedger::new()).unwrap();
        assert!(message.contains("file_read"));
    }

    #[test]
    fn test_edit_after_read_proceeds() {
        let mut reads = ReadLedger::new();
        reads.observe(
            "file_read",
            &json!({"path": "/workspace/./test.py"}),
            &names(&["file_read"]),
        );
        assert!(check("edit_lines", "/workspace/test.py", &reads).is_none());
    }

    #[test]
    fn test_only_read_tools_are_recorded() {
        let mut reads = ReadLedger::new();
        reads.observe("bash", &json!({"path": "/workspace/test.py"}), &names(&["file_read"]));
        assert!(reads.is_empty());
        assert!(check("edit_lines", "/workspace/test.py", &reads).is_some());
    }

    #[test]
    fn test_history_read_counts_when_answered() {
        let messages = vec![
            ChatMessage::user("Edit the file"),
            ChatMessage::assistant_tool_call(
                "Let me read it first",
                ToolCall::new("file_read", json!("{\"path\": \"/workspace/test.py\"}")),
            ),
            ChatMessage::tool_result("file_read", "[SUCCESS] Tool 'file_read' result:\n1: x = 1"),
        ];
        let reads = ReadLedger::from_history(&messages, &names(&["file_read"]));
        assert!(reads.has_read("/workspace/test.py"));
        assert!(!reads.has_read("/workspace/other.py"));
    }

    #[test]
    fn test_history_read_that_never_ran_does_not_count() {
        let messages = vec![
            ChatMessage::assistant_tool_call(
                "",
                ToolCall::new("file_read", json!({"path": "/workspace/test.py"})),
            ),
            ChatMessage::tool_result(
                "file_read",
                "[FAILED] Tool 'file_read' result:\nParameter validation failed for 'file_read':\n  - encoding: required",
            ),
            ChatMessage::assistant_tool_call(
                "",
                ToolCall::new("file_read", json!({"path": "/workspace/other.py"})),
            ),
        ];
        let reads = ReadLedger::from_history(&messages, &names(&["file_read"]));
        assert!(reads.is_empty());
    }

    #[test]
    fn test_non_edit_tools_unchecked() {
        assert!(check_read_before_edit(
            "bash",
            &json!({"command": "ls"}),
            &ReadLedger::new(),
            &names(&["edit_lines"]),
            &names(&["file_read"]),
        )
        .is_none());
    }

    #[test]
    fn test_loop_detection() {
        let mut history = ToolCallHistory::new();
        let args = json!({"command": "false"});
        history.record("bash", &args, false);
        history.record("bash", &args, false);
        assert!(!history.is_looping(3));
        history.record("bash", &args, false);
        assert!(history.is_looping(3));

        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn test_success_or_different_args_break_the_streak() {
        let mut history = ToolCallHistory::new();
        history.record("bash", &json!({"command": "false"}), false);
        history.record("bash", &json!({"command": "false"}), true);
        history.record("bash", &json!({"command": "false"}), false);
        assert!(!history.is_looping(3));

        history.record("bash", &json!({"command": "other"}), false);
        history.record("bash", &json!({"command": "false"}), false);
        assert!(!history.is_looping(2));
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }
}
