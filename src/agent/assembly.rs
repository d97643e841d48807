//! Reassembling streamed tool-call fragments
//!
//! The model may start several calls in one turn; fragments arrive keyed by
//! call index. Every index is accumulated, but only the lowest one is
//! promoted to the call the executor runs.
//!
//! Progress is reported only for index 0: no call can sort before it, so a
//! streamed call is always the one that runs. A turn whose calls start at a
//! higher index streams nothing and still promotes its lowest index.

use std::collections::BTreeMap;

/// The only index whose fragments are reported while streaming
pub const STREAMED_INDEX: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallStatus {
    Streaming,
    Running,
    Done,
}

/// One call as it streams in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallState {
    pub index: usize,
    pub name: String,
    pub arguments: String,
    pub step: usize,
    pub status: ToolCallStatus,
}

impl ToolCallState {
    fn new(index: usize, step: usize) -> Self {
        Self {
            index,
            name: String::new(),
            arguments: String::new(),
            step,
            status: ToolCallStatus::Streaming,
        }
    }
}

/// Per-turn accumulator; dropped when the turn ends
#[derive(Debug)]
pub struct ToolCallAccumulator {
    step: usize,
    calls: BTreeMap<usize, ToolCallState>,
}

impl ToolCallAccumulator {
    pub fn new(step: usize) -> Self {
        Self {
            step,
            calls: BTreeMap::new(),
        }
    }

    /// Add a fragment.
    ///
    /// Returns the updated state for fragments of [`STREAMED_INDEX`], `None`
    /// for fragments of any other call.
    pub fn push(&mut self, index: usize, name: Option<&str>, arguments: &str) -> Option<&ToolCallState> {
        let step = self.step;
        let state = self
            .calls
            .entry(index)
            .or_insert_with(|| ToolCallState::new(index, step));
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            state.name = name.to_string();
        }
        state.arguments.push_str(arguments);

        (index == STREAMED_INDEX).then_some(&*state)
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Number of distinct calls the model started this turn
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn promoted(&self) -> Option<&ToolCallState> {
        self.calls.values().next()
    }

    /// End the turn, keeping only the promoted call
    pub fn into_promoted(self) -> Option<ToolCallState> {
        self.calls.into_values().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_concatenate() {
        let mut acc = ToolCallAccumulator::new(1);
        acc.push(0, Some("bash"), "{\"command\":");
        let state = acc.push(0, None, " \"ls\"}").unwrap();
        assert_eq!(state.name, "bash");
        assert_eq!(state.arguments, "{\"command\": \"ls\"}");
        assert_eq!(state.status, ToolCallStatus::Streaming);
        assert_eq!(state.step, 1);
    }

    #[test]
    fn test_only_first_index_promoted() {
        let mut acc = ToolCallAccumulator::new(2);
        assert!(acc.push(0, Some("bash"), "{}").is_some());
        assert!(acc.push(1, Some("file_read"), "{\"path\":\"/workspace/a\"}").is_none());
        assert_eq!(acc.len(), 2);

        let call = acc.into_promoted().unwrap();
        assert_eq!(call.name, "bash");
        assert_eq!(call.index, 0);
    }

    #[test]
    fn test_later_index_arriving_first_is_not_streamed() {
        let mut acc = ToolCallAccumulator::new(1);
        assert!(acc.push(1, Some("think"), "{}").is_none());
        assert_eq!(acc.push(0, Some("bash"), "{}").unwrap().name, "bash");
        assert!(acc.push(1, None, "").is_none());
        assert_eq!(acc.into_promoted().unwrap().name, "bash");
    }

    #[test]
    fn test_calls_without_index_zero_still_promote_lowest() {
        let mut acc = ToolCallAccumulator::new(1);
        assert!(acc.push(3, Some("search"), "{}").is_none());
        assert!(acc.push(2, Some("think"), "{}").is_none());
        assert_eq!(acc.into_promoted().unwrap().index, 2);
    }

    #[test]
    fn test_empty_turn_has_no_call() {
        let acc = ToolCallAccumulator::new(1);
        assert!(acc.is_empty());
        assert!(acc.promoted().is_none());
        assert!(acc.into_promoted().is_none());
    }
}
