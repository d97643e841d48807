//! The ReAct agent loop
//!
//! ```text
//! caller ──► AgentExecutor::run(prompt, history, cancel)
//!                 │
//!                 ▼
//!           ModelBackend::stream_chat ──► text / tool-call fragments
//!                 │                              │
//!                 │                     ToolCallAccumulator (first call wins)
//!                 │                              │
//!                 │                  read-before-edit check (policy)
//!                 │                              │
//!                 │                  ToolRegistry::execute ──► SandboxEnvironment
//!                 │                              │
//!                 ▼                              ▼
//!           AgentEvent stream ◄──────── action / observation
//! ```

pub mod assembly;
pub mod events;
pub mod executor;
pub mod policy;
pub mod prompt;

pub use assembly::{ToolCallAccumulator, ToolCallState, ToolCallStatus, STREAMED_INDEX};
pub use events::{AgentEvent, AgentResponse, AgentStep, ResponseCollector, CANCELLED_MESSAGE};
pub use executor::{frame_tool_result, AgentExecutor};
pub use policy::{
    check_read_before_edit, fingerprint, CallRecord, ReadLedger, ToolCallHistory,
    LOOP_DETECTED_HINT, VALIDATION_EXHAUSTED_HINT,
};
pub use prompt::{render_system_instructions, DEFAULT_SYSTEM_INSTRUCTIONS};
