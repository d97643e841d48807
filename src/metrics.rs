//! Prometheus metrics for agent runs, tool calls and sandboxes
//!
//! Everything registers into the prometheus default registry;
//! [`gather_text`] renders it in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec,
    TextEncoder,
};

lazy_static! {
    // ─────────────────────────────────────────────────────────────────────────────
    // Agent Loop Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Finished agent runs by terminal outcome.
    ///
    /// Labels:
    /// - outcome: "completed", "error", "cancelled", "max_iterations"
    pub static ref AGENT_RUNS: CounterVec = register_counter_vec!(
        "reactbox_agent_runs_total",
        "Agent runs by terminal outcome",
        &["outcome"]
    ).expect("failed to register AGENT_RUNS metric");

    /// Model calls made per run
    pub static ref AGENT_ITERATIONS: Histogram = register_histogram!(
        "reactbox_agent_iterations",
        "Model calls made per agent run",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 10.0, 15.0, 20.0, 30.0]
    ).expect("failed to register AGENT_ITERATIONS metric");

    /// Tool calls that reached execution.
    ///
    /// Labels:
    /// - tool: tool name
    /// - status: "success" or "failed"
    pub static ref TOOL_CALLS: CounterVec = register_counter_vec!(
        "reactbox_tool_calls_total",
        "Executed tool calls by tool and outcome",
        &["tool", "status"]
    ).expect("failed to register TOOL_CALLS metric");

    /// Tool calls rejected for malformed parameters (fed back to the model)
    pub static ref TOOL_VALIDATION_FAILURES: CounterVec = register_counter_vec!(
        "reactbox_tool_validation_failures_total",
        "Tool calls rejected by parameter validation",
        &["tool"]
    ).expect("failed to register TOOL_VALIDATION_FAILURES metric");

    /// Repeated identical failing calls that triggered a loop-break hint
    pub static ref LOOP_DETECTIONS: Counter = register_counter!(
        "reactbox_loop_detections_total",
        "Repeated failing tool call loops broken by a corrective hint"
    ).expect("failed to register LOOP_DETECTIONS metric");

    /// Edit calls rejected because the file was never read first
    pub static ref EDIT_PRECONDITION_REJECTIONS: Counter = register_counter!(
        "reactbox_edit_precondition_rejections_total",
        "Edit calls rejected for missing a prior read of the same path"
    ).expect("failed to register EDIT_PRECONDITION_REJECTIONS metric");

    /// Time spent streaming one model turn, by model
    pub static ref LLM_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "reactbox_llm_call_duration_seconds",
        "Duration of one streamed model turn",
        &["model"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).expect("failed to register LLM_CALL_DURATION metric");

    // ─────────────────────────────────────────────────────────────────────────────
    // Sandbox Metrics
    // ─────────────────────────────────────────────────────────────────────────────

    /// Command execution time inside sandboxes, by backend
    pub static ref SANDBOX_EXEC_DURATION: HistogramVec = register_histogram_vec!(
        "reactbox_sandbox_exec_duration_seconds",
        "Command execution time inside a sandbox",
        &["backend"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    ).expect("failed to register SANDBOX_EXEC_DURATION metric");

    /// Commands refused by the deny-list before reaching a shell
    pub static ref SANDBOX_COMMANDS_REJECTED: Counter = register_counter!(
        "reactbox_sandbox_commands_rejected_total",
        "Commands rejected by the dangerous-command policy"
    ).expect("failed to register SANDBOX_COMMANDS_REJECTED metric");

    /// Live sandbox environments held by the registry
    pub static ref SANDBOXES_ACTIVE: Gauge = register_gauge!(
        "reactbox_sandboxes_active",
        "Sandbox environments currently provisioned"
    ).expect("failed to register SANDBOXES_ACTIVE metric");
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_touched_metrics() {
        LOOP_DETECTIONS.inc();
        TOOL_CALLS.with_label_values(&["think", "success"]).inc();
        let text = gather_text();
        assert!(text.contains("reactbox_loop_detections_total"));
        assert!(text.contains("reactbox_tool_calls_total"));
    }
}
