//! reactbox - a cancellable ReAct agent loop driving tools inside sandboxes
//!
//! A model streams text and tool calls; the agent loop validates each call,
//! runs it through a per-conversation sandbox, and streams typed events back
//! to the caller.
//!
//! # Modules
//!
//! - `agent` - the ReAct loop, its events and its retry/loop policies
//! - `tools` - the tool contract, registry and built-in tools
//! - `sandbox` - per-conversation execution environments and their registry
//! - `security` - command, path and file-type rules, capability dropping
//! - `cgroups` - resource limits using Linux cgroups v2
//! - `llm` - the streaming model interface and its Ollama implementation
//! - `config` - settings from `REACTBOX_*` environment variables
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - logging and OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use reactbox::{AgentExecutor, OllamaBackend, SandboxRegistry, Settings};
//!
//! let settings = Settings::from_env();
//! let registry = SandboxRegistry::new(settings.registry.clone());
//! let sandbox = registry
//!     .create_or_reuse("conv-1", &settings.environment_type, &Default::default())
//!     .await?;
//! let tools = reactbox::tools::registry_for(sandbox, None, settings.registry.default_command_timeout)?;
//! let backend = Arc::new(OllamaBackend::new(settings.ollama_url.clone()));
//! let executor = AgentExecutor::new(backend, tools, settings.agent.clone());
//! let events = executor.run("list the files", Vec::new(), CancellationToken::new());
//! ```

pub mod agent;
pub mod cgroups;
pub mod config;
pub mod llm;
pub mod metrics;
pub mod sandbox;
pub mod security;
pub mod tools;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentEvent, AgentExecutor, AgentResponse};
pub use config::{AgentConfig, RegistryConfig, Settings};
pub use llm::{ModelBackend, OllamaBackend};
pub use sandbox::{SandboxEnvironment, SandboxRegistry};
pub use tools::{Tool, ToolRegistry, ToolResult};
