//! Runtime configuration
//!
//! Plain structs with defaults; [`Settings::from_env`] overlays `REACTBOX_*`
//! environment variables for the binary.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Tunables for one agent run
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model name passed to the backend (e.g., "qwen3")
    pub model: String,
    /// Maximum model calls before a synthetic final answer
    pub max_iterations: usize,
    /// Validation failures tolerated before the change-approach hint
    pub max_validation_retries: usize,
    /// Identical failing calls in a row that count as a loop
    pub max_same_tool_retries: usize,
    /// Custom system instructions; `{tools}` is replaced with tool descriptions
    pub system_instructions: Option<String>,
    /// Tools that may only touch a path after it has been read
    pub edit_tools: Vec<String>,
    /// Tools whose completed call counts as a read of their `path`
    pub read_tools: Vec<String>,
    pub temperature: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "qwen3".to_string(),
            max_iterations: 10,
            max_validation_retries: 3,
            max_same_tool_retries: 3,
            system_instructions: None,
            edit_tools: vec!["edit_lines".to_string()],
            read_tools: vec!["file_read".to_string()],
            temperature: 0.0,
        }
    }
}

/// Where and how sandbox environments are provisioned
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Host directory holding one sub-directory per conversation
    pub workspace_root: PathBuf,
    /// Environment identifiers are `{name_prefix}-{conversation_id}`
    pub name_prefix: String,
    pub default_command_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("reactbox").join("workspaces"),
            name_prefix: "reactbox-sandbox".to_string(),
            default_command_timeout: Duration::from_secs(30),
        }
    }
}

impl RegistryConfig {
    pub fn with_workspace_root(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            ..Default::default()
        }
    }
}

/// Everything the binary needs, loaded from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub ollama_url: String,
    pub environment_type: String,
    pub otlp_endpoint: Option<String>,
    /// `None` enables every builtin tool
    pub enabled_tools: Option<Vec<String>>,
    pub agent: AgentConfig,
    pub registry: RegistryConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ollama_url: crate::llm::DEFAULT_OLLAMA_URL.to_string(),
            environment_type: crate::sandbox::DEFAULT_ENVIRONMENT_TYPE.to_string(),
            otlp_endpoint: None,
            enabled_tools: None,
            agent: AgentConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from `REACTBOX_*` variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Settings::from_env`] with an injectable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("REACTBOX_OLLAMA_URL") {
            settings.ollama_url = url;
        }
        if let Some(model) = get("REACTBOX_MODEL") {
            settings.agent.model = model;
        }
        if let Some(root) = get("REACTBOX_WORKSPACE_ROOT") {
            settings.registry.workspace_root = PathBuf::from(root);
        }
        if let Some(env_type) = get("REACTBOX_ENVIRONMENT") {
            settings.environment_type = env_type;
        }
        if let Some(raw) = get("REACTBOX_MAX_ITERATIONS") {
            settings.agent.max_iterations =
                parse_or_default("REACTBOX_MAX_ITERATIONS", &raw, settings.agent.max_iterations);
        }
        if let Some(raw) = get("REACTBOX_COMMAND_TIMEOUT_SECS") {
            let default = settings.registry.default_command_timeout.as_secs();
            settings.registry.default_command_timeout = Duration::from_secs(parse_or_default(
                "REACTBOX_COMMAND_TIMEOUT_SECS",
                &raw,
                default,
            ));
        }
        settings.otlp_endpoint = get("REACTBOX_OTLP_ENDPOINT");
        settings.enabled_tools = get("REACTBOX_ENABLED_TOOLS").map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        });

        settings
    }
}

fn parse_or_default<T>(key: &str, raw: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = raw, default = %default, "Unparseable setting, using default");
            default
        }
    }
}
