//! Environment types a conversation can ask for
//!
//! `environment_type` strings map to a backend and, for containers, a default
//! image. [`EnvironmentConfig`] carries per-conversation overrides.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::environment::SandboxError;

/// Which backend hosts the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Host process sharing the host filesystem
    ///
    /// Commands start in the workspace directory but nothing stops them from
    /// reaching other conversations' workspaces; only the file API is
    /// confined. Opt in explicitly for development and tests.
    Local,
    /// Container started through the docker CLI
    Container,
}

/// Resolved catalogue entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    pub environment_type: String,
    pub backend: BackendKind,
    pub image: Option<String>,
}

/// Per-conversation overrides applied on top of the catalogue entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Replace the catalogue image (container backends only)
    pub image: Option<String>,
    /// Allow outbound networking; containers get `--network none` otherwise
    pub network: bool,
    /// Extra environment variables for every command
    pub env: BTreeMap<String, String>,
}

const CATALOG: &[(&str, BackendKind, Option<&str>)] = &[
    ("local", BackendKind::Local, None),
    ("python3.11", BackendKind::Container, Some("python:3.11-slim")),
    ("python3.13", BackendKind::Container, Some("python:3.13-slim")),
    ("node20", BackendKind::Container, Some("node:20-slim")),
    ("nodejs", BackendKind::Container, Some("node:20-slim")),
    ("cpp", BackendKind::Container, Some("gcc:13")),
];

/// Environment type used when nothing is configured; always a container
pub const DEFAULT_ENVIRONMENT_TYPE: &str = "python3.11";

/// Look up an environment type, applying the config's image override
pub fn resolve(
    environment_type: &str,
    config: &EnvironmentConfig,
) -> Result<EnvironmentSpec, SandboxError> {
    let (name, backend, image) = CATALOG
        .iter()
        .find(|(name, _, _)| name.eq_ignore_ascii_case(environment_type))
        .ok_or_else(|| SandboxError::UnknownEnvironment(environment_type.to_string()))?;

    let image = match backend {
        BackendKind::Local => None,
        BackendKind::Container => config
            .image
            .clone()
            .or_else(|| image.map(str::to_string)),
    };

    Ok(EnvironmentSpec {
        environment_type: name.to_string(),
        backend: *backend,
        image,
    })
}

/// Every known environment type name
pub fn environment_types() -> Vec<&'static str> {
    CATALOG.iter().map(|(name, _, _)| *name).collect()
}
