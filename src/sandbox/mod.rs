//! Per-conversation sandbox environments
//!
//! Tools touch the outside world only through [`SandboxEnvironment`]. The
//! [`SandboxRegistry`] hands out exactly one live environment per
//! conversation id, backed either by a confined host process
//! ([`LocalEnvironment`]) or a docker container ([`ContainerEnvironment`]).

pub mod catalog;
pub mod container;
pub mod environment;
pub mod local;
pub mod registry;
pub mod workspace;

pub use catalog::{
    environment_types, BackendKind, EnvironmentConfig, EnvironmentSpec, DEFAULT_ENVIRONMENT_TYPE,
};
pub use container::ContainerEnvironment;
pub use environment::{
    BinaryFile, ExecOutput, FileContent, SandboxEnvironment, SandboxError, SandboxStatus,
};
pub use local::LocalEnvironment;
pub use registry::{validate_conversation_id, RunTicket, SandboxRegistry};
pub use workspace::{Workspace, MAX_IMAGE_PREVIEW_BYTES};
