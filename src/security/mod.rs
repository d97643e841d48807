//! Security boundary for sandboxed tool execution
//!
//! Everything a tool does to the outside world crosses this module first:
//! - Command deny-list (chained destructive payloads never reach a shell)
//! - Path confinement (only `/workspace` and below is addressable)
//! - Filename allow-list (source, text, config and markup files only)
//! - Resource profile (privileges, capabilities, memory, CPU)
//!
//! # Security Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 1: POLICY (stateless, host side)                         │
//! │  sanitize_command / validate_file_path / is_allowed_file        │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 2: PROCESS HARDENING (in the child, before exec)         │
//! │  own process group, every capability dropped, no_new_privs      │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Layer 3: RESOURCE LIMITS (cgroups v2 or container runtime)     │
//! │  memory.max / memory.swap.max / cpu.max                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod capabilities;
pub mod policy;

pub use capabilities::{get_current_caps, CapabilityDropper};
pub use policy::{
    allowed_file_patterns, is_allowed_file, normalize_path, resource_profile, sanitize_command,
    validate_file_path, ResourceProfile, SecurityError, WORKSPACE_ROOT,
};
