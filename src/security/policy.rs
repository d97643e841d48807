//! Stateless security rules applied before anything reaches a sandbox
//!
//! None of these functions touch the filesystem. Path checks are purely
//! lexical; the symlink-aware half of confinement lives in
//! [`crate::sandbox::workspace`].

use std::path::{Component, Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

/// Root of every sandbox workspace as seen from inside the sandbox
pub const WORKSPACE_ROOT: &str = "/workspace";

/// Rejections produced by the security policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    #[error("Potentially dangerous command detected: {pattern}")]
    DangerousCommand { pattern: String },

    #[error("Invalid path: {path} is outside {base}")]
    PathOutsideWorkspace { path: String, base: String },

    #[error("File type not allowed: {filename}")]
    DisallowedFileType { filename: String },
}

lazy_static! {
    // A chaining operator (or command substitution opener) followed by a
    // destructive payload. Whitespace between the two is optional.
    static ref DANGEROUS_COMMAND: Regex = Regex::new(
        r"(?i)(?:;|&|\||\n|\$\(|`)\s*(rm\s+-[a-z]*r[a-z]*f[a-z]*|rm\s+-[a-z]*f[a-z]*r[a-z]*|rm\s+--recursive|mkfs(?:\.[a-z0-9]+)?|dd\s+if=|:\(\)\s*\{|shutdown|reboot|poweroff|halt\b|chmod\s+-r\s+777\s+/)"
    )
    .expect("dangerous command pattern is valid");
}

/// Extensions the agent may create or upload, lowercase and without the dot
const ALLOWED_EXTENSIONS: &[&str] = &[
    // source
    "py", "js", "jsx", "ts", "tsx", "mjs", "cjs", "rs", "go", "java", "kt", "c", "h", "cpp",
    "hpp", "cc", "cs", "rb", "swift", "r", "scala", "lua", "sh", "bash", "sql", "ipynb",
    // text
    "txt", "md", "rst", "csv", "tsv", "log",
    // config
    "json", "yml", "yaml", "toml", "ini", "cfg", "conf", "env", "lock",
    // markup
    "html", "htm", "css", "scss", "sass", "less", "xml", "svg", "vue", "svelte",
];

/// Reject commands that chain a destructive payload onto another command.
///
/// Matching is case-insensitive. A command that does not match is returned
/// unchanged, byte for byte.
pub fn sanitize_command(command: &str) -> Result<&str, SecurityError> {
    if let Some(found) = DANGEROUS_COMMAND.find(command) {
        return Err(SecurityError::DangerousCommand {
            pattern: found.as_str().trim().to_string(),
        });
    }
    Ok(command)
}

/// Lexically normalize an absolute path, resolving `.` and `..`.
///
/// Returns `None` for relative paths. `..` at the root stays at the root,
/// the same way the kernel resolves `/..`.
pub fn normalize_path(path: &str) -> Option<PathBuf> {
    let path = Path::new(path);
    if !path.is_absolute() {
        return None;
    }

    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(segment) => out.push(segment),
            Component::ParentDir => {
                out.pop();
            }
            Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

/// True iff `path`, once normalized, equals `allowed_base` or is nested under it.
pub fn validate_file_path(path: &str, allowed_base: &str) -> bool {
    let (Some(normalized), Some(base)) = (normalize_path(path), normalize_path(allowed_base))
    else {
        return false;
    };
    normalized.starts_with(&base)
}

/// Case-insensitive extension allow-list check.
///
/// Files without an extension (`Makefile`, `Dockerfile`) are rejected.
pub fn is_allowed_file(filename: &str) -> bool {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename);

    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        }
        _ => false,
    }
}

/// Glob patterns equivalent to the extension allow-list
pub fn allowed_file_patterns() -> Vec<String> {
    ALLOWED_EXTENSIONS
        .iter()
        .map(|ext| format!("*.{}", ext))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// ResourceProfile
// ═══════════════════════════════════════════════════════════════════════════
// Fixed isolation settings every sandbox runs under. Container backends turn
// it into runtime flags, the local backend into cgroup files and pre-exec
// hardening.
//
// ```text
// ┌──────────────────────┬────────────────────────────────────────────┐
// │ privileged           │ false                                      │
// │ cap_drop / cap_add   │ ["ALL"] / []                               │
// │ security_opt         │ ["no-new-privileges"]                      │
// │ memory / memory+swap │ 1 GiB / 1 GiB (no swap beyond memory)      │
// │ cpu                  │ 50000us per 100000us period (half a core)  │
// └──────────────────────┴────────────────────────────────────────────┘
// ```
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceProfile {
    pub privileged: bool,
    pub cap_drop: Vec<String>,
    pub cap_add: Vec<String>,
    pub security_opt: Vec<String>,
    /// Hard memory limit in bytes
    pub memory_bytes: u64,
    /// Memory plus swap limit in bytes
    pub memory_swap_bytes: u64,
    /// CPU quota in microseconds per `cpu_period_us`
    pub cpu_quota_us: u64,
    pub cpu_period_us: u64,
}

impl ResourceProfile {
    pub fn standard() -> Self {
        Self {
            privileged: false,
            cap_drop: vec!["ALL".to_string()],
            cap_add: Vec::new(),
            security_opt: vec!["no-new-privileges".to_string()],
            memory_bytes: 1024 * 1024 * 1024,
            memory_swap_bytes: 1024 * 1024 * 1024,
            cpu_quota_us: 50_000,
            cpu_period_us: 100_000,
        }
    }

    /// Fraction of a single core, e.g. 0.5
    pub fn cpu_cores(&self) -> f64 {
        self.cpu_quota_us as f64 / self.cpu_period_us as f64
    }

    /// Swap allowed on top of the memory limit (cgroup v2 `memory.swap.max`)
    pub fn swap_bytes(&self) -> u64 {
        self.memory_swap_bytes.saturating_sub(self.memory_bytes)
    }

    pub fn no_new_privileges(&self) -> bool {
        self.security_opt.iter().any(|o| o == "no-new-privileges")
    }

    /// Flags for `docker run` / `podman run`
    pub fn container_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.privileged {
            args.push("--privileged".to_string());
        }
        for cap in &self.cap_drop {
            args.push(format!("--cap-drop={}", cap));
        }
        for cap in &self.cap_add {
            args.push(format!("--cap-add={}", cap));
        }
        for opt in &self.security_opt {
            args.push(format!("--security-opt={}", opt));
        }
        args.push(format!("--memory={}", self.memory_bytes));
        args.push(format!("--memory-swap={}", self.memory_swap_bytes));
        args.push(format!("--cpu-period={}", self.cpu_period_us));
        args.push(format!("--cpu-quota={}", self.cpu_quota_us));
        args
    }
}

impl Default for ResourceProfile {
    fn default() -> Self {
        Self::standard()
    }
}

/// The fixed profile every sandbox environment is created with
pub fn resource_profile() -> ResourceProfile {
    ResourceProfile::standard()
}
