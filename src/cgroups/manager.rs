//! cgroup v2 resource isolation for local sandboxes
//!
//! Each sandbox gets its own cgroup under /sys/fs/cgroup/reactbox/{sandbox_id}/
//!
//! ```text
//! /sys/fs/cgroup/                     ← cgroup v2 root
//! └── reactbox/                       ← our namespace
//!     ├── reactbox-sandbox-conv-a/    ← per-sandbox cgroup
//!     │   ├── cpu.max                 ← "50000 100000" = half a core
//!     │   ├── memory.max              ← hard memory limit in bytes
//!     │   ├── memory.swap.max         ← swap on top of memory.max
//!     │   └── cgroup.procs            ← PIDs in this cgroup
//!     └── reactbox-sandbox-conv-b/
//! ```
//!
//! When a process is added to a cgroup, the kernel enforces the limits:
//! - CPU: process gets throttled if it exceeds its quota
//! - Memory: process gets OOM-killed if it exceeds its limit

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::security::ResourceProfile;

/// Base path for cgroup v2 filesystem
const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Our namespace within the cgroup hierarchy
const CGROUP_NAMESPACE: &str = "reactbox";

/// Manages cgroup lifecycle for sandboxes
///
/// # Example
///
/// ```ignore
/// let manager = CgroupManager::new()?;
/// manager.create("reactbox-sandbox-conv-a", &ResourceProfile::standard())?;
/// manager.add_process("reactbox-sandbox-conv-a", child_pid)?;
/// manager.destroy("reactbox-sandbox-conv-a")?;
/// ```
#[derive(Debug)]
pub struct CgroupManager {
    /// Base path: /sys/fs/cgroup/reactbox
    base_path: PathBuf,
}

impl CgroupManager {
    /// Create a new CgroupManager rooted at the default hierarchy
    ///
    /// Creates the namespace directory if needed and enables the cpu and
    /// memory controllers for child cgroups. Requires root or a delegated
    /// cgroup subtree.
    pub fn new() -> io::Result<Self> {
        Self::with_base(PathBuf::from(CGROUP_ROOT).join(CGROUP_NAMESPACE))
    }

    /// Create a manager rooted at an arbitrary (already delegated) directory
    pub fn with_base(base_path: PathBuf) -> io::Result<Self> {
        if !base_path.exists() {
            fs::create_dir_all(&base_path)?;
        }

        // Children can only use controllers enabled in the parent's subtree_control
        fs::write(base_path.join("cgroup.subtree_control"), "+cpu +memory")?;

        Ok(Self { base_path })
    }

    fn group_path(&self, group: &str) -> PathBuf {
        self.base_path.join(group)
    }

    /// Create a cgroup carrying the profile's CPU and memory limits
    pub fn create(&self, group: &str, profile: &ResourceProfile) -> io::Result<()> {
        let cgroup_path = self.group_path(group);

        // The kernel populates the control files when the directory appears
        fs::create_dir_all(&cgroup_path)?;

        let cpu_max = format!("{} {}", profile.cpu_quota_us, profile.cpu_period_us);
        fs::write(cgroup_path.join("cpu.max"), cpu_max)?;

        fs::write(
            cgroup_path.join("memory.max"),
            profile.memory_bytes.to_string(),
        )?;

        // Absent when swap accounting is disabled; memory.max still holds
        let swap_file = cgroup_path.join("memory.swap.max");
        if swap_file.exists() {
            fs::write(swap_file, profile.swap_bytes().to_string())?;
        }

        Ok(())
    }

    /// Move a process (and its future children) into the cgroup
    pub fn add_process(&self, group: &str, pid: u32) -> io::Result<()> {
        fs::write(
            self.group_path(group).join("cgroup.procs"),
            pid.to_string(),
        )
    }

    /// Kill everything left in the cgroup, then remove it
    ///
    /// The kernel refuses to rmdir a cgroup that still has processes, so
    /// `cgroup.kill` (Linux 5.14+) is written first when present.
    pub fn destroy(&self, group: &str) -> io::Result<()> {
        let cgroup_path = self.group_path(group);
        if !cgroup_path.exists() {
            return Ok(());
        }

        let kill_file = cgroup_path.join("cgroup.kill");
        if kill_file.exists() {
            let _ = fs::write(kill_file, "1");
        }

        // rmdir (not rm -rf) - the kernel requires this
        fs::remove_dir(&cgroup_path)
    }

    pub fn exists(&self, group: &str) -> bool {
        self.group_path(group).exists()
    }

    /// Current memory usage of the group in bytes (memory.current)
    pub fn memory_usage(&self, group: &str) -> io::Result<u64> {
        let content = fs::read_to_string(self.group_path(group).join("memory.current"))?;
        content
            .trim()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
