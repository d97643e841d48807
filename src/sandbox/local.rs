//! Process-based sandbox backend
//!
//! Commands run under `/bin/sh -c` with the conversation's workspace
//! directory as cwd. Each child:
//! - leads its own process group, so a timeout kills every descendant
//! - has every capability dropped and `no_new_privs` set before exec
//! - joins the environment's cgroup when the hierarchy is writable
//!
//! The host path of the workspace is exported as `WORKSPACE`; commands
//! should address files relative to the working directory.
//!
//! There is no filesystem isolation: a command can read and write anything
//! the host user can, including other conversations' workspaces. Only the
//! file API is held to `/workspace`. Use a container environment whenever
//! conversations must not see each other.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::environment::{ExecOutput, FileContent, SandboxEnvironment, SandboxError};
use super::workspace::Workspace;
use crate::cgroups::CgroupManager;
use crate::metrics::{SANDBOX_COMMANDS_REJECTED, SANDBOX_EXEC_DURATION};
use crate::security::{sanitize_command, CapabilityDropper, ResourceProfile, WORKSPACE_ROOT};

pub struct LocalEnvironment {
    id: String,
    conversation_id: String,
    workspace: Workspace,
    env: Vec<(String, String)>,
    cgroups: Option<CgroupManager>,
    running: AtomicBool,
}

impl LocalEnvironment {
    /// Prepare the workspace directory and, when possible, the cgroup
    pub fn provision(
        id: String,
        conversation_id: String,
        host_workspace: &Path,
        profile: &ResourceProfile,
        env: Vec<(String, String)>,
    ) -> Result<Self, SandboxError> {
        let workspace = Workspace::create(host_workspace)?;

        let cgroups = match CgroupManager::new().and_then(|m| m.create(&id, profile).map(|_| m)) {
            Ok(manager) => Some(manager),
            Err(e) => {
                warn!(sandbox = %id, error = %e, "cgroups unavailable, running without resource limits");
                None
            }
        };

        warn!(
            sandbox = %id,
            "Local sandbox shares the host filesystem; commands are not isolated from other conversations"
        );
        info!(
            sandbox = %id,
            workspace = %workspace.host_root().display(),
            cgroup = cgroups.is_some(),
            "Local sandbox provisioned"
        );

        Ok(Self {
            id,
            conversation_id,
            workspace,
            env,
            cgroups,
            running: AtomicBool::new(true),
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    async fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> ExecOutput {
        let dropper = CapabilityDropper::drop_all();

        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .env("WORKSPACE", self.workspace.host_root())
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // SAFETY: pre_exec runs after fork() and before exec() in the child.
        // setpgid, capset and prctl are async-signal-safe; the dropper was
        // built in the parent so nothing allocates here.
        unsafe {
            cmd.pre_exec(move || {
                if libc::setpgid(0, 0) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                dropper.apply_in_child()
            });
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ExecOutput::execution_error(e),
        };

        let pid = child.id();
        if let (Some(manager), Some(pid)) = (&self.cgroups, pid) {
            if let Err(e) = manager.add_process(&self.id, pid) {
                warn!(sandbox = %self.id, pid, error = %e, "Failed to add process to cgroup");
            }
        }

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => ExecOutput {
                exit_code: output
                    .status
                    .code()
                    .or_else(|| output.status.signal().map(|s| 128 + s))
                    .unwrap_or(1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            },
            Ok(Err(e)) => ExecOutput::execution_error(e),
            Err(_) => {
                if let Some(pid) = pid {
                    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                        debug!(sandbox = %self.id, pid, error = %e, "Process group already gone");
                    }
                }
                warn!(sandbox = %self.id, timeout_secs = timeout.as_secs(), "Command timed out");
                ExecOutput::timed_out(timeout, String::new())
            }
        }
    }
}

#[async_trait]
impl SandboxEnvironment for LocalEnvironment {
    fn id(&self) -> &str {
        &self.id
    }

    fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    fn workspace_path(&self) -> &Path {
        self.workspace.host_root()
    }

    fn backend(&self) -> &'static str {
        "local"
    }

    async fn execute(
        &self,
        command: &str,
        workdir: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecOutput, SandboxError> {
        let command = sanitize_command(command).map_err(|e| {
            SANDBOX_COMMANDS_REJECTED.inc();
            warn!(sandbox = %self.id, error = %e, "Command rejected");
            e
        })?;

        if !self.running.load(Ordering::SeqCst) {
            return Ok(ExecOutput::execution_error("sandbox is not running"));
        }

        let cwd = match self.workspace.workdir(workdir.unwrap_or(WORKSPACE_ROOT)).await {
            Ok(cwd) => cwd,
            Err(SandboxError::Security(e)) => return Err(e.into()),
            Err(e) => return Ok(ExecOutput::execution_error(e)),
        };

        let start = Instant::now();
        let output = self.run(command, &cwd, timeout).await;
        let elapsed = start.elapsed();

        SANDBOX_EXEC_DURATION
            .with_label_values(&["local"])
            .observe(elapsed.as_secs_f64());
        debug!(
            sandbox = %self.id,
            exit_code = output.exit_code,
            duration_ms = elapsed.as_millis() as u64,
            "Command finished"
        );

        Ok(output)
    }

    async fn read_file(&self, path: &str) -> Result<FileContent, SandboxError> {
        self.workspace.read(path).await
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<bool, SandboxError> {
        self.workspace.write(path, content).await
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.workspace.host_root().is_dir()
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn remove(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(manager) = &self.cgroups {
            if let Err(e) = manager.destroy(&self.id) {
                warn!(sandbox = %self.id, error = %e, "Failed to remove cgroup");
            }
        }
        debug!(sandbox = %self.id, "Local sandbox removed");
    }
}
