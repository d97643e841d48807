//! Container sandbox backend driven through the docker CLI
//!
//! ```text
//! host: {workspace_root}/{conversation_id}  ──bind──►  container: /workspace
//! docker run -d --name {sandbox_id} --cap-drop=ALL --security-opt=no-new-privileges
//!            --memory=1073741824 --memory-swap=1073741824 --cpu-quota=50000
//!            --network none <image> sleep infinity
//! ```
//!
//! File operations go straight to the bind-mounted host directory, so they
//! share the host-side confinement checks of [`Workspace`].

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::catalog::EnvironmentConfig;
use super::environment::{ExecOutput, FileContent, SandboxEnvironment, SandboxError};
use super::workspace::Workspace;
use crate::metrics::{SANDBOX_COMMANDS_REJECTED, SANDBOX_EXEC_DURATION};
use crate::security::{
    normalize_path, sanitize_command, validate_file_path, ResourceProfile, SecurityError,
    WORKSPACE_ROOT,
};

const DOCKER_BIN: &str = "docker";

/// Extra time the host allows on top of the in-container timeout
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Exit code of coreutils `timeout` when the limit was hit
const TIMEOUT_EXIT_CODE: i32 = 124;

/// Whole seconds handed to `timeout`
fn limit_secs(timeout: Duration) -> u64 {
    timeout.as_secs().max(1)
}

/// A 124 exit only means a timeout when the limit was actually reached;
/// commands may exit 124 on their own
fn hit_timeout(exit_code: i32, elapsed: Duration, timeout: Duration) -> bool {
    exit_code == TIMEOUT_EXIT_CODE && elapsed >= timeout
}

pub struct ContainerEnvironment {
    id: String,
    conversation_id: String,
    image: String,
    workspace: Workspace,
}

async fn docker(args: &[String]) -> std::io::Result<Output> {
    Command::new(DOCKER_BIN)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
}

impl ContainerEnvironment {
    /// Start a detached container for the conversation
    ///
    /// A leftover container with the same name (from a crashed process) is
    /// force-removed first.
    pub async fn provision(
        id: String,
        conversation_id: String,
        image: String,
        host_workspace: &Path,
        profile: &ResourceProfile,
        config: &EnvironmentConfig,
    ) -> Result<Self, SandboxError> {
        let workspace = Workspace::create(host_workspace)?;

        let _ = docker(&["rm".into(), "-f".into(), id.clone()]).await;

        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            id.clone(),
            "-v".into(),
            format!("{}:{}", workspace.host_root().display(), WORKSPACE_ROOT),
            "-w".into(),
            WORKSPACE_ROOT.into(),
        ];
        args.extend(profile.container_args());
        if !config.network {
            args.push("--network".into());
            args.push("none".into());
        }
        for (key, value) in &config.env {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
        args.push(image.clone());
        args.extend(["sleep".into(), "infinity".into()]);

        let output = docker(&args)
            .await
            .map_err(|e| SandboxError::Provision(format!("failed to run docker: {}", e)))?;
        if !output.status.success() {
            return Err(SandboxError::Provision(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        info!(
            sandbox = %id,
            image = %image,
            workspace = %workspace.host_root().display(),
            "Container sandbox started"
        );

        Ok(Self {
            id,
            conversation_id,
            image,
            workspace,
        })
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    fn exec_args(&self, command: &str, workdir: &str, timeout: Duration) -> Vec<String> {
        vec![
            "exec".into(),
            "-w".into(),
            workdir.into(),
            self.id.clone(),
            "timeout".into(),
            "-k".into(),
            "1".into(),
            limit_secs(timeout).to_string(),
            "/bin/sh".into(),
            "-c".into(),
            command.into(),
        ]
    }
}

#[async_trait]
impl SandboxEnvironment for ContainerEnvironment {
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
        "container"
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

        let workdir = workdir.unwrap_or(WORKSPACE_ROOT);
        if !validate_file_path(workdir, WORKSPACE_ROOT) {
            return Err(SecurityError::PathOutsideWorkspace {
                path: workdir.to_string(),
                base: WORKSPACE_ROOT.to_string(),
            }
            .into());
        }
        let workdir = normalize_path(workdir)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| WORKSPACE_ROOT.to_string());
        match self.workspace.workdir(&workdir).await {
            Ok(_) => {}
            Err(SandboxError::Security(e)) => return Err(e.into()),
            Err(e) => return Ok(ExecOutput::execution_error(e)),
        }

        let start = Instant::now();
        let args = self.exec_args(command, &workdir, timeout);
        let result = tokio::time::timeout(timeout + TIMEOUT_GRACE, docker(&args)).await;
        let elapsed = start.elapsed();

        SANDBOX_EXEC_DURATION
            .with_label_values(&["container"])
            .observe(elapsed.as_secs_f64());

        let output = match result {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(1);
                ExecOutput {
                    exit_code,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    timed_out: hit_timeout(
                        exit_code,
                        elapsed,
                        Duration::from_secs(limit_secs(timeout)),
                    ),
                }
            }
            Ok(Err(e)) => ExecOutput::execution_error(e),
            Err(_) => ExecOutput::timed_out(timeout, String::new()),
        };

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
        let args = [
            "inspect".to_string(),
            "-f".to_string(),
            "{{.State.Running}}".to_string(),
            self.id.clone(),
        ];
        match docker(&args).await {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim() == "true"
            }
            Ok(_) => false,
            Err(e) => {
                debug!(sandbox = %self.id, error = %e, "Liveness check failed");
                false
            }
        }
    }

    async fn stop(&self) {
        let args = ["stop".to_string(), "-t".to_string(), "2".to_string(), self.id.clone()];
        match docker(&args).await {
            Ok(output) if !output.status.success() => {
                warn!(
                    sandbox = %self.id,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "docker stop failed"
                );
            }
            Err(e) => warn!(sandbox = %self.id, error = %e, "docker stop failed"),
            Ok(_) => {}
        }
    }

    async fn remove(&self) {
        let args = ["rm".to_string(), "-f".to_string(), self.id.clone()];
        match docker(&args).await {
            Ok(output) if output.status.success() => {
                debug!(sandbox = %self.id, "Container removed");
            }
            Ok(output) => warn!(
                sandbox = %self.id,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "docker rm failed"
            ),
            Err(e) => warn!(sandbox = %self.id, error = %e, "docker rm failed"),
        }
    }
}
