//! `ssh`/`scp` backed transport
//!
//! Commands are spawned with `tokio::process::Command`; a non-zero exit
//! status becomes a [`TransportError`] carrying the captured stderr.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{Transport, TransportError, LOCALHOST};

/// Options shared by ssh and scp. Cluster nodes are usually freshly
/// provisioned, so their host keys are never known in advance.
const SSH_OPTIONS: &[&str] = &[
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "LogLevel=ERROR",
];

#[derive(Debug, Clone)]
pub struct SshTransport {
    user: String,
    identity: Option<PathBuf>,
}

impl SshTransport {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<PathBuf>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    fn common_args(&self) -> Vec<String> {
        let mut args: Vec<String> = SSH_OPTIONS.iter().map(|s| s.to_string()).collect();
        if let Some(identity) = &self.identity {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().into_owned());
        }
        args
    }

    // ========================================================================
    // SBIO: Pure argument builders (no I/O)
    // ========================================================================

    /// Arguments for `ssh` running `command` on `node`
    pub fn ssh_args(&self, node: &str, command: &str) -> Vec<String> {
        let mut args = self.common_args();
        args.push(format!("{}@{}", self.user, node));
        args.push(command.to_string());
        args
    }

    /// Arguments for `scp` copying `local` to `node:remote`
    pub fn scp_args(&self, node: &str, local: &Path, remote: &str) -> Vec<String> {
        let mut args = self.common_args();
        args.push(local.to_string_lossy().into_owned());
        args.push(format!("{}@{}:{}", self.user, node, remote));
        args
    }
}

fn check_output(node: &str, command: &str, output: Output) -> Result<String, TransportError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(TransportError::CommandFailed {
            node: node.to_string(),
            command: command.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[async_trait]
impl Transport for SshTransport {
    async fn run_local(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<String, TransportError> {
        debug!("Running locally in {}: {} {:?}", cwd.display(), program, args);

        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| TransportError::Spawn {
                node: LOCALHOST.to_string(),
                program: program.to_string(),
                message: e.to_string(),
            })?;

        let command = format!("{} {}", program, args.join(" "));
        check_output(LOCALHOST, command.trim(), output)
    }

    async fn copy_file(
        &self,
        node: &str,
        local: &Path,
        remote: &str,
    ) -> Result<(), TransportError> {
        debug!("Copying {} to {}:{}", local.display(), node, remote);

        let output = Command::new("scp")
            .args(self.scp_args(node, local, remote))
            .output()
            .await
            .map_err(|e| TransportError::Spawn {
                node: node.to_string(),
                program: "scp".to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(TransportError::CopyFailed {
                node: node.to_string(),
                local: local.display().to_string(),
                remote: remote.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }

    async fn run_command(&self, node: &str, command: &str) -> Result<String, TransportError> {
        debug!("Running on {}: {}", node, command);

        let output = Command::new("ssh")
            .args(self.ssh_args(node, command))
            .output()
            .await
            .map_err(|e| TransportError::Spawn {
                node: node.to_string(),
                program: "ssh".to_string(),
                message: e.to_string(),
            })?;

        check_output(node, command, output)
    }
}
