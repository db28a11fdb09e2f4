//! Remote action primitives
//!
//! Three operations: run a local command, copy a file to a node, and run a
//! command on a node. Awaiting a call inline is the blocking form; spawning
//! it onto a phase's task set is the deferred form used for fan-out.

pub mod ssh;

pub use ssh::SshTransport;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Node label used in errors for commands run on the operator's machine
pub const LOCALHOST: &str = "localhost";

/// Errors raised by the transport. Every variant names the node involved.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Failed to spawn '{program}' for {node}: {message}")]
    Spawn {
        node: String,
        program: String,
        message: String,
    },

    #[error("Command on {node} exited with code {code}: {command}: {stderr}")]
    CommandFailed {
        node: String,
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Copy of {local} to {node}:{remote} failed: {message}")]
    CopyFailed {
        node: String,
        local: String,
        remote: String,
        message: String,
    },
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a program on the operator's machine and return its stdout
    async fn run_local(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<String, TransportError>;

    /// Copy a local file to `remote` on `node`
    async fn copy_file(&self, node: &str, local: &Path, remote: &str)
        -> Result<(), TransportError>;

    /// Run a shell command on `node` and return its stdout
    async fn run_command(&self, node: &str, command: &str) -> Result<String, TransportError>;
}

pub type SharedTransport = Arc<dyn Transport>;
