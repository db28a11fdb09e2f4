//! Rollout settings
//!
//! Every knob the orchestrator consults lives here with its default as data.
//! The CLI fills this struct from flags and environment variables; the
//! orchestrator itself never reads the process environment.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_DOCKER_BINARY_URL: &str = "https://get.docker.com/builds/Linux/x86_64/docker-latest";
pub const DEFAULT_DOCKER_SERVICE_NAME: &str = "docker-engine";
pub const DEFAULT_PLUGIN_REPO: &str = "https://github.com/clusterhq/flocker-docker-plugin";
pub const DEFAULT_PLUGIN_BRANCH: &str = "master";
pub const DEFAULT_CA_TOOL: &str = "flocker-ca";
pub const DEFAULT_SSH_USER: &str = "root";

/// Control service API port
pub const DEFAULT_CONTROL_PORT: u16 = 4523;

/// Control service agent port
pub const DEFAULT_AGENT_PORT: u16 = 4524;

/// What to do when the CA tool fails for one API user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserCertPolicy {
    /// Keep going, report every failed user at the end
    #[default]
    Collect,
    /// Stop provisioning at the first failed user
    Abort,
}

impl fmt::Display for UserCertPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserCertPolicy::Collect => f.write_str("collect"),
            UserCertPolicy::Abort => f.write_str("abort"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutSettings {
    /// Where CoreOS agents download the replacement docker binary from
    pub docker_binary_url: String,
    /// Name of the docker service unit on ubuntu/centos hosts
    pub docker_service_name: String,
    /// Plugin source, reported in the run summary
    pub plugin_repo: String,
    pub plugin_branch: String,
    /// Images are pre-baked with a suitable docker binary
    pub skip_docker_binary: bool,
    /// Images are pre-baked with the plugin installed
    pub skip_install_plugin: bool,
    pub user_cert_policy: UserCertPolicy,
    /// Upper bound on concurrent per-agent tasks; `None` is unbounded
    pub max_parallelism: Option<usize>,
    /// Local directory holding the CA state and generated files
    pub work_dir: PathBuf,
    pub ca_tool: String,
    pub ssh_user: String,
    pub ssh_identity: Option<PathBuf>,
    pub control_port: u16,
    pub agent_port: u16,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            docker_binary_url: DEFAULT_DOCKER_BINARY_URL.to_string(),
            docker_service_name: DEFAULT_DOCKER_SERVICE_NAME.to_string(),
            plugin_repo: DEFAULT_PLUGIN_REPO.to_string(),
            plugin_branch: DEFAULT_PLUGIN_BRANCH.to_string(),
            skip_docker_binary: false,
            skip_install_plugin: false,
            user_cert_policy: UserCertPolicy::default(),
            max_parallelism: None,
            work_dir: PathBuf::from("."),
            ca_tool: DEFAULT_CA_TOOL.to_string(),
            ssh_user: DEFAULT_SSH_USER.to_string(),
            ssh_identity: None,
            control_port: DEFAULT_CONTROL_PORT,
            agent_port: DEFAULT_AGENT_PORT,
        }
    }
}

impl RolloutSettings {
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_user_cert_policy(mut self, policy: UserCertPolicy) -> Self {
        self.user_cert_policy = policy;
        self
    }

    pub fn with_max_parallelism(mut self, limit: usize) -> Self {
        self.max_parallelism = Some(limit);
        self
    }

    /// Expand `~` and environment references in path settings
    pub fn expand_paths(mut self) -> Self {
        self.work_dir = expand_path(&self.work_dir);
        self.ssh_identity = self.ssh_identity.as_deref().map(expand_path);
        self
    }

    /// Human-readable plugin source, e.g. `repo@branch`
    pub fn plugin_source(&self) -> String {
        format!("{}@{}", self.plugin_repo, self.plugin_branch)
    }
}

fn expand_path(path: &std::path::Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => path.to_path_buf(),
    }
}
