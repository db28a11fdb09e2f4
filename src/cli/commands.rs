//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{load_topology_file, ClusterTopology, ConfigError, RolloutSettings};
use crate::distribute::DistributionError;
use crate::rollout::{
    plan_rollout, Orchestrator, PlannedAction, RolloutError, RolloutMode, RolloutReport,
};
use crate::transport::{SharedTransport, SshTransport};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rollout aborted: {0}")]
    Rollout(#[from] RolloutError),

    #[error("Planning error: {0}")]
    Plan(#[from] DistributionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Rollout Commands
// ============================================================================

/// Build the ssh/scp transport described by the settings
pub fn ssh_transport(settings: &RolloutSettings) -> SharedTransport {
    let mut transport = SshTransport::new(settings.ssh_user.clone());
    if let Some(identity) = &settings.ssh_identity {
        transport = transport.with_identity(identity.clone());
    }
    Arc::new(transport)
}

/// Run the rollout over `transport`
pub async fn run_rollout(
    topology: ClusterTopology,
    settings: RolloutSettings,
    transport: SharedTransport,
    mode: RolloutMode,
) -> CommandResult<RolloutReport> {
    let orchestrator = Orchestrator::new(topology, settings, transport);
    Ok(orchestrator.run(mode).await?)
}

/// Describe a rollout without running it
pub fn dry_run(
    topology: &ClusterTopology,
    settings: &RolloutSettings,
    mode: RolloutMode,
) -> CommandResult<Vec<PlannedAction>> {
    Ok(plan_rollout(topology, settings, mode)?)
}

// ============================================================================
// Validate Commands
// ============================================================================

/// Validate a topology file
pub fn validate_topology_file(path: &Path) -> ValidationResult {
    match load_topology_file(path) {
        Ok(topology) => ValidationResult {
            valid: true,
            agents: topology.agent_count(),
            users: topology.users.len(),
            topology: Some(topology),
            error: None,
        },
        Err(e) => ValidationResult {
            valid: false,
            agents: 0,
            users: 0,
            topology: None,
            error: Some(e.to_string()),
        },
    }
}

/// Result of validating a topology
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub agents: usize,
    pub users: usize,
    pub topology: Option<ClusterTopology>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_validate_valid_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "cluster_name: demo\ncontrol_node: 10.0.0.10\nagent_nodes: [10.0.0.1]\nusers: [alice]\nos: centos\n"
        )
        .unwrap();

        let result = validate_topology_file(file.path());
        assert!(result.valid);
        assert_eq!(result.agents, 1);
        assert_eq!(result.users, 1);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_validate_duplicate_agents() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "cluster_name: demo\ncontrol_node: 10.0.0.10\nagent_nodes: [10.0.0.1, 10.0.0.1]\nos: centos\n"
        )
        .unwrap();

        let result = validate_topology_file(file.path());
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("10.0.0.1"));
    }

    #[test]
    fn test_dry_run_plan() {
        let topology = crate::config::parse_topology(
            "cluster_name: demo\ncontrol_node: 10.0.0.10\nagent_nodes: [10.0.0.1]\nos: ubuntu\n",
        )
        .unwrap();
        let plan = dry_run(&topology, &RolloutSettings::default(), RolloutMode::Full).unwrap();
        assert!(!plan.is_empty());
    }
}
