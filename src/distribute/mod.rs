//! Distribution of generated identities and agent configuration
//!
//! [`plan_distribution`] is a pure mapping from artifacts to destinations;
//! [`distribute`] executes it. The agent configuration is serialized to a
//! single local file before any copy is dispatched.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::{ClusterTopology, NodeRef};
use crate::provision::{naming, NodeIdentityMap};
use crate::rollout::fanout::FanOut;
use crate::rollout::outcome::{RolloutOutcome, Stage};
use crate::transport::{SharedTransport, TransportError};

/// Directory on every node holding certificates and agent config
pub const REMOTE_CERT_DIR: &str = "/etc/flocker";

#[derive(Error, Debug)]
pub enum DistributionError {
    #[error("Failed to serialize agent config: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No node certificate was generated for agent {0}")]
    MissingIdentity(String),

    #[error("Copy to control node {node}:{remote} failed: {source}")]
    ControlCopy {
        node: String,
        remote: String,
        #[source]
        source: TransportError,
    },
}

/// One file to copy: `local` is relative to the work directory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CopyTask {
    pub node: String,
    pub local: String,
    pub remote: String,
}

impl CopyTask {
    fn new(node: &str, local: impl Into<String>, remote_name: &str) -> Self {
        Self {
            node: node.to_string(),
            local: local.into(),
            remote: remote_path(remote_name),
        }
    }
}

pub fn remote_path(name: &str) -> String {
    format!("{}/{}", REMOTE_CERT_DIR, name)
}

/// Destination plan, grouped by node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionPlan {
    pub control: Vec<CopyTask>,
    /// Agent public address and its copies, in topology order
    pub agents: Vec<(NodeRef, Vec<CopyTask>)>,
}

impl DistributionPlan {
    pub fn all(&self) -> impl Iterator<Item = &CopyTask> {
        self.control
            .iter()
            .chain(self.agents.iter().flat_map(|(_, tasks)| tasks.iter()))
    }
}

// ============================================================================
// SBIO: Pure planning (no I/O)
// ============================================================================

/// Map every artifact to its destination node(s) and path.
pub fn plan_distribution(
    topology: &ClusterTopology,
    identities: &NodeIdentityMap,
) -> Result<DistributionPlan, DistributionError> {
    plan_distribution_with(topology, |addr| identities.get(addr).map(naming::node_files))
}

/// Like [`plan_distribution`], with node certificate file names supplied
/// by `node_files` (used to describe a plan before identifiers exist).
pub fn plan_distribution_with<F>(
    topology: &ClusterTopology,
    node_files: F,
) -> Result<DistributionPlan, DistributionError>
where
    F: Fn(&str) -> Option<(String, String)>,
{
    let control_addr = topology.control_node.public_address.as_str();
    let (control_crt, control_key) = naming::control_files(control_addr);

    let control = vec![
        CopyTask::new(control_addr, naming::CLUSTER_CERT, "cluster.crt"),
        CopyTask::new(control_addr, control_crt, "control-service.crt"),
        CopyTask::new(control_addr, control_key, "control-service.key"),
    ];

    let agents = topology
        .agent_nodes
        .iter()
        .map(|node| -> Result<(NodeRef, Vec<CopyTask>), DistributionError> {
            let addr = node.public_address.as_str();
            let (node_crt, node_key) = node_files(addr)
                .ok_or_else(|| DistributionError::MissingIdentity(addr.to_string()))?;

            let tasks = vec![
                CopyTask::new(addr, naming::CLUSTER_CERT, "cluster.crt"),
                CopyTask::new(addr, naming::AGENT_CONFIG, naming::AGENT_CONFIG),
                CopyTask::new(addr, node_crt, "node.crt"),
                CopyTask::new(addr, node_key, "node.key"),
            ];
            Ok((node.clone(), tasks))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DistributionPlan { control, agents })
}

/// Serialize the agent configuration document.
/// This is a pure function - no I/O.
pub fn render_agent_config(topology: &ClusterTopology) -> Result<String, DistributionError> {
    Ok(serde_yaml::to_string(&topology.agent_config)?)
}

// ============================================================================
// I/O
// ============================================================================

async fn write_agent_config(
    topology: &ClusterTopology,
    work_dir: &Path,
) -> Result<PathBuf, DistributionError> {
    let rendered = render_agent_config(topology)?;
    let path = work_dir.join(naming::AGENT_CONFIG);
    tokio::fs::write(&path, rendered)
        .await
        .map_err(|source| DistributionError::Write {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

/// Copy certificates and agent config to every node.
///
/// Control node copies run first and are fatal: without them the control
/// service cannot start. Agent copies fan out, one task per agent, and each
/// agent gets one `certDistribution` outcome.
pub async fn distribute(
    transport: &SharedTransport,
    fanout: &FanOut,
    work_dir: &Path,
    topology: &ClusterTopology,
    identities: &NodeIdentityMap,
) -> Result<Vec<RolloutOutcome>, DistributionError> {
    let plan = plan_distribution(topology, identities)?;

    let config_path = write_agent_config(topology, work_dir).await?;
    info!("Wrote agent config to {}", config_path.display());

    for task in &plan.control {
        transport
            .copy_file(&task.node, &work_dir.join(&task.local), &task.remote)
            .await
            .map_err(|source| DistributionError::ControlCopy {
                node: task.node.clone(),
                remote: task.remote.clone(),
                source,
            })?;
    }
    info!(" * Uploaded cluster cert, control cert & key to control node");

    let agents: Vec<NodeRef> = plan.agents.iter().map(|(node, _)| node.clone()).collect();
    let outcomes = fanout
        .run(Stage::CertDistribution, &agents, |node| {
            let transport = transport.clone();
            let work_dir = work_dir.to_path_buf();
            let tasks = plan
                .agents
                .iter()
                .find(|(n, _)| n.public_address == node.public_address)
                .map(|(_, tasks)| tasks.clone())
                .unwrap_or_default();

            async move {
                for task in &tasks {
                    transport
                        .copy_file(&task.node, &work_dir.join(&task.local), &task.remote)
                        .await?;
                }
                Ok::<_, TransportError>(format!("uploaded {} file(s)", tasks.len()))
            }
        })
        .await;

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_topology;
    use uuid::Uuid;

    fn topology() -> ClusterTopology {
        parse_topology(
            r#"
cluster_name: demo
control_node: 10.0.0.10
agent_nodes:
  - {public: 10.0.0.1, private: 172.16.0.1}
  - {public: 10.0.0.2, private: 172.16.0.2}
users: [alice]
os: centos
agent_config:
  version: 1
  dataset: {backend: loopback}
"#,
        )
        .unwrap()
    }

    fn identities(topology: &ClusterTopology) -> NodeIdentityMap {
        let mut map = NodeIdentityMap::default();
        for node in &topology.agent_nodes {
            map.insert(&node.public_address, Uuid::new_v4()).unwrap();
        }
        map
    }

    #[test]
    fn test_control_plan() {
        let topology = topology();
        let plan = plan_distribution(&topology, &identities(&topology)).unwrap();
        let remotes: Vec<_> = plan.control.iter().map(|t| t.remote.as_str()).collect();
        assert_eq!(
            remotes,
            vec![
                "/etc/flocker/cluster.crt",
                "/etc/flocker/control-service.crt",
                "/etc/flocker/control-service.key",
            ]
        );
        assert!(plan.control.iter().all(|t| t.node == "10.0.0.10"));
        assert_eq!(plan.control[1].local, "control-10.0.0.10.crt");
    }

    #[test]
    fn test_agent_plan_uses_identity_files() {
        let topology = topology();
        let ids = identities(&topology);
        let plan = plan_distribution(&topology, &ids).unwrap();

        assert_eq!(plan.agents.len(), 2);
        for (node, tasks) in &plan.agents {
            let id = ids.get(&node.public_address).unwrap();
            let crt = tasks.iter().find(|t| t.remote == "/etc/flocker/node.crt").unwrap();
            let key = tasks.iter().find(|t| t.remote == "/etc/flocker/node.key").unwrap();
            assert_eq!(crt.local, format!("{id}.crt"));
            assert_eq!(key.local, format!("{id}.key"));
            assert!(tasks.iter().all(|t| t.node == node.public_address));
        }
    }

    #[test]
    fn test_agent_config_planned_once_per_agent() {
        let topology = topology();
        let plan = plan_distribution(&topology, &identities(&topology)).unwrap();
        let uploads = plan.all().filter(|t| t.local == naming::AGENT_CONFIG).count();
        assert_eq!(uploads, topology.agent_count());
    }

    #[test]
    fn test_missing_identity() {
        let topology = topology();
        let err = plan_distribution(&topology, &NodeIdentityMap::default()).unwrap_err();
        assert!(matches!(err, DistributionError::MissingIdentity(ref a) if a == "10.0.0.1"));
    }

    #[test]
    fn test_render_agent_config() {
        let rendered = render_agent_config(&topology()).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(parsed["dataset"]["backend"], "loopback");
    }
}
