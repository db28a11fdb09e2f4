//! Agent fan-out
//!
//! Phases run in order with a barrier between each: binary replacement,
//! plugin certificate generation, plugin certificate upload, plugin install,
//! plugin container launch. An agent that fails a phase is left out of that
//! phase only; it still takes part in the following ones.

use std::sync::Arc;

use tracing::{info, warn};

use super::fanout::FanOut;
use super::outcome::{RolloutOutcome, Stage};
use crate::config::{ClusterTopology, NodeRef, RolloutSettings};
use crate::distribute::remote_path;
use crate::os::CommandSet;
use crate::provision::{naming, CaTool, IdentityArtifact};
use crate::transport::{SharedTransport, TransportError};

pub struct AgentRollout<'a> {
    pub topology: &'a ClusterTopology,
    pub settings: &'a RolloutSettings,
    pub commands: &'a CommandSet,
    pub transport: &'a SharedTransport,
    pub fanout: &'a FanOut,
    pub ca: &'a CaTool,
}

/// Everything the fan-out produced
#[derive(Debug, Default)]
pub struct AgentRolloutResult {
    pub outcomes: Vec<RolloutOutcome>,
    pub plugin_artifacts: Vec<IdentityArtifact>,
}

/// Run `commands` on `node` one after another, stopping at the first failure
async fn run_sequence(
    transport: SharedTransport,
    node: String,
    commands: Arc<Vec<String>>,
) -> Result<String, TransportError> {
    for command in commands.iter() {
        transport.run_command(&node, command).await?;
    }
    Ok(format!("ran {} command(s)", commands.len()))
}

impl AgentRollout<'_> {
    pub async fn run(&self) -> AgentRolloutResult {
        let mut result = AgentRolloutResult::default();
        let agents = &self.topology.agent_nodes;

        result.outcomes.extend(self.replace_binaries(agents).await);

        let (artifacts, cert_outcomes) = self.generate_plugin_certificates(agents).await;
        result.plugin_artifacts = artifacts;

        // Only agents that received a certificate can upload one
        let with_certs: Vec<NodeRef> = cert_outcomes
            .iter()
            .filter(|o| o.is_ok())
            .map(|o| o.node.clone())
            .collect();
        result.outcomes.extend(cert_outcomes);

        result.outcomes.extend(self.upload_plugin_certificates(&with_certs).await);
        result.outcomes.extend(self.install_plugin(agents).await);
        result.outcomes.extend(self.launch_plugin(agents).await);

        result
    }

    /// Phase A: swap in a docker binary that supports volume plugins.
    /// Each agent's steps run strictly in order; agents run concurrently.
    async fn replace_binaries(&self, agents: &[NodeRef]) -> Vec<RolloutOutcome> {
        if self.settings.skip_docker_binary {
            info!("Skipping docker binary replacement: disabled by settings");
            return Vec::new();
        }
        let Some(steps) = &self.commands.binary_replacement else {
            info!(
                "Skipping docker binary replacement on {}, assuming a sufficiently recent docker is installed",
                self.commands.os
            );
            return Vec::new();
        };

        info!(
            "Replacing docker binary on {} agent(s) from {}",
            agents.len(),
            self.settings.docker_binary_url
        );
        let steps = Arc::new(steps.clone());
        self.fanout
            .run(Stage::BinaryReplace, agents, |node| {
                run_sequence(self.transport.clone(), node.public_address, steps.clone())
            })
            .await
    }

    /// Phase B: one plugin certificate per agent. The CA tool is serial, so
    /// this loop is too; it completing is the barrier before uploads.
    async fn generate_plugin_certificates(
        &self,
        agents: &[NodeRef],
    ) -> (Vec<IdentityArtifact>, Vec<RolloutOutcome>) {
        info!("Generating plugin certs");

        let mut artifacts = Vec::new();
        let mut outcomes = Vec::new();
        for node in agents {
            match self.ca.create_plugin_certificate(&node.public_address).await {
                Ok(artifact) => {
                    info!("Generated plugin certs for {}", node);
                    outcomes.push(RolloutOutcome::ok(
                        node,
                        Stage::PluginCert,
                        artifact.cert_path.display().to_string(),
                    ));
                    artifacts.push(artifact);
                }
                Err(e) => {
                    warn!("Failed to generate plugin certs for {}: {}", node, e);
                    outcomes.push(RolloutOutcome::failed(node, Stage::PluginCert, e.to_string()));
                }
            }
        }
        (artifacts, outcomes)
    }

    /// Phase C: upload each agent's plugin cert then key
    async fn upload_plugin_certificates(&self, agents: &[NodeRef]) -> Vec<RolloutOutcome> {
        info!("Uploading plugin certs...");
        let work_dir = self.ca.work_dir().to_path_buf();

        let outcomes = self
            .fanout
            .run(Stage::CertUpload, agents, |node| {
                let transport = self.transport.clone();
                let work_dir = work_dir.clone();
                async move {
                    let (crt, key) = naming::plugin_files(&node.public_address);
                    for (local, remote) in [(crt, "plugin.crt"), (key, "plugin.key")] {
                        transport
                            .copy_file(
                                &node.public_address,
                                &work_dir.join(local),
                                &remote_path(remote),
                            )
                            .await?;
                    }
                    Ok::<_, TransportError>("uploaded plugin cert and key".to_string())
                }
            })
            .await;

        info!("Uploaded plugin certs");
        outcomes
    }

    /// Phase D: install and start the plugin package
    async fn install_plugin(&self, agents: &[NodeRef]) -> Vec<RolloutOutcome> {
        if self.settings.skip_install_plugin {
            for node in agents {
                info!("Skipping installing plugin on {}: disabled by settings", node);
            }
            return Vec::new();
        }
        let Some(install) = &self.commands.install_plugin else {
            return Vec::new();
        };

        info!("Installing plugin on {} agent(s)", agents.len());
        let steps = Arc::new(vec![install.clone()]);
        self.fanout
            .run(Stage::PluginInstall, agents, |node| {
                info!("Installing plugin for {} ...", node);
                run_sequence(self.transport.clone(), node.public_address, steps.clone())
            })
            .await
    }

    /// Phase E: run the plugin as a container
    async fn launch_plugin(&self, agents: &[NodeRef]) -> Vec<RolloutOutcome> {
        if !self.commands.launches_plugin_container {
            return Vec::new();
        }

        let control_url = self.topology.control_service_url(self.settings.control_port);
        self.fanout
            .run(Stage::PluginLaunch, agents, |node| {
                info!(
                    "Starting plugin container on {} ({} => {})",
                    node, node.public_address, node.private_address
                );
                let mut steps = vec![self.commands.ensure_socket_dir()];
                steps.extend(self.commands.plugin_launch(&control_url, &node.private_address));
                run_sequence(self.transport.clone(), node.public_address, Arc::new(steps))
            })
            .await
    }
}
