//! # Rollout orchestration
//!
//! Decides what runs on which node, in what order and with what
//! concurrency.
//!
//! ```text
//!   provision (serial, local CA tool)
//!        │
//!   distribute ── control copies (serial, fatal)
//!        │     └─ agent copies   (fan-out)
//!        │
//!   control node bring-up (serial, fatal)
//!        │
//!   agent fan-out:  A binaryReplace ─▶ B pluginCert ─▶ C certUpload
//!                   ─▶ D pluginInstall ─▶ E pluginLaunch
//! ```
//!
//! Fatal errors end the run with a [`RolloutError`]. Per-agent failures are
//! recorded as [`RolloutOutcome`]s and surface in the final [`RolloutReport`].

pub mod agents;
pub mod control;
pub mod fanout;
pub mod outcome;
pub mod plan;
pub mod report;

pub use agents::{AgentRollout, AgentRolloutResult};
pub use control::{ControlNode, ControlNodeState};
pub use fanout::FanOut;
pub use outcome::{OutcomeStatus, RolloutOutcome, Stage};
pub use plan::{plan_rollout, PlannedAction};
pub use report::{RolloutReport, UserCertFailure};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ClusterTopology, RolloutSettings};
use crate::distribute::{distribute, DistributionError};
use crate::os::{command_set, CommandSet, ControlStep};
use crate::provision::{provision, CaTool, ProvisioningError};
use crate::transport::{SharedTransport, TransportError};

/// Errors that stop the whole run
#[derive(Error, Debug)]
pub enum RolloutError {
    #[error("Provisioning failed: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error("Distribution failed: {0}")]
    Distribution(#[from] DistributionError),

    #[error("Control node {node} failed to {step}: {source}")]
    ControlNode {
        node: String,
        step: ControlStep,
        #[source]
        source: TransportError,
    },

    #[error("Illegal control node transition from {from:?} to {to:?}")]
    IllegalTransition {
        from: ControlNodeState,
        to: ControlNodeState,
    },
}

/// Which part of the rollout to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloutMode {
    /// Certificates, distribution and control node bring-up
    Certificates,
    /// Agent fan-out only; the CA must already exist in the work directory
    Plugin,
    /// Both, in order
    Full,
}

impl RolloutMode {
    pub fn deploys_certificates(self) -> bool {
        matches!(self, RolloutMode::Certificates | RolloutMode::Full)
    }

    pub fn installs_plugin(self) -> bool {
        matches!(self, RolloutMode::Plugin | RolloutMode::Full)
    }
}

pub struct Orchestrator {
    topology: ClusterTopology,
    settings: RolloutSettings,
    commands: CommandSet,
    transport: SharedTransport,
    fanout: FanOut,
}

impl Orchestrator {
    pub fn new(
        topology: ClusterTopology,
        settings: RolloutSettings,
        transport: SharedTransport,
    ) -> Self {
        let commands = command_set(topology.os, &settings);
        let fanout = FanOut::from_limit(settings.max_parallelism);
        Self {
            topology,
            settings,
            commands,
            transport,
            fanout,
        }
    }

    fn ca(&self) -> CaTool {
        CaTool::new(
            self.transport.clone(),
            self.settings.ca_tool.clone(),
            self.settings.work_dir.clone(),
        )
    }

    pub async fn run(&self, mode: RolloutMode) -> Result<RolloutReport, RolloutError> {
        let mut report = RolloutReport::new(&self.topology, self.settings.plugin_source());
        let ca = self.ca();

        info!(
            "Starting {:?} rollout of cluster '{}' ({}, {} agent(s))",
            mode,
            self.topology.cluster_name,
            self.topology.os,
            self.topology.agent_count()
        );

        if mode.deploys_certificates() {
            self.deploy_certificates(&ca, &mut report).await?;
        }

        if mode.installs_plugin() {
            let result = AgentRollout {
                topology: &self.topology,
                settings: &self.settings,
                commands: &self.commands,
                transport: &self.transport,
                fanout: &self.fanout,
                ca: &ca,
            }
            .run()
            .await;

            for artifact in result.plugin_artifacts {
                report.artifacts.push(artifact);
            }
            report.record(result.outcomes);
        }

        report.finish();
        if report.is_success() {
            info!("Done!");
        } else {
            warn!("Rollout finished with {} failure(s)", report.failure_count());
        }
        Ok(report)
    }

    async fn deploy_certificates(
        &self,
        ca: &CaTool,
        report: &mut RolloutReport,
    ) -> Result<(), RolloutError> {
        let provisioned = provision(ca, &self.topology, self.settings.user_cert_policy).await?;
        report.user_failures = provisioned
            .user_failures
            .iter()
            .map(UserCertFailure::from)
            .collect();
        report.artifacts = provisioned.artifacts;
        report.identities = provisioned.identities;

        info!("Uploading keys to respective nodes:");
        let outcomes = distribute(
            &self.transport,
            &self.fanout,
            ca.work_dir(),
            &self.topology,
            &report.identities,
        )
        .await?;
        report.record(outcomes);

        let mut control = ControlNode::new(self.topology.control_node.clone());
        control.certs_ready()?;
        control
            .bring_up(&self.transport, self.commands.control_service.as_ref())
            .await?;
        debug!(
            "Control node {} went through {:?}",
            self.topology.control_node,
            control.history()
        );

        Ok(())
    }
}
