//! Control node bring-up
//!
//! A single sequential actor:
//!
//! ```text
//! Idle -> CertsReady -> ServiceConfigured -> ServiceStarted -> Ready
//!                  \____________________________________________/
//!                     (families without a managed control service)
//! ```
//!
//! Any state may move to `Failed`. Every command failure is fatal for the
//! whole run.

use serde::Serialize;
use tracing::{debug, error, info};

use super::RolloutError;
use crate::config::NodeRef;
use crate::os::{ControlCommand, ControlServiceCommands};
use crate::transport::SharedTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlNodeState {
    Idle,
    CertsReady,
    ServiceConfigured,
    ServiceStarted,
    Ready,
    Failed,
}

impl ControlNodeState {
    pub fn can_transition_to(self, next: ControlNodeState) -> bool {
        use ControlNodeState::*;
        matches!(
            (self, next),
            (Idle, CertsReady)
                | (CertsReady, ServiceConfigured)
                | (CertsReady, Ready)
                | (ServiceConfigured, ServiceStarted)
                | (ServiceStarted, Ready)
                | (Idle | CertsReady | ServiceConfigured | ServiceStarted, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ControlNodeState::Ready | ControlNodeState::Failed)
    }
}

pub struct ControlNode {
    node: NodeRef,
    state: ControlNodeState,
    history: Vec<ControlNodeState>,
}

impl ControlNode {
    pub fn new(node: NodeRef) -> Self {
        Self {
            node,
            state: ControlNodeState::Idle,
            history: vec![ControlNodeState::Idle],
        }
    }

    /// Every state visited, starting with `Idle`
    pub fn history(&self) -> &[ControlNodeState] {
        &self.history
    }

    fn transition(&mut self, next: ControlNodeState) -> Result<(), RolloutError> {
        if !self.state.can_transition_to(next) {
            return Err(RolloutError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("Control node {}: {:?} -> {:?}", self.node, self.state, next);
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Certificates for the control service are on the node
    pub fn certs_ready(&mut self) -> Result<(), RolloutError> {
        self.transition(ControlNodeState::CertsReady)
    }

    async fn run(
        &mut self,
        transport: &SharedTransport,
        cmd: &ControlCommand,
    ) -> Result<(), RolloutError> {
        match transport
            .run_command(&self.node.public_address, &cmd.command)
            .await
        {
            Ok(_) => Ok(()),
            Err(source) => {
                error!("Control node {} failed to {}: {}", self.node, cmd.step, source);
                self.state = ControlNodeState::Failed;
                self.history.push(ControlNodeState::Failed);
                Err(RolloutError::ControlNode {
                    node: self.node.public_address.clone(),
                    step: cmd.step,
                    source,
                })
            }
        }
    }

    /// Configure, start and expose the control service.
    ///
    /// `commands` is `None` for families whose control service is not
    /// managed here; the node then goes straight to `Ready`.
    pub async fn bring_up(
        &mut self,
        transport: &SharedTransport,
        commands: Option<&ControlServiceCommands>,
    ) -> Result<(), RolloutError> {
        let Some(commands) = commands else {
            info!(
                "Control service on {} is not managed for this OS; skipping configure and start",
                self.node
            );
            return self.transition(ControlNodeState::Ready);
        };

        for cmd in &commands.configure {
            self.run(transport, cmd).await?;
        }
        self.transition(ControlNodeState::ServiceConfigured)?;

        self.run(transport, &commands.start).await?;
        self.transition(ControlNodeState::ServiceStarted)?;

        for cmd in &commands.firewall {
            self.run(transport, cmd).await?;
        }
        self.transition(ControlNodeState::Ready)?;

        info!("Configured and started control service on {}, opened firewall", self.node);
        Ok(())
    }
}
