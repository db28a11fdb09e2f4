//! Cluster certificate provisioning and volume plugin rollout.
//!
//! Generates the cluster's identity certificates with the CA tool,
//! distributes them to the control node and every agent, brings up the
//! control service, then fans out across the agents to install and start
//! the docker volume plugin.

pub mod cli;
pub mod config;
pub mod distribute;
pub mod os;
pub mod provision;
pub mod rollout;
pub mod transport;
