//! Shared fixtures for the rollout integration tests
//!
//! `RecordingTransport` stands in for ssh/scp and the CA tool. It records
//! every call and can be told to fail specific ones.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use clusterup::config::{parse_topology, ClusterTopology, RolloutSettings};
use clusterup::transport::{SharedTransport, Transport, TransportError, LOCALHOST};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Local { program: String, args: Vec<String> },
    Copy { node: String, local: PathBuf, remote: String },
    Command { node: String, command: String },
}

#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    /// (node, agent.yml contents as read at copy time)
    agent_configs: Mutex<Vec<(String, String)>>,
    failing_copies: Vec<(String, String)>,
    slow_copies: Vec<(String, String, Duration)>,
    failing_commands: Vec<(Option<String>, String)>,
    failing_ca_owners: HashSet<String>,
    malformed_node_output: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail copies to `node` whose remote path contains `remote`
    pub fn fail_copy(mut self, node: &str, remote: &str) -> Self {
        self.failing_copies.push((node.to_string(), remote.to_string()));
        self
    }

    /// Delay copies to `node` whose remote path contains `remote`. Copies
    /// are recorded when they finish, so a slow copy lands late in `calls`.
    pub fn slow_copy(mut self, node: &str, remote: &str, delay: Duration) -> Self {
        self.slow_copies
            .push((node.to_string(), remote.to_string(), delay));
        self
    }

    /// Fail commands on any node that contain `pattern`
    pub fn fail_command(mut self, pattern: &str) -> Self {
        self.failing_commands.push((None, pattern.to_string()));
        self
    }

    /// Fail commands on `node` that contain `pattern`
    pub fn fail_command_on(mut self, node: &str, pattern: &str) -> Self {
        self.failing_commands
            .push((Some(node.to_string()), pattern.to_string()));
        self
    }

    /// Fail `create-api-certificate <owner>`
    pub fn fail_certificate_for(mut self, owner: &str) -> Self {
        self.failing_ca_owners.insert(owner.to_string());
        self
    }

    /// Make `create-node-certificate` print something unparseable
    pub fn malformed_node_output(mut self) -> Self {
        self.malformed_node_output = true;
        self
    }

    pub fn shared(self) -> (Arc<Self>, SharedTransport) {
        let transport = Arc::new(self);
        let shared: SharedTransport = transport.clone();
        (transport, shared)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn copies(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Copy { node, remote, .. } => Some((node, remote)),
                _ => None,
            })
            .collect()
    }

    pub fn commands_on(&self, node: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Command { node: n, command } if n == node => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn remote_commands(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Command { .. }))
            .count()
    }

    pub fn ca_invocations(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Local { args, .. } => Some(args),
                _ => None,
            })
            .collect()
    }

    pub fn agent_configs(&self) -> Vec<(String, String)> {
        self.agent_configs.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn run_local(
        &self,
        program: &str,
        args: &[String],
        _cwd: &Path,
    ) -> Result<String, TransportError> {
        self.record(Call::Local {
            program: program.to_string(),
            args: args.to_vec(),
        });

        let subcommand = args.first().map(String::as_str).unwrap_or_default();
        let owner = args.get(1).cloned().unwrap_or_default();
        if subcommand == "create-api-certificate" && self.failing_ca_owners.contains(&owner) {
            return Err(TransportError::CommandFailed {
                node: LOCALHOST.to_string(),
                command: args.join(" "),
                code: 1,
                stderr: format!("cannot sign {}", owner),
            });
        }

        match subcommand {
            "create-node-certificate" if self.malformed_node_output => {
                Ok("Usage: flocker-ca create-node-certificate [options]\n".to_string())
            }
            "create-node-certificate" => Ok(format!(
                "Created {}.crt. Copy it over to /etc/flocker/node.crt on your node machine and make sure to chmod 0600 it.\n",
                Uuid::new_v4()
            )),
            _ => Ok(String::new()),
        }
    }

    async fn copy_file(
        &self,
        node: &str,
        local: &Path,
        remote: &str,
    ) -> Result<(), TransportError> {
        let delay = self
            .slow_copies
            .iter()
            .find(|(n, r, _)| n == node && remote.contains(r.as_str()))
            .map(|(_, _, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.record(Call::Copy {
            node: node.to_string(),
            local: local.to_path_buf(),
            remote: remote.to_string(),
        });

        if remote.ends_with("agent.yml") {
            let content = std::fs::read_to_string(local).unwrap_or_default();
            self.agent_configs
                .lock()
                .unwrap()
                .push((node.to_string(), content));
        }

        if self
            .failing_copies
            .iter()
            .any(|(n, r)| n == node && remote.contains(r.as_str()))
        {
            return Err(TransportError::CopyFailed {
                node: node.to_string(),
                local: local.display().to_string(),
                remote: remote.to_string(),
                message: "Connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn run_command(&self, node: &str, command: &str) -> Result<String, TransportError> {
        self.record(Call::Command {
            node: node.to_string(),
            command: command.to_string(),
        });

        let fails = self.failing_commands.iter().any(|(n, pattern)| {
            n.as_deref().map_or(true, |n| n == node) && command.contains(pattern.as_str())
        });
        if fails {
            return Err(TransportError::CommandFailed {
                node: node.to_string(),
                command: command.to_string(),
                code: 100,
                stderr: "E: simulated failure".to_string(),
            });
        }
        Ok(String::new())
    }
}

/// A topology with the control node at 10.0.0.10 and agents 10.0.0.1..=n
pub fn topology(os: &str, agents: usize, users: &[&str]) -> ClusterTopology {
    let agents: Vec<String> = (1..=agents)
        .map(|i| format!("    - public: 10.0.0.{i}\n      private: 172.16.0.{i}\n"))
        .collect();
    let agent_nodes = if agents.is_empty() {
        "agent_nodes: []\n".to_string()
    } else {
        format!("agent_nodes:\n{}", agents.concat())
    };
    let users = format!(
        "users: [{}]\n",
        users.join(", ")
    );
    parse_topology(&format!(
        "cluster_name: demo\ncontrol_node: 10.0.0.10\n{agent_nodes}{users}os: {os}\n\
         agent_config:\n  version: 1\n  control-service:\n    hostname: 10.0.0.10\n    port: 4524\n"
    ))
    .unwrap()
}

pub fn settings(work_dir: &Path) -> RolloutSettings {
    RolloutSettings::default().with_work_dir(work_dir)
}
