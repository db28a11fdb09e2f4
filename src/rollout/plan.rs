//! Dry-run planning
//!
//! Describes what a run would do on each node without touching any of them.
//! Built from the same command table and distribution plan a real run uses.

use serde::Serialize;

use super::RolloutMode;
use crate::config::{ClusterTopology, RolloutSettings};
use crate::distribute::{plan_distribution_with, remote_path, DistributionError};
use crate::os::command_set;
use crate::provision::naming;
use crate::transport::LOCALHOST;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedAction {
    pub phase: &'static str,
    pub node: String,
    pub action: String,
}

impl PlannedAction {
    fn new(phase: &'static str, node: &str, action: impl Into<String>) -> Self {
        Self {
            phase,
            node: node.to_string(),
            action: action.into(),
        }
    }
}

/// List every action a run in `mode` would take, in execution order.
/// This is a pure function - no I/O.
pub fn plan_rollout(
    topology: &ClusterTopology,
    settings: &RolloutSettings,
    mode: RolloutMode,
) -> Result<Vec<PlannedAction>, DistributionError> {
    let commands = command_set(topology.os, settings);
    let ca = settings.ca_tool.as_str();
    let mut plan = Vec::new();

    if mode.deploys_certificates() {
        let phase = "provision";
        plan.push(PlannedAction::new(
            phase,
            LOCALHOST,
            format!("{} initialize {}", ca, topology.cluster_name),
        ));
        plan.push(PlannedAction::new(
            phase,
            LOCALHOST,
            format!(
                "{} create-control-certificate {}",
                ca, topology.control_node.public_address
            ),
        ));
        for node in &topology.agent_nodes {
            plan.push(PlannedAction::new(
                phase,
                LOCALHOST,
                format!("{} create-node-certificate  # for {}", ca, node),
            ));
        }
        for user in &topology.users {
            plan.push(PlannedAction::new(
                phase,
                LOCALHOST,
                format!("{} create-api-certificate {}", ca, user),
            ));
        }

        plan.push(PlannedAction::new(
            "distribute",
            LOCALHOST,
            format!("write {}", naming::AGENT_CONFIG),
        ));
        let distribution = plan_distribution_with(topology, |_| {
            Some(("<node-uuid>.crt".to_string(), "<node-uuid>.key".to_string()))
        })?;
        for task in distribution.all() {
            plan.push(PlannedAction::new(
                "distribute",
                &task.node,
                format!("copy {} -> {}", task.local, task.remote),
            ));
        }

        if let Some(control) = &commands.control_service {
            for cmd in control.sequence() {
                plan.push(PlannedAction::new(
                    "control",
                    &topology.control_node.public_address,
                    cmd.command.clone(),
                ));
            }
        }
    }

    if mode.installs_plugin() {
        if let Some(steps) = commands
            .binary_replacement
            .as_ref()
            .filter(|_| !settings.skip_docker_binary)
        {
            for node in &topology.agent_nodes {
                for step in steps {
                    plan.push(PlannedAction::new(
                        "binaryReplace",
                        &node.public_address,
                        step.clone(),
                    ));
                }
            }
        }

        for node in &topology.agent_nodes {
            plan.push(PlannedAction::new(
                "pluginCert",
                LOCALHOST,
                format!(
                    "{} create-api-certificate {}",
                    ca,
                    naming::plugin_name(&node.public_address)
                ),
            ));
        }

        for node in &topology.agent_nodes {
            let (crt, key) = naming::plugin_files(&node.public_address);
            plan.push(PlannedAction::new(
                "certUpload",
                &node.public_address,
                format!("copy {} -> {}", crt, remote_path("plugin.crt")),
            ));
            plan.push(PlannedAction::new(
                "certUpload",
                &node.public_address,
                format!("copy {} -> {}", key, remote_path("plugin.key")),
            ));
        }

        if let Some(install) = commands
            .install_plugin
            .as_ref()
            .filter(|_| !settings.skip_install_plugin)
        {
            for node in &topology.agent_nodes {
                plan.push(PlannedAction::new(
                    "pluginInstall",
                    &node.public_address,
                    install.clone(),
                ));
            }
        }

        let control_url = topology.control_service_url(settings.control_port);
        for node in &topology.agent_nodes {
            if let Some(launch) = commands.plugin_launch(&control_url, &node.private_address) {
                plan.push(PlannedAction::new(
                    "pluginLaunch",
                    &node.public_address,
                    commands.ensure_socket_dir(),
                ));
                plan.push(PlannedAction::new("pluginLaunch", &node.public_address, launch));
            }
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_topology;

    fn topology(os: &str) -> ClusterTopology {
        parse_topology(&format!(
            "cluster_name: demo\ncontrol_node: 10.0.0.10\nagent_nodes: [10.0.0.1, 10.0.0.2]\nusers: [alice]\nos: {os}\n"
        ))
        .unwrap()
    }

    fn phases(plan: &[PlannedAction]) -> Vec<&'static str> {
        let mut phases: Vec<&'static str> = plan.iter().map(|a| a.phase).collect();
        phases.dedup();
        phases
    }

    #[test]
    fn test_full_ubuntu_plan() {
        let settings = RolloutSettings::default();
        let plan = plan_rollout(&topology("ubuntu"), &settings, RolloutMode::Full).unwrap();
        assert_eq!(
            phases(&plan),
            vec![
                "provision",
                "distribute",
                "control",
                "pluginCert",
                "certUpload",
                "pluginInstall"
            ]
        );
    }

    #[test]
    fn test_coreos_plugin_plan() {
        let settings = RolloutSettings::default();
        let plan = plan_rollout(&topology("coreos"), &settings, RolloutMode::Plugin).unwrap();
        assert_eq!(
            phases(&plan),
            vec!["binaryReplace", "pluginCert", "certUpload", "pluginLaunch"]
        );
        let launches = plan.iter().filter(|a| a.phase == "pluginLaunch").count();
        assert_eq!(launches, 4);
    }

    #[test]
    fn test_skip_flags_remove_phases() {
        let mut settings = RolloutSettings::default();
        settings.skip_docker_binary = true;
        settings.skip_install_plugin = true;

        let coreos = plan_rollout(&topology("coreos"), &settings, RolloutMode::Plugin).unwrap();
        assert!(!coreos.iter().any(|a| a.phase == "binaryReplace"));

        let centos = plan_rollout(&topology("centos"), &settings, RolloutMode::Plugin).unwrap();
        assert!(!centos.iter().any(|a| a.phase == "pluginInstall"));
    }

    #[test]
    fn test_certificates_plan_counts() {
        let settings = RolloutSettings::default();
        let plan =
            plan_rollout(&topology("centos"), &settings, RolloutMode::Certificates).unwrap();
        // init + control + 2 nodes + 1 user
        assert_eq!(plan.iter().filter(|a| a.phase == "provision").count(), 5);
        // write + 3 control copies + 4 per agent
        assert_eq!(plan.iter().filter(|a| a.phase == "distribute").count(), 12);
        assert!(!plan.iter().any(|a| a.phase == "control"));
    }
}
