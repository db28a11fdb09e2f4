//! OS strategy selector
//!
//! Maps an [`OsFamily`] to the shell snippets every rollout phase needs, so
//! phases consult a table instead of branching on the OS themselves. A field
//! that is `None` means the phase does not apply to that family.

use std::fmt;

use serde::Serialize;

use crate::config::{OsFamily, RolloutSettings};

/// Directory the docker daemon scans for plugin sockets
pub const PLUGIN_SOCKET_DIR: &str = "/run/docker/plugins";

/// Where CoreOS agents keep the replacement docker binary
pub const COREOS_BINARY_DIR: &str = "/root/bin";

const PLUGIN_PACKAGE: &str = "clusterhq-flocker-docker-plugin";
const PLUGIN_SERVICE: &str = "flocker-docker-plugin";
const PLUGIN_IMAGE: &str = "clusterhq/flocker-docker-plugin";

/// A step of the control node bring-up sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlStep {
    WriteOverride,
    RegisterPorts,
    StartService,
    OpenFirewall,
}

impl fmt::Display for ControlStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControlStep::WriteOverride => "write service override",
            ControlStep::RegisterPorts => "register service ports",
            ControlStep::StartService => "start control service",
            ControlStep::OpenFirewall => "open firewall",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlCommand {
    pub step: ControlStep,
    pub command: String,
}

impl ControlCommand {
    fn new(step: ControlStep, command: impl Into<String>) -> Self {
        Self {
            step,
            command: command.into(),
        }
    }
}

/// Commands that configure, start and expose the control service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlServiceCommands {
    pub configure: Vec<ControlCommand>,
    pub start: ControlCommand,
    pub firewall: Vec<ControlCommand>,
}

impl ControlServiceCommands {
    /// All commands in execution order
    pub fn sequence(&self) -> impl Iterator<Item = &ControlCommand> {
        self.configure
            .iter()
            .chain(std::iter::once(&self.start))
            .chain(self.firewall.iter())
    }
}

/// The per-OS command table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandSet {
    pub os: OsFamily,
    /// Tolerates a docker service that is not installed yet
    pub service_stop: String,
    pub service_start: String,
    pub binary_path: String,
    /// Replace the docker binary before installing the plugin (CoreOS)
    pub binary_replacement: Option<Vec<String>>,
    /// Install, enable and start the plugin package (ubuntu/centos)
    pub install_plugin: Option<String>,
    /// Run the plugin as a container (CoreOS)
    pub launches_plugin_container: bool,
    /// Configure and start the control service (ubuntu)
    pub control_service: Option<ControlServiceCommands>,
}

// ============================================================================
// SBIO: Pure functions (no I/O)
// ============================================================================

/// Look up the command table for an OS family.
pub fn command_set(os: OsFamily, settings: &RolloutSettings) -> CommandSet {
    let service = &settings.docker_service_name;

    match os {
        OsFamily::Ubuntu => CommandSet {
            os,
            service_stop: format!("stop {} || true", service),
            service_start: format!("start {}", service),
            binary_path: "/usr/bin/docker".to_string(),
            binary_replacement: None,
            install_plugin: Some(format!(
                "apt-get install -y --force-yes {pkg} && service {svc} restart",
                pkg = PLUGIN_PACKAGE,
                svc = PLUGIN_SERVICE
            )),
            launches_plugin_container: false,
            control_service: Some(control_service_commands(
                settings.control_port,
                settings.agent_port,
            )),
        },
        OsFamily::Centos => CommandSet {
            os,
            service_stop: format!("systemctl stop {}.service || true", service),
            service_start: format!("systemctl start {}.service", service),
            binary_path: "/usr/bin/docker".to_string(),
            binary_replacement: None,
            install_plugin: Some(format!(
                "yum install -y {pkg} && systemctl enable {svc} && systemctl start {svc}",
                pkg = PLUGIN_PACKAGE,
                svc = PLUGIN_SERVICE
            )),
            launches_plugin_container: false,
            control_service: None,
        },
        OsFamily::Coreos => {
            let service_stop = "systemctl stop docker.service || true".to_string();
            let service_start = "systemctl start docker.service".to_string();
            let binary_path = format!("{}/docker", COREOS_BINARY_DIR);

            let binary_replacement = vec![
                service_stop.clone(),
                format!("mkdir -p {}", COREOS_BINARY_DIR),
                format!("wget -qO {} {}", binary_path, settings.docker_binary_url),
                format!("chmod +x {}", binary_path),
                format!("cp /usr/lib/coreos/dockerd {}/dockerd", COREOS_BINARY_DIR),
                "cp /usr/lib/systemd/system/docker.service /etc/systemd/system/".to_string(),
                format!(
                    "sed -i s@/usr/lib/coreos@{}@g /etc/systemd/system/docker.service",
                    COREOS_BINARY_DIR
                ),
                format!(
                    "sed -i 's@exec docker@exec {bin}@g' {dir}/dockerd",
                    bin = binary_path,
                    dir = COREOS_BINARY_DIR
                ),
                "systemctl daemon-reload".to_string(),
                service_start.clone(),
            ];

            CommandSet {
                os,
                service_stop,
                service_start,
                binary_path,
                binary_replacement: Some(binary_replacement),
                install_plugin: None,
                launches_plugin_container: true,
                control_service: None,
            }
        }
    }
}

fn control_service_commands(control_port: u16, agent_port: u16) -> ControlServiceCommands {
    ControlServiceCommands {
        configure: vec![
            ControlCommand::new(
                ControlStep::WriteOverride,
                "cat <<EOF > /etc/init/flocker-control.override\n\
                 start on runlevel [2345]\n\
                 stop on runlevel [016]\n\
                 EOF",
            ),
            ControlCommand::new(
                ControlStep::RegisterPorts,
                format!(
                    "echo 'flocker-control-api       {}/tcp                        # Flocker Control API port' >> /etc/services",
                    control_port
                ),
            ),
            ControlCommand::new(
                ControlStep::RegisterPorts,
                format!(
                    "echo 'flocker-control-agent     {}/tcp                        # Flocker Control Agent port' >> /etc/services",
                    agent_port
                ),
            ),
        ],
        start: ControlCommand::new(ControlStep::StartService, "service flocker-control start"),
        firewall: vec![
            ControlCommand::new(ControlStep::OpenFirewall, "ufw allow flocker-control-api"),
            ControlCommand::new(ControlStep::OpenFirewall, "ufw allow flocker-control-agent"),
        ],
    }
}

impl CommandSet {
    pub fn ensure_socket_dir(&self) -> String {
        format!("mkdir -p {}", PLUGIN_SOCKET_DIR)
    }

    /// The `docker run` invocation that starts the plugin container, if
    /// this family runs the plugin as a container.
    pub fn plugin_launch(
        &self,
        control_service_url: &str,
        private_address: &str,
    ) -> Option<String> {
        if !self.launches_plugin_container {
            return None;
        }

        Some(format!(
            "{bin} run --restart=always -d --net=host --privileged \
             -e FLOCKER_CONTROL_SERVICE_BASE_URL={url} \
             -e MY_NETWORK_IDENTITY={ip} \
             -v /etc/flocker:/etc/flocker \
             -v /run/docker:/run/docker \
             --name={name} \
             {image}",
            bin = self.binary_path,
            url = control_service_url,
            ip = private_address,
            name = PLUGIN_SERVICE,
            image = PLUGIN_IMAGE,
        ))
    }
}
