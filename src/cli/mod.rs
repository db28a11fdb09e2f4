//! CLI module for clusterup
//!
//! Provides subcommands:
//! - `clusterup certs` - Provision certificates, distribute them, start the control service
//! - `clusterup plugin` - Roll the volume plugin out to every agent
//! - `clusterup rollout` - Both of the above, in order
//! - `clusterup validate` - Check a topology file

use clap::{builder::FalseyValueParser, ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

use crate::config::settings::{
    DEFAULT_AGENT_PORT, DEFAULT_CA_TOOL, DEFAULT_CONTROL_PORT, DEFAULT_DOCKER_BINARY_URL,
    DEFAULT_DOCKER_SERVICE_NAME, DEFAULT_PLUGIN_BRANCH, DEFAULT_PLUGIN_REPO, DEFAULT_SSH_USER,
};
use crate::config::{RolloutSettings, UserCertPolicy};

#[derive(Parser, Debug)]
#[command(name = "clusterup")]
#[command(about = "Provision cluster certificates and roll out the volume plugin")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to a .env file with setting overrides
    #[arg(long, value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log level for this invocation. Rollout commands report each step at
    /// `info`, so that is their floor; `-v` raises it from there.
    pub fn log_filter(&self) -> &'static str {
        let floor = match self.command {
            Commands::Validate(_) => 0,
            _ => 1,
        };
        match floor + self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate certificates, upload them and start the control service
    Certs(RunArgs),

    /// Install and start the volume plugin on every agent
    Plugin(RunArgs),

    /// Run certs then plugin
    Rollout(RunArgs),

    /// Validate a topology file
    Validate(ValidateArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Arguments shared by the rollout commands
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the cluster topology file (YAML or JSON)
    pub topology: PathBuf,

    /// Print the planned actions per node without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    #[command(flatten)]
    pub settings: SettingsArgs,
}

/// Rollout knobs. Each can also be set through its environment variable.
#[derive(Parser, Debug, Clone)]
pub struct SettingsArgs {
    /// Where CoreOS agents download the docker binary from
    #[arg(long, env = "DOCKER_BINARY_URL", default_value = DEFAULT_DOCKER_BINARY_URL)]
    pub docker_binary_url: String,

    /// Docker service name on ubuntu/centos agents
    #[arg(long, env = "DOCKER_SERVICE_NAME", default_value = DEFAULT_DOCKER_SERVICE_NAME)]
    pub docker_service_name: String,

    /// Repository the plugin is built from
    #[arg(long, env = "PLUGIN_REPO", default_value = DEFAULT_PLUGIN_REPO)]
    pub plugin_repo: String,

    /// Branch of the plugin repository
    #[arg(long, env = "PLUGIN_BRANCH", default_value = DEFAULT_PLUGIN_BRANCH)]
    pub plugin_branch: String,

    /// Do not replace the docker binary (pre-baked images)
    #[arg(
        long,
        env = "SKIP_DOCKER_BINARY",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    pub skip_docker_binary: bool,

    /// Do not install the plugin package (pre-baked images)
    #[arg(
        long,
        env = "SKIP_INSTALL_PLUGIN",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    pub skip_install_plugin: bool,

    /// What to do when an API user certificate fails
    #[arg(long, value_enum, default_value_t = UserPolicyArg::Collect)]
    pub user_cert_policy: UserPolicyArg,

    /// Maximum agents worked on concurrently (default: unbounded)
    #[arg(long, value_name = "N")]
    pub max_parallelism: Option<usize>,

    /// Directory holding the CA state and generated files
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub work_dir: PathBuf,

    /// CA tool executable
    #[arg(long, default_value = DEFAULT_CA_TOOL)]
    pub ca_tool: String,

    /// Remote user for ssh/scp
    #[arg(long, default_value = DEFAULT_SSH_USER)]
    pub ssh_user: String,

    /// Private key for ssh/scp
    #[arg(short = 'i', long, value_name = "FILE")]
    pub ssh_identity: Option<PathBuf>,

    /// Control service API port
    #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
    pub control_port: u16,

    /// Control service agent port
    #[arg(long, default_value_t = DEFAULT_AGENT_PORT)]
    pub agent_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UserPolicyArg {
    Collect,
    Abort,
}

impl From<UserPolicyArg> for UserCertPolicy {
    fn from(arg: UserPolicyArg) -> Self {
        match arg {
            UserPolicyArg::Collect => UserCertPolicy::Collect,
            UserPolicyArg::Abort => UserCertPolicy::Abort,
        }
    }
}

impl From<SettingsArgs> for RolloutSettings {
    fn from(args: SettingsArgs) -> Self {
        RolloutSettings {
            docker_binary_url: args.docker_binary_url,
            docker_service_name: args.docker_service_name,
            plugin_repo: args.plugin_repo,
            plugin_branch: args.plugin_branch,
            skip_docker_binary: args.skip_docker_binary,
            skip_install_plugin: args.skip_install_plugin,
            user_cert_policy: args.user_cert_policy.into(),
            max_parallelism: args.max_parallelism,
            work_dir: args.work_dir,
            ca_tool: args.ca_tool,
            ssh_user: args.ssh_user,
            ssh_identity: args.ssh_identity,
            control_port: args.control_port,
            agent_port: args.agent_port,
        }
        .expand_paths()
    }
}

/// Arguments for the validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to the cluster topology file
    pub file: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rollout_defaults() {
        let cli = Cli::parse_from(["clusterup", "rollout", "cluster.yml"]);
        match cli.command {
            Commands::Rollout(args) => {
                assert_eq!(args.topology, PathBuf::from("cluster.yml"));
                assert!(!args.dry_run);
                assert_eq!(args.output, OutputFormat::Text);
                let settings: RolloutSettings = args.settings.into();
                assert_eq!(settings.ca_tool, "flocker-ca");
                assert_eq!(settings.control_port, 4523);
                assert_eq!(settings.user_cert_policy, UserCertPolicy::Collect);
            }
            _ => panic!("Expected Rollout command"),
        }
    }

    #[test]
    fn test_parse_plugin_flags() {
        let cli = Cli::parse_from([
            "clusterup",
            "plugin",
            "cluster.yml",
            "--skip-docker-binary",
            "--max-parallelism",
            "4",
            "--user-cert-policy",
            "abort",
            "-o",
            "json",
        ]);
        match cli.command {
            Commands::Plugin(args) => {
                assert_eq!(args.output, OutputFormat::Json);
                let settings: RolloutSettings = args.settings.into();
                assert!(settings.skip_docker_binary);
                assert!(!settings.skip_install_plugin);
                assert_eq!(settings.max_parallelism, Some(4));
                assert_eq!(settings.user_cert_policy, UserCertPolicy::Abort);
            }
            _ => panic!("Expected Plugin command"),
        }
    }

    #[test]
    fn test_parse_certs_dry_run() {
        let cli = Cli::parse_from(["clusterup", "-v", "certs", "cluster.yml", "--dry-run"]);
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Certs(args) => assert!(args.dry_run),
            _ => panic!("Expected Certs command"),
        }
    }

    #[test]
    fn test_rollout_logs_progress_by_default() {
        let cli = Cli::parse_from(["clusterup", "rollout", "cluster.yml"]);
        assert_eq!(cli.log_filter(), "info");

        let cli = Cli::parse_from(["clusterup", "-vv", "plugin", "cluster.yml"]);
        assert_eq!(cli.log_filter(), "trace");
    }

    #[test]
    fn test_validate_is_quiet_by_default() {
        let cli = Cli::parse_from(["clusterup", "validate", "cluster.yml"]);
        assert_eq!(cli.log_filter(), "warn");

        let cli = Cli::parse_from(["clusterup", "validate", "cluster.yml", "-v"]);
        assert_eq!(cli.log_filter(), "info");
    }

    #[test]
    fn test_parse_validate() {
        let cli = Cli::parse_from(["clusterup", "validate", "cluster.yml"]);
        match cli.command {
            Commands::Validate(args) => assert_eq!(args.file, PathBuf::from("cluster.yml")),
            _ => panic!("Expected Validate command"),
        }
    }
}
