use std::process;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use clusterup::cli::{
    dry_run, format_connectivity_hint, format_plan, format_report, format_topology,
    format_validation_result, run_rollout, ssh_transport, validate_topology_file, Cli, Commands,
    OutputFormat, RunArgs,
};
use clusterup::config::{load_topology_file, RolloutSettings};
use clusterup::rollout::RolloutMode;

#[tokio::main]
async fn main() {
    let mut cli = Cli::parse();

    // Initialize logging
    let filter = cli.log_filter();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified, then re-read the env-backed settings
    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
        cli = Cli::parse();
    }

    let run = match cli.command {
        Commands::Validate(args) => {
            let result = validate_topology_file(&args.file);
            print!(
                "{}",
                format_validation_result(&result, &args.file.display().to_string())
            );
            if let Some(topology) = &result.topology {
                print!("\n{}", format_topology(topology));
            }
            process::exit(if result.valid { 0 } else { 1 });
        }
        Commands::Certs(args) => execute(args, RolloutMode::Certificates).await,
        Commands::Plugin(args) => execute(args, RolloutMode::Plugin).await,
        Commands::Rollout(args) => execute(args, RolloutMode::Full).await,
    };

    let code = match run {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };

    process::exit(code);
}

async fn execute(args: RunArgs, mode: RolloutMode) -> anyhow::Result<i32> {
    let topology = load_topology_file(&args.topology)
        .with_context(|| format!("Failed to load topology file {}", args.topology.display()))?;
    let settings: RolloutSettings = args.settings.into();

    if args.dry_run {
        let plan = dry_run(&topology, &settings, mode)?;
        match args.output {
            OutputFormat::Text => println!("{}", format_plan(&topology, &plan)),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        }
        return Ok(0);
    }

    info!(
        "Rolling out {} agent(s) using {} in {}",
        topology.agent_count(),
        settings.ca_tool,
        settings.work_dir.display()
    );

    let control_port = settings.control_port;
    let transport = ssh_transport(&settings);
    let report = run_rollout(topology, settings, transport, mode).await?;

    match args.output {
        OutputFormat::Text => {
            print!("{}", format_report(&report));
            if let Some(hint) = format_connectivity_hint(&report, control_port) {
                print!("\n{}", hint);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(if report.is_success() { 0 } else { 1 })
}
