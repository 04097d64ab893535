//! dbplane operator - reconciles database Components into Kubernetes workloads

mod controller_runner;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dbplane_common::crd::{Cluster, Component};
use dbplane_common::telemetry::{init_telemetry, TelemetryConfig};
use dbplane_common::OperatorConfig;
use kube::{Client, CustomResourceExt};

/// dbplane - database component operator
#[derive(Parser, Debug)]
#[command(name = "dbplane", version, about, long_about = None)]
struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// YAML file with operator settings; flags override it
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Deadline for one reconciliation pass, in seconds
    #[arg(long, value_name = "SECS")]
    pass_timeout_secs: Option<u64>,

    /// Copy the compatibility label set onto every owned object
    #[arg(long)]
    compatibility_labels: bool,

    /// Human-readable logs instead of JSON
    #[arg(long)]
    plain_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the component controller (default mode)
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        for crd in [Component::crd(), Cluster::crd()] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        service_name: "dbplane-operator".to_string(),
        json: !cli.plain_logs,
        filter: None,
    })?;

    let config = load_config(&cli)?;
    match cli.command {
        Some(Commands::Controller) | None => run_controller(config).await,
    }
}

/// Resolve operator settings: defaults, then the config file, then flags
fn load_config(cli: &Cli) -> anyhow::Result<OperatorConfig> {
    let mut config = match &cli.config {
        Some(path) => OperatorConfig::from_file(path)?,
        None => OperatorConfig::default(),
    };
    if let Some(secs) = cli.pass_timeout_secs {
        config.pass_timeout = Duration::from_secs(secs);
    }
    if cli.compatibility_labels {
        config.features.compatibility_labels = true;
    }
    config.validate()?;
    Ok(config)
}

async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    tracing::info!(
        pass_timeout = ?config.pass_timeout,
        compatibility_labels = config.features.compatibility_labels,
        "Starting dbplane controllers"
    );
    controller_runner::build_component_controller(client, config).await;

    tracing::info!("Controller shut down");
    Ok(())
}
