//! Netperf operator - pod-to-pod throughput benchmarks on Kubernetes

use clap::{Parser, Subcommand};

use netperf_common::telemetry::{init_telemetry, TelemetryConfig};
use netperf_operator::config::RunArgs;
use netperf_operator::startup::{crds, log_build_info};

/// Runs netperf between two pods for every Netperf object and records the
/// measured throughput on its status
#[derive(Parser, Debug)]
#[command(name = "netperf-operator", version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    Run(RunArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider - FIPS-validated aws-lc-rs
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install crypto provider: {:?}. \
             The operator cannot reach the API server without a working TLS implementation.",
            e
        );
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crds::crd_yaml()?);
        return Ok(());
    }

    let _telemetry = init_telemetry(TelemetryConfig::default())?;
    log_build_info();

    let args = match cli.command {
        Some(Commands::Run(args)) => args,
        None => cli.run,
    };
    netperf_operator::run(args).await
}
