//! # Taskcluster Operator
//!
//! A Kubernetes controller that deploys Taskcluster instances.
//!
//! ## Overview
//!
//! For every `Instance` resource the controller:
//!
//! 1. **Provisions credentials** - Database roles, broker users, client
//!    access tokens and encryption keys, persisted in a state Secret
//! 2. **Renders the chart** - Feeds the assembled values to the Taskcluster
//!    Helm chart
//! 3. **Converges children** - Applies the rendered objects, prunes the ones
//!    that disappeared and reports per-child failures
//! 4. **Upgrades the database** - Runs the `db:upgrade` Job whenever the image
//!    or admin connection changes
//!
//! Metrics and health probes are served on `METRICS_PORT`.

use anyhow::Result;
use clap::Parser;
use taskcluster_operator::config::ControllerConfig;
use taskcluster_operator::runtime::{initialize, run_watch_loop};

/// Command line flags. Anything left unset falls back to the environment.
#[derive(Parser, Debug)]
#[command(name = "taskcluster-operator", version, about = "Taskcluster Kubernetes operator")]
struct Args {
    /// Path to the Taskcluster Helm chart
    #[arg(long, env = "CHART_PATH")]
    chart_path: Option<String>,

    /// Connect to Cloud SQL through its public address
    #[arg(long, env = "USE_PUBLIC_IPS")]
    use_public_ips: Option<bool>,

    /// Port for metrics and health probes
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,
}

impl Args {
    fn apply(self, mut config: ControllerConfig) -> ControllerConfig {
        if let Some(chart_path) = self.chart_path {
            config.chart_path = chart_path;
        }
        if let Some(use_public_ips) = self.use_public_ips {
            config.use_public_ips = use_public_ips;
        }
        if let Some(metrics_port) = self.metrics_port {
            config.metrics_port = metrics_port;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().apply(ControllerConfig::from_env());

    let init_result = initialize(config).await?;

    run_watch_loop(
        init_result.instances,
        init_result.reconciler,
        init_result.server_state,
    )
    .await
}
