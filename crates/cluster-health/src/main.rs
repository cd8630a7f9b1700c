//! cluster-health CLI.
//!
//! Runs the reference health suite against a k3s cluster with ArgoCD and
//! Longhorn installed, and reports which expectations hold.

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::check::CheckCommand;
use commands::list::ListCommand;

/// Kubernetes cluster health checks.
#[derive(Parser)]
#[command(
    name = "cluster-health",
    version,
    about = "Check that a cluster and its platform apps are healthy",
    long_about = "Evaluate declarative health expectations against a running cluster.\n\n\
                  Nodes, system pods, ArgoCD and Longhorn are checked concurrently;\n\
                  readiness and endpoint checks are retried before they fail.\n\n\
                  Nothing in the cluster is modified."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the health suite against the cluster.
    ///
    /// Exits non-zero if any expectation fails or the run is interrupted.
    Check(CheckCommand),

    /// Print the suite without contacting the cluster.
    List(ListCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("info,cluster_health=debug")
    } else {
        EnvFilter::new("warn,cluster_health=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Check(cmd) => cmd.run().await,
        Commands::List(cmd) => cmd.run(),
    }
}
