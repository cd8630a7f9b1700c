//! Check command - evaluate the suite against a live cluster.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use cluster_health::{
    kubeconfig, ExpectationEvaluator, HealthCheckRunner, HttpsProber, KubeClusterClient,
    ProbeConfig, RunnerConfig,
};

use super::SuiteArgs;

/// Run the health suite.
#[derive(Args)]
pub struct CheckCommand {
    /// Path to kubeconfig file (defaults to ~/.kube/config).
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use instead of the current one.
    #[arg(long, env = "KUBE_CONTEXT")]
    context: Option<String>,

    #[command(flatten)]
    suite: SuiteArgs,

    /// Maximum number of checks evaluated at once (unbounded if unset).
    #[arg(long, env = "CLUSTER_HEALTH_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Seconds in-flight checks may keep running after an interrupt.
    #[arg(long, env = "CLUSTER_HEALTH_GRACE_PERIOD_SECS", default_value_t = 5)]
    grace_period_secs: u64,

    /// Cancel the run after this many seconds.
    #[arg(long, env = "CLUSTER_HEALTH_DEADLINE_SECS")]
    deadline_secs: Option<u64>,

    /// Seconds a single `kubectl get` may run before it counts as a transient failure.
    #[arg(long, env = "CLUSTER_HEALTH_KUBECTL_TIMEOUT_SECS", default_value_t = 30)]
    kubectl_timeout_secs: u64,

    /// Per-request timeout for endpoint probes.
    #[arg(long, env = "CLUSTER_HEALTH_HTTP_TIMEOUT_SECS", default_value_t = 10)]
    http_timeout_secs: u64,

    /// Output report as JSON.
    #[arg(long, default_value = "false")]
    json: bool,
}

impl CheckCommand {
    /// Run the check command.
    ///
    /// # Errors
    ///
    /// Returns an error if the suite is invalid, the cluster client cannot be
    /// built, or any expectation does not hold.
    pub async fn run(&self) -> Result<()> {
        let suite = self.suite.suite()?;
        let path = kubeconfig::resolve(self.kubeconfig.clone())?;

        info!(
            kubeconfig = %path.display(),
            context = self.context.as_deref().unwrap_or("<current>"),
            checks = suite.len(),
            "Starting cluster health check"
        );

        let client = KubeClusterClient::from_kubeconfig(&path, self.context.as_deref())
            .await?
            .with_kubectl_timeout(Duration::from_secs(self.kubectl_timeout_secs));
        let prober = HttpsProber::new(&ProbeConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
        })
        .context("Failed to create HTTP client")?;

        let runner = HealthCheckRunner::new(
            ExpectationEvaluator::new(Arc::new(client), prober),
            RunnerConfig {
                concurrency: self.concurrency,
                grace_period: Duration::from_secs(self.grace_period_secs),
            },
        );

        let handle = runner.cancel_handle();
        let deadline = self.deadline_secs.map(Duration::from_secs);
        let watcher = tokio::spawn(async move {
            let expired = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => warn!("Interrupted, cancelling health checks"),
                () = expired => warn!("Deadline reached, cancelling health checks"),
            }
            handle.cancel();
        });

        let report = runner.run(&suite).await;
        watcher.abort();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            report.print_summary();
        }

        if report.is_success() {
            Ok(())
        } else if !report.complete {
            anyhow::bail!(
                "Health check was cancelled with {} of {} checks passed",
                report.passed_count(),
                report.total_checks()
            );
        } else {
            anyhow::bail!(
                "Health check found {} failed and {} errored checks",
                report.failed_count(),
                report.error_count()
            );
        }
    }
}
