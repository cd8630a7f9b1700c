//! CLI subcommands.

pub mod check;
pub mod list;

use clap::Args;

use cluster_health::{reference_suite, Suite, SuiteOptions};

/// Flags that shape the suite, shared by `check` and `list`.
#[derive(Args, Debug, Clone)]
pub struct SuiteArgs {
    /// ArgoCD UI URL expected to answer 200.
    #[arg(long, env = "ARGOCD_URL", default_value = "https://argocd.example.com")]
    argocd_url: String,

    /// Longhorn UI URL expected to answer 200.
    #[arg(long, env = "LONGHORN_URL", default_value = "https://longhorn.example.com")]
    longhorn_url: String,

    /// Minimum number of registered nodes.
    #[arg(long, env = "MIN_NODES", default_value_t = 2)]
    min_nodes: usize,

    /// Accept self-signed certificates on the UI endpoints.
    #[arg(long, env = "INSECURE_SKIP_TLS_VERIFY", default_value = "false")]
    insecure_skip_tls_verify: bool,

    /// Only run these groups (repeatable).
    #[arg(long = "group", value_name = "NAME")]
    groups: Vec<String>,
}

impl SuiteArgs {
    fn options(&self) -> SuiteOptions {
        SuiteOptions {
            min_nodes: self.min_nodes,
            argocd_url: self.argocd_url.clone(),
            longhorn_url: self.longhorn_url.clone(),
            skip_tls_verify: self.insecure_skip_tls_verify,
            ..SuiteOptions::default()
        }
    }

    /// Build the reference suite, narrowed to `--group` if given.
    fn suite(&self) -> anyhow::Result<Suite> {
        let suite = reference_suite(&self.options())?;
        if self.groups.is_empty() {
            Ok(suite)
        } else {
            Ok(suite.select(&self.groups)?)
        }
    }
}
