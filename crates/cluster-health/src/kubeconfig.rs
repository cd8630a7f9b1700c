//! Kubeconfig discovery and Kubernetes client construction.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

/// Get the default kubeconfig path (~/.kube/config).
#[must_use]
pub fn default_kubeconfig_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".kube").join("config"))
}

/// Pick the kubeconfig to use: an explicit path wins over ~/.kube/config.
///
/// # Errors
///
/// Returns an error if no path was given and the home directory is unknown.
pub fn resolve(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => default_kubeconfig_path().context("Could not determine home directory"),
    }
}

/// Build a client from a kubeconfig file, optionally pinning a context.
///
/// # Errors
///
/// Returns an error if the file cannot be read, the context does not exist,
/// or the client cannot be created.
pub async fn build_client(path: &Path, context: Option<&str>) -> Result<Client> {
    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("Failed to read kubeconfig from {}", path.display()))?;

    let options = KubeConfigOptions {
        context: context.map(ToString::to_string),
        ..KubeConfigOptions::default()
    };
    let config = Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .context("Failed to create Kubernetes config from kubeconfig")?;

    debug!(
        kubeconfig = %path.display(),
        context = context.unwrap_or("<current>"),
        cluster_url = %config.cluster_url,
        "Loaded kubeconfig"
    );

    Client::try_from(config).context("Failed to create Kubernetes client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_kubeconfig_path() {
        let path = default_kubeconfig_path();
        assert!(path.is_some());
        let path = path.unwrap();
        assert!(path.to_string_lossy().contains(".kube"));
        assert!(path.to_string_lossy().ends_with("config"));
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = resolve(Some(PathBuf::from("/tmp/lab.yaml"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/lab.yaml"));
    }

    #[tokio::test]
    async fn test_missing_kubeconfig_is_an_error() {
        let err = build_client(Path::new("/nonexistent/kubeconfig"), None)
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/kubeconfig"));
    }
}
