//! `kubectl get` subprocess wrapper for resources without a typed accessor.
//!
//! Only ever issues `get ... -o json`; field projection happens in-process
//! through [`crate::jsonpath`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::ClientError;

/// Thin wrapper around the `kubectl` binary.
#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: PathBuf,
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
    timeout: Duration,
}

impl Default for Kubectl {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("kubectl"),
            kubeconfig: None,
            context: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl Kubectl {
    /// Create a wrapper that talks to the cluster described by `kubeconfig`.
    #[must_use]
    pub fn new(kubeconfig: &Path) -> Self {
        Self {
            kubeconfig: Some(kubeconfig.to_path_buf()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: Option<&str>) -> Self {
        self.context = context.map(ToString::to_string);
        self
    }

    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments for `kubectl get <kind> <name> -o json`.
    fn get_args(&self, namespace: Option<&str>, kind: &str, name: &str) -> Result<Vec<String>, ClientError> {
        for value in [kind, name].into_iter().chain(namespace) {
            if value.is_empty() || value.starts_with('-') {
                return Err(ClientError::Fatal(format!(
                    "malformed query argument {value:?}"
                )));
            }
        }

        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }
        if let Some(context) = &self.context {
            args.push("--context".to_string());
            args.push(context.clone());
        }
        if let Some(namespace) = namespace {
            args.push("--namespace".to_string());
            args.push(namespace.to_string());
        }
        args.extend(["get", kind, name, "-o", "json"].map(String::from));
        Ok(args)
    }

    /// Fetch a single resource as JSON.
    pub async fn get_json(
        &self,
        namespace: Option<&str>,
        kind: &str,
        name: &str,
    ) -> Result<serde_json::Value, ClientError> {
        let args = self.get_args(namespace, kind, name)?;
        debug!(kind, name, namespace = namespace.unwrap_or("-"), "Running kubectl get");

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ClientError::Fatal(format!("failed to spawn {}: {e}", self.binary.display()))
            })?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ClientError::Transient(format!("kubectl failed: {e}"))),
            Err(_) => {
                return Err(ClientError::Transient(format!(
                    "kubectl timed out after {:?}",
                    self.timeout
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_stderr(stderr.trim()));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ClientError::Fatal(format!("kubectl returned invalid JSON: {e}")))
    }
}

/// Map kubectl's error output onto the client error taxonomy.
pub(crate) fn classify_stderr(stderr: &str) -> ClientError {
    let message = if stderr.is_empty() {
        "kubectl exited with an error".to_string()
    } else {
        stderr.to_string()
    };

    // Checked before "not found" since kubectl phrases it "the server doesn't
    // have a resource type".
    if stderr.contains("doesn't have a resource type") {
        return ClientError::Fatal(message);
    }
    if stderr.contains("NotFound") || stderr.contains("not found") {
        return ClientError::NotFound(message);
    }
    if stderr.contains("Unauthorized") || stderr.contains("Forbidden") || stderr.contains("forbidden") {
        return ClientError::Fatal(message);
    }

    const TRANSIENT_MARKERS: [&str; 6] = [
        "i/o timeout",
        "TLS handshake timeout",
        "connection reset",
        "ServiceUnavailable",
        "TooManyRequests",
        "Timeout",
    ];
    if TRANSIENT_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        return ClientError::Transient(message);
    }

    ClientError::Fatal(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found() {
        let err = classify_stderr(
            r#"Error from server (NotFound): storageclasses.storage.k8s.io "longhorn" not found"#,
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn test_classify_unknown_resource_type_is_fatal() {
        let err = classify_stderr(r#"error: the server doesn't have a resource type "storageclas""#);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_classify_auth_failures_are_fatal() {
        assert!(classify_stderr("error: You must be logged in to the server (Unauthorized)").is_fatal());
        assert!(classify_stderr(
            r#"Error from server (Forbidden): storageclasses.storage.k8s.io "longhorn" is forbidden"#
        )
        .is_fatal());
    }

    #[test]
    fn test_classify_timeouts_are_transient() {
        let err = classify_stderr(
            "Unable to connect to the server: net/http: TLS handshake timeout",
        );
        assert!(matches!(err, ClientError::Transient(_)));
    }

    #[test]
    fn test_classify_connection_refused_is_fatal() {
        let err = classify_stderr(
            "The connection to the server 127.0.0.1:6443 was refused - did you specify the right host or port?",
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn test_get_args_with_kubeconfig_and_context() {
        let kubectl = Kubectl::new(Path::new("/tmp/kubeconfig")).with_context(Some("k3s"));
        let args = kubectl.get_args(Some("longhorn-system"), "sc", "longhorn").unwrap();
        assert_eq!(
            args,
            vec![
                "--kubeconfig",
                "/tmp/kubeconfig",
                "--context",
                "k3s",
                "--namespace",
                "longhorn-system",
                "get",
                "sc",
                "longhorn",
                "-o",
                "json"
            ]
        );
    }

    #[test]
    fn test_get_args_rejects_flag_injection() {
        let kubectl = Kubectl::default();
        let err = kubectl.get_args(None, "sc", "--all").unwrap_err();
        assert!(err.is_fatal());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_kubectl_times_out_as_transient() {
        use std::os::unix::fs::PermissionsExt;

        let script = std::env::temp_dir().join(format!("slow-kubectl-{}", std::process::id()));
        std::fs::write(&script, "#!/bin/sh\nsleep 10\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let kubectl = Kubectl::default()
            .with_binary(&script)
            .with_timeout(Duration::from_millis(200));
        let err = kubectl.get_json(None, "sc", "longhorn").await.unwrap_err();
        let _ = std::fs::remove_file(&script);

        assert!(matches!(err, ClientError::Transient(ref msg) if msg.contains("timed out")), "{err:?}");
    }

    #[tokio::test]
    async fn test_missing_binary_is_fatal() {
        let kubectl = Kubectl::default().with_binary("/nonexistent/kubectl-binary");
        let err = kubectl.get_json(None, "sc", "longhorn").await.unwrap_err();
        assert!(err.is_fatal());
    }
}
