//! Read-only capability boundary over the Kubernetes API.
//!
//! The evaluator only ever talks to the cluster through [`ClusterClient`].
//! Every failure is classified into [`ClientError`] so callers can tell an
//! absent resource from a flaky connection from a broken setup.

pub mod kube_client;
pub mod kubectl;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::retry::{poll, Attempt, Polled, RetryPolicy};

pub use self::kube_client::KubeClusterClient;
pub use self::kubectl::Kubectl;

/// Classified failure of a cluster query.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Timeout or connection hiccup; a later attempt may succeed.
    #[error("transient error: {0}")]
    Transient(String),

    /// Malformed query, auth failure or unreachable API server.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl ClientError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// A node and its Ready condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub ready: bool,
}

/// A pod with its phase and Ready condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub namespace: String,
    pub name: String,
    /// Pod phase as reported by the API server (`Running`, `Pending`, ...).
    pub phase: String,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceInfo {
    pub name: String,
    pub phase: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressInfo {
    pub namespace: String,
    pub name: String,
    /// Hosts from the ingress rules, in declaration order.
    pub hosts: Vec<String>,
}

/// Server-side filters applied when listing pods.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodFilter {
    pub label_selector: Option<String>,
}

impl PodFilter {
    #[must_use]
    pub fn labels(selector: impl Into<String>) -> Self {
        Self {
            label_selector: Some(selector.into()),
        }
    }
}

/// The lexicographically smallest pod whose name starts with `name_prefix`.
///
/// An exact pod name always wins over longer names sharing it as a prefix.
#[must_use]
pub fn select_pod<'a>(pods: &'a [PodInfo], name_prefix: &str) -> Option<&'a PodInfo> {
    pods.iter()
        .filter(|p| p.name.starts_with(name_prefix))
        .min_by(|a, b| a.name.cmp(&b.name))
}

/// Read-only queries the health checks need from a cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClientError>;

    async fn list_pods(&self, namespace: &str, filter: &PodFilter) -> Result<Vec<PodInfo>, ClientError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodInfo, ClientError>;

    async fn get_namespace(&self, name: &str) -> Result<NamespaceInfo, ClientError>;

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<IngressInfo, ClientError>;

    /// Fetch any resource as raw JSON, for kinds without a typed accessor
    /// (for example a StorageClass). `namespace` is `None` for cluster-scoped
    /// kinds.
    async fn get_resource(
        &self,
        namespace: Option<&str>,
        kind: &str,
        name: &str,
    ) -> Result<serde_json::Value, ClientError>;

    /// Poll until the pod selected by `name_prefix` is Ready.
    ///
    /// Every attempt re-lists the namespace and re-runs [`select_pod`], so a
    /// pod that is still being created or gets replaced mid-wait is picked up.
    /// Suspends only the calling task. Missing pods, pods that are not Ready
    /// and non-fatal errors are retried; a fatal error stops the wait. Use
    /// [`Polled::into_result`] to turn exhaustion into
    /// [`ClientError::Transient`].
    async fn wait_for_pod_ready(
        &self,
        namespace: &str,
        name_prefix: &str,
        filter: &PodFilter,
        policy: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Polled<PodInfo> {
        poll(policy, cancel, |_| async move {
            let pods = match self.list_pods(namespace, filter).await {
                Ok(pods) => pods,
                Err(err @ ClientError::Fatal(_)) => return Attempt::Abort(err),
                Err(err) => return Attempt::Retry(err.to_string()),
            };
            match select_pod(&pods, name_prefix) {
                Some(pod) if pod.ready => Attempt::Ready(pod.clone()),
                Some(pod) => Attempt::Retry(format!(
                    "pod {namespace}/{} is {} but not Ready",
                    pod.name, pod.phase
                )),
                None => Attempt::Retry(format!(
                    "no pod with prefix {name_prefix:?} in namespace {namespace}"
                )),
            }
        })
        .await
    }
}
