//! [`ClusterClient`] backed by the Kubernetes API via `kube`.

use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::debug;

use super::{ClientError, ClusterClient, IngressInfo, Kubectl, NamespaceInfo, NodeInfo, PodFilter, PodInfo};
use crate::kubeconfig;

/// Live cluster client.
///
/// Typed resources go through the API server directly; everything else is
/// fetched with `kubectl get -o json` against the same kubeconfig.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    kubectl: Kubectl,
}

impl KubeClusterClient {
    #[must_use]
    pub fn new(client: Client, kubectl: Kubectl) -> Self {
        Self { client, kubectl }
    }

    /// Create a client from a kubeconfig file, optionally pinning a context.
    ///
    /// # Errors
    ///
    /// Returns an error if the kubeconfig cannot be read or the client cannot be created.
    pub async fn from_kubeconfig(path: &Path, context: Option<&str>) -> Result<Self> {
        let client = kubeconfig::build_client(path, context)
            .await
            .context("Failed to create Kubernetes client")?;
        let kubectl = Kubectl::new(path).with_context(context);
        Ok(Self::new(client, kubectl))
    }

    /// Bound how long a single `kubectl get` may run.
    #[must_use]
    pub fn with_kubectl_timeout(mut self, timeout: Duration) -> Self {
        self.kubectl = self.kubectl.with_timeout(timeout);
        self
    }
}

impl From<kube::Error> for ClientError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(response) => match response.code {
                404 => Self::NotFound(response.message.clone()),
                401 | 403 => Self::Fatal(format!("{} ({})", response.message, response.reason)),
                408 | 429 | 500..=599 => Self::Transient(response.message.clone()),
                _ => Self::Fatal(response.message.clone()),
            },
            _ if is_interrupted_transport(&err) => Self::Transient(err.to_string()),
            // Refused connections, DNS and TLS failures: the API server is unreachable.
            _ => Self::Fatal(err.to_string()),
        }
    }
}

/// Whether a request failed mid-flight on an established connection (reset,
/// broken pipe, timeout) rather than never reaching the API server.
fn is_interrupted_transport(err: &(dyn std::error::Error + 'static)) -> bool {
    std::iter::successors(Some(err), |e| e.source()).any(|e| {
        if e.is::<tower::timeout::error::Elapsed>() {
            return true;
        }
        e.downcast_ref::<io::Error>().is_some_and(|io| {
            matches!(
                io.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            )
        })
    })
}

fn condition_true<'a>(mut conditions: impl Iterator<Item = (&'a str, &'a str)>) -> bool {
    conditions.any(|(kind, status)| kind == "Ready" && status == "True")
}

fn node_info(node: &Node) -> NodeInfo {
    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            condition_true(conditions.iter().map(|c| (c.type_.as_str(), c.status.as_str())))
        });

    NodeInfo {
        name: node.metadata.name.clone().unwrap_or_default(),
        ready,
    }
}

fn pod_info(pod: &Pod) -> PodInfo {
    let status = pod.status.as_ref();
    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            condition_true(conditions.iter().map(|c| (c.type_.as_str(), c.status.as_str())))
        });

    PodInfo {
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase: status
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        ready,
    }
}

fn ingress_info(ingress: &Ingress) -> IngressInfo {
    let hosts = ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.rules.as_ref())
        .map(|rules| rules.iter().filter_map(|r| r.host.clone()).collect())
        .unwrap_or_default();

    IngressInfo {
        namespace: ingress.metadata.namespace.clone().unwrap_or_default(),
        name: ingress.metadata.name.clone().unwrap_or_default(),
        hosts,
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClientError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        debug!(count = list.items.len(), "Listed nodes");
        Ok(list.items.iter().map(node_info).collect())
    }

    async fn list_pods(&self, namespace: &str, filter: &PodFilter) -> Result<Vec<PodInfo>, ClientError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        let mut params = ListParams::default();
        if let Some(labels) = &filter.label_selector {
            params = params.labels(labels);
        }

        let list = pods.list(&params).await?;
        debug!(namespace, count = list.items.len(), "Listed pods");
        Ok(list.items.iter().map(pod_info).collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodInfo, ClientError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods.get(name).await?;
        Ok(pod_info(&pod))
    }

    async fn get_namespace(&self, name: &str) -> Result<NamespaceInfo, ClientError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespace = namespaces.get(name).await?;
        Ok(NamespaceInfo {
            name: namespace.metadata.name.unwrap_or_default(),
            phase: namespace.status.and_then(|s| s.phase),
        })
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<IngressInfo, ClientError> {
        let ingresses: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        let ingress = ingresses.get(name).await?;
        Ok(ingress_info(&ingress))
    }

    async fn get_resource(
        &self,
        namespace: Option<&str>,
        kind: &str,
        name: &str,
    ) -> Result<serde_json::Value, ClientError> {
        self.kubectl.get_json(namespace, kind, name).await
    }
}

#[cfg(test)]
mod tests {

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::retry::{PollOutcome, RetryPolicy};
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus, PodCondition, PodStatus};
    use k8s_openapi::api::networking::v1::{IngressRule, IngressSpec};
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: "Reason".to_string(),
            code,
        })
    }

    #[test]
    fn test_kube_error_classification() {
        assert!(ClientError::from(api_error(404)).is_not_found());
        assert!(ClientError::from(api_error(401)).is_fatal());
        assert!(ClientError::from(api_error(403)).is_fatal());
        assert!(matches!(ClientError::from(api_error(503)), ClientError::Transient(_)));
        assert!(matches!(ClientError::from(api_error(429)), ClientError::Transient(_)));
        assert!(ClientError::from(api_error(400)).is_fatal());
    }

    fn client_failing_with(kind: io::ErrorKind) -> KubeClusterClient {
        let service = tower::service_fn(move |_request: http::Request<kube::client::Body>| async move {
            Err::<http::Response<kube::client::Body>, _>(io::Error::new(kind, "transport failure"))
        });
        KubeClusterClient::new(Client::new(service, "default"), Kubectl::default())
    }

    #[tokio::test]
    async fn test_connection_reset_is_transient() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::TimedOut,
        ] {
            let client = client_failing_with(kind);
            let err = client.get_pod("argocd", "argocd-server-abc").await.unwrap_err();
            assert!(matches!(err, ClientError::Transient(_)), "{kind:?}: {err:?}");
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_fatal() {
        let client = client_failing_with(io::ErrorKind::ConnectionRefused);
        let err = client.list_nodes().await.unwrap_err();
        assert!(err.is_fatal(), "{err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pod_wait_survives_connection_reset() {
        let client = client_failing_with(io::ErrorKind::ConnectionReset);
        let polled = client
            .wait_for_pod_ready(
                "argocd",
                "argocd-server",
                &PodFilter::default(),
                RetryPolicy::new(5, Duration::from_secs(5)),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(polled.attempts, 5);
        assert!(matches!(polled.outcome, PollOutcome::Exhausted(_)));
    }

    #[test]
    fn test_node_ready_condition() {
        let mut node = Node::default();
        node.metadata.name = Some("k3s-server-1".to_string());
        node.status = Some(NodeStatus {
            conditions: Some(vec![
                NodeCondition {
                    type_: "MemoryPressure".to_string(),
                    status: "False".to_string(),
                    ..Default::default()
                },
                NodeCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        });

        let info = node_info(&node);
        assert_eq!(info.name, "k3s-server-1");
        assert!(info.ready);

        assert!(!node_info(&Node::default()).ready);
    }

    #[test]
    fn test_pod_info_phase_and_readiness() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("coredns-6799fbcd5-x2x7q".to_string());
        pod.metadata.namespace = Some("kube-system".to_string());
        pod.status = Some(PodStatus {
            phase: Some("Running".to_string()),
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: "False".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });

        let info = pod_info(&pod);
        assert_eq!(info.phase, "Running");
        assert!(!info.ready);
        assert_eq!(pod_info(&Pod::default()).phase, "Unknown");
    }

    #[test]
    fn test_ingress_hosts() {
        let mut ingress = Ingress::default();
        ingress.metadata.name = Some("argocd-server".to_string());
        ingress.spec = Some(IngressSpec {
            rules: Some(vec![
                IngressRule {
                    host: Some("argocd.example.com".to_string()),
                    ..Default::default()
                },
                IngressRule::default(),
            ]),
            ..Default::default()
        });

        assert_eq!(ingress_info(&ingress).hosts, vec!["argocd.example.com"]);
    }
}
