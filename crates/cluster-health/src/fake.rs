//! In-memory [`ClusterClient`] for tests and offline runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::{
    ClientError, ClusterClient, IngressInfo, NamespaceInfo, NodeInfo, PodFilter, PodInfo,
};

/// Which client call a configured failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListNodes,
    ListPods,
    GetPod,
    GetNamespace,
    GetIngress,
    GetResource,
}

type ResourceKey = (Option<String>, String, String);
type PodKey = (String, String);

#[derive(Debug)]
struct Failure {
    error: ClientError,
    /// Calls left to fail; `None` fails forever.
    remaining: Option<u32>,
}

/// A static cluster snapshot.
///
/// Pods can be configured to turn Ready only after they have been observed a
/// number of times, or to show up in listings only after a number of
/// `list_pods` calls. Failures can be injected forever or for the first few
/// calls. Together these let retry behaviour be tested without a real cluster.
#[derive(Debug, Default)]
pub struct FakeCluster {
    nodes: Vec<NodeInfo>,
    pods: Vec<PodInfo>,
    /// Pod labels, keyed by (namespace, name).
    labels: HashMap<PodKey, Vec<(String, String)>>,
    namespaces: Vec<String>,
    ingresses: Vec<IngressInfo>,
    resources: HashMap<ResourceKey, Value>,
    failures: Mutex<HashMap<Operation, Failure>>,
    ready_after: HashMap<PodKey, u32>,
    listed_after: HashMap<PodKey, u32>,
    /// Times each pod was returned by `list_pods` or `get_pod`.
    observations: Mutex<HashMap<PodKey, u32>>,
    /// `list_pods` calls per namespace.
    lists: Mutex<HashMap<String, u32>>,
    latency: Option<Duration>,
}

impl FakeCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_node(mut self, name: &str, ready: bool) -> Self {
        self.nodes.push(NodeInfo {
            name: name.to_string(),
            ready,
        });
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, name: &str) -> Self {
        self.namespaces.push(name.to_string());
        self
    }

    #[must_use]
    pub fn with_pod(mut self, namespace: &str, name: &str, ready: bool) -> Self {
        self.pods.push(PodInfo {
            namespace: namespace.to_string(),
            name: name.to_string(),
            phase: if ready { "Running" } else { "Pending" }.to_string(),
            ready,
        });
        self
    }

    /// Add a pod carrying `key=value` labels.
    #[must_use]
    pub fn with_labelled_pod(mut self, namespace: &str, name: &str, labels: &[(&str, &str)]) -> Self {
        self.labels.insert(
            (namespace.to_string(), name.to_string()),
            labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        );
        self.with_pod(namespace, name, true)
    }

    /// Add a pod that reports Ready from its `polls`-th observation on.
    #[must_use]
    pub fn with_pod_ready_after(mut self, namespace: &str, name: &str, polls: u32) -> Self {
        self.ready_after
            .insert((namespace.to_string(), name.to_string()), polls);
        self.with_pod(namespace, name, false)
    }

    /// Add a Ready pod that only shows up from the `lists`-th `list_pods`
    /// call in its namespace on. `get_pod` sees it at any time.
    #[must_use]
    pub fn with_pod_listed_after(mut self, namespace: &str, name: &str, lists: u32) -> Self {
        self.listed_after
            .insert((namespace.to_string(), name.to_string()), lists);
        self.with_pod(namespace, name, true)
    }

    #[must_use]
    pub fn with_ingress(mut self, namespace: &str, name: &str, hosts: &[&str]) -> Self {
        self.ingresses.push(IngressInfo {
            namespace: namespace.to_string(),
            name: name.to_string(),
            hosts: hosts.iter().map(ToString::to_string).collect(),
        });
        self
    }

    #[must_use]
    pub fn with_resource(mut self, namespace: Option<&str>, kind: &str, name: &str, body: Value) -> Self {
        self.resources.insert(
            (namespace.map(ToString::to_string), kind.to_string(), name.to_string()),
            body,
        );
        self
    }

    /// Make every call of `operation` fail with `error`.
    #[must_use]
    pub fn failing(self, operation: Operation, error: ClientError) -> Self {
        self.insert_failure(operation, error, None)
    }

    /// Make the first `times` calls of `operation` fail with `error`.
    #[must_use]
    pub fn failing_times(self, operation: Operation, error: ClientError, times: u32) -> Self {
        self.insert_failure(operation, error, Some(times))
    }

    fn insert_failure(mut self, operation: Operation, error: ClientError, remaining: Option<u32>) -> Self {
        self.failures
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(operation, Failure { error, remaining });
        self
    }

    /// Delay every call, to exercise timeouts and cancellation.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of times a pod has been returned by `list_pods` or `get_pod`.
    #[must_use]
    pub fn pod_polls(&self, namespace: &str, name: &str) -> u32 {
        self.observations
            .lock()
            .map(|seen| {
                seen.get(&(namespace.to_string(), name.to_string()))
                    .copied()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    async fn enter(&self, operation: Operation) -> Result<(), ClientError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut failures = self.failures.lock().map_err(|_| poisoned())?;
        match failures.get_mut(&operation) {
            Some(Failure {
                remaining: Some(0), ..
            })
            | None => Ok(()),
            Some(Failure {
                error,
                remaining: Some(left),
            }) => {
                *left -= 1;
                Err(error.clone())
            }
            Some(Failure {
                error,
                remaining: None,
            }) => Err(error.clone()),
        }
    }

    /// Record one observation of `pod` and apply its readiness schedule.
    fn observe(&self, mut pod: PodInfo) -> Result<PodInfo, ClientError> {
        let key = (pod.namespace.clone(), pod.name.clone());
        let seen = {
            let mut observations = self.observations.lock().map_err(|_| poisoned())?;
            let count = observations.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if let Some(ready_after) = self.ready_after.get(&key) {
            if seen >= *ready_after {
                pod.ready = true;
                pod.phase = "Running".to_string();
            }
        }
        Ok(pod)
    }

    fn matches_labels(&self, pod: &PodInfo, selector: &str) -> bool {
        let labels = self
            .labels
            .get(&(pod.namespace.clone(), pod.name.clone()));
        selector.split(',').all(|term| {
            let Some((key, value)) = term.split_once('=') else {
                return false;
            };
            labels.is_some_and(|labels| {
                labels
                    .iter()
                    .any(|(k, v)| k == key.trim() && v == value.trim())
            })
        })
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClientError> {
        self.enter(Operation::ListNodes).await?;
        Ok(self.nodes.clone())
    }

    async fn list_pods(&self, namespace: &str, filter: &PodFilter) -> Result<Vec<PodInfo>, ClientError> {
        self.enter(Operation::ListPods).await?;

        let list_number = {
            let mut lists = self.lists.lock().map_err(|_| poisoned())?;
            let count = lists.entry(namespace.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        self.pods
            .iter()
            .filter(|p| p.namespace == namespace)
            .filter(|p| {
                self.listed_after
                    .get(&(p.namespace.clone(), p.name.clone()))
                    .is_none_or(|after| list_number >= *after)
            })
            .filter(|p| {
                filter
                    .label_selector
                    .as_deref()
                    .is_none_or(|selector| self.matches_labels(p, selector))
            })
            .map(|p| self.observe(p.clone()))
            .collect()
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodInfo, ClientError> {
        self.enter(Operation::GetPod).await?;
        let pod = self
            .pods
            .iter()
            .find(|p| p.namespace == namespace && p.name == name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("pods \"{name}\" not found")))?;
        self.observe(pod)
    }

    async fn get_namespace(&self, name: &str) -> Result<NamespaceInfo, ClientError> {
        self.enter(Operation::GetNamespace).await?;
        if self.namespaces.iter().any(|n| n == name) {
            Ok(NamespaceInfo {
                name: name.to_string(),
                phase: Some("Active".to_string()),
            })
        } else {
            Err(ClientError::NotFound(format!("namespaces \"{name}\" not found")))
        }
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<IngressInfo, ClientError> {
        self.enter(Operation::GetIngress).await?;
        self.ingresses
            .iter()
            .find(|i| i.namespace == namespace && i.name == name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("ingresses \"{name}\" not found")))
    }

    async fn get_resource(
        &self,
        namespace: Option<&str>,
        kind: &str,
        name: &str,
    ) -> Result<Value, ClientError> {
        self.enter(Operation::GetResource).await?;
        let key = (namespace.map(ToString::to_string), kind.to_string(), name.to_string());
        self.resources
            .get(&key)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("{kind} \"{name}\" not found")))
    }
}

fn poisoned() -> ClientError {
    ClientError::Fatal("fake cluster state poisoned".to_string())
}
