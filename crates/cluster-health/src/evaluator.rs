//! Evaluation of a single [`HealthExpectation`] against a cluster.
//!
//! Point-in-time facts get exactly one query. Eventually-consistent facts
//! (pod readiness, HTTPS reachability) are polled under the check's
//! [`RetryPolicy`]. Client errors never escape: they become `Fail` or `Error`
//! results.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{select_pod, ClientError, ClusterClient, PodFilter};
use crate::expectation::HealthExpectation;
use crate::jsonpath::JsonPath;
use crate::probe::HttpsProber;
use crate::report::serialize_millis;
use crate::retry::{poll, Attempt, PollOutcome, Polled, RetryPolicy};

/// Message recorded for evaluations stopped by cancellation.
pub const CANCELLED: &str = "cancelled";

/// Verdict for one expectation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    /// The fact does not hold.
    Fail,
    /// The fact could not be evaluated.
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Outcome of evaluating one expectation exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub expectation: HealthExpectation,
    pub status: CheckStatus,
    pub message: String,
    /// Queries or requests made; retries are folded in here rather than
    /// producing separate results.
    pub attempts: u32,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

impl EvaluationResult {
    /// Result for an expectation whose evaluation was cut short.
    #[must_use]
    pub fn cancelled(expectation: HealthExpectation, attempts: u32, elapsed: Duration) -> Self {
        Self {
            expectation,
            status: CheckStatus::Error,
            message: CANCELLED.to_string(),
            attempts,
            elapsed,
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

/// Verdict before timing is attached.
struct Finding {
    status: CheckStatus,
    message: String,
    attempts: u32,
}

impl Finding {
    fn pass(message: String) -> Self {
        Self {
            status: CheckStatus::Pass,
            message,
            attempts: 1,
        }
    }

    fn fail(message: String) -> Self {
        Self {
            status: CheckStatus::Fail,
            message,
            attempts: 1,
        }
    }

    fn error(message: String) -> Self {
        Self {
            status: CheckStatus::Error,
            message,
            attempts: 1,
        }
    }

    /// `NotFound` and `Transient` mean the fact does not hold; `Fatal` means
    /// it could not be checked.
    fn from_client_error(err: &ClientError) -> Self {
        match err {
            ClientError::NotFound(_) | ClientError::Transient(_) => Self::fail(err.to_string()),
            ClientError::Fatal(_) => Self::error(err.to_string()),
        }
    }

    fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Evaluates expectations through a [`ClusterClient`] and an [`HttpsProber`].
pub struct ExpectationEvaluator {
    client: Arc<dyn ClusterClient>,
    prober: HttpsProber,
}

impl ExpectationEvaluator {
    #[must_use]
    pub fn new(client: Arc<dyn ClusterClient>, prober: HttpsProber) -> Self {
        Self { client, prober }
    }

    /// Evaluate `expectation` to completion.
    pub async fn evaluate(&self, expectation: &HealthExpectation, retry: RetryPolicy) -> EvaluationResult {
        self.evaluate_until(expectation, retry, &CancellationToken::new())
            .await
    }

    /// Evaluate `expectation`, giving up between attempts once `cancel` fires.
    pub async fn evaluate_until(
        &self,
        expectation: &HealthExpectation,
        retry: RetryPolicy,
        cancel: &CancellationToken,
    ) -> EvaluationResult {
        let start = Instant::now();

        let finding = match expectation {
            HealthExpectation::NamespaceExists { name } => self.namespace_exists(name).await,
            HealthExpectation::PodPresent {
                namespace,
                name_prefix,
                must_be_ready,
                label_selector,
            } => {
                self.pod_present(
                    namespace,
                    name_prefix,
                    *must_be_ready,
                    label_selector.as_deref(),
                    retry,
                    cancel,
                )
                .await
            }
            HealthExpectation::NodeCountAtLeast { min } => self.node_count_at_least(*min).await,
            HealthExpectation::AllNodesReady => self.all_nodes_ready().await,
            HealthExpectation::IngressExists { namespace, name } => {
                self.ingress_exists(namespace, name).await
            }
            HealthExpectation::ResourceFieldEquals {
                namespace,
                kind,
                name,
                json_path,
                expected,
            } => {
                self.resource_field_equals(namespace.as_deref(), kind, name, json_path, expected)
                    .await
            }
            HealthExpectation::HttpsReachable {
                url,
                expected_status,
                skip_tls_verify,
            } => {
                self.https_reachable(url, *expected_status, *skip_tls_verify, retry, cancel)
                    .await
            }
        };

        let result = EvaluationResult {
            expectation: expectation.clone(),
            status: finding.status,
            message: finding.message,
            attempts: finding.attempts,
            elapsed: start.elapsed(),
        };
        debug!(
            expectation = %result.expectation,
            status = %result.status,
            attempts = result.attempts,
            "Evaluated expectation"
        );
        result
    }

    async fn namespace_exists(&self, name: &str) -> Finding {
        match self.client.get_namespace(name).await {
            Ok(namespace) => Finding::pass(format!(
                "namespace {} exists ({})",
                namespace.name,
                namespace.phase.as_deref().unwrap_or("phase unknown")
            )),
            Err(err) => Finding::from_client_error(&err),
        }
    }

    async fn node_count_at_least(&self, min: usize) -> Finding {
        match self.client.list_nodes().await {
            Ok(nodes) if nodes.len() >= min => {
                Finding::pass(format!("{} nodes registered (need at least {min})", nodes.len()))
            }
            Ok(nodes) => Finding::fail(format!(
                "only {} nodes registered, expected at least {min}",
                nodes.len()
            )),
            Err(err) => Finding::from_client_error(&err),
        }
    }

    async fn all_nodes_ready(&self) -> Finding {
        let nodes = match self.client.list_nodes().await {
            Ok(nodes) => nodes,
            Err(err) => return Finding::from_client_error(&err),
        };

        if nodes.is_empty() {
            return Finding::fail("no nodes registered".to_string());
        }

        let mut not_ready: Vec<&str> = nodes
            .iter()
            .filter(|n| !n.ready)
            .map(|n| n.name.as_str())
            .collect();
        if not_ready.is_empty() {
            Finding::pass(format!("all {} nodes Ready", nodes.len()))
        } else {
            not_ready.sort_unstable();
            Finding::fail(format!("nodes not Ready: {}", not_ready.join(", ")))
        }
    }

    async fn ingress_exists(&self, namespace: &str, name: &str) -> Finding {
        match self.client.get_ingress(namespace, name).await {
            Ok(ingress) if ingress.hosts.is_empty() => {
                Finding::pass(format!("ingress {namespace}/{name} exists"))
            }
            Ok(ingress) => Finding::pass(format!(
                "ingress {namespace}/{name} exists (hosts: {})",
                ingress.hosts.join(", ")
            )),
            Err(err) => Finding::from_client_error(&err),
        }
    }

    async fn resource_field_equals(
        &self,
        namespace: Option<&str>,
        kind: &str,
        name: &str,
        json_path: &str,
        expected: &str,
    ) -> Finding {
        let path: JsonPath = match json_path.parse() {
            Ok(path) => path,
            Err(err) => return Finding::error(err.to_string()),
        };

        let resource = match self.client.get_resource(namespace, kind, name).await {
            Ok(resource) => resource,
            Err(err) => return Finding::from_client_error(&err),
        };

        match path.render(&resource) {
            Some(actual) if actual == expected => {
                Finding::pass(format!("{kind}/{name} {path} is {actual:?}"))
            }
            Some(actual) => Finding::fail(format!(
                "{kind}/{name} {path} is {actual:?}, expected {expected:?}"
            )),
            None => Finding::fail(format!(
                "{kind}/{name} has no value at {path}, expected {expected:?}"
            )),
        }
    }

    /// A pod is chosen with [`select_pod`] so the outcome does not depend on
    /// API server list order. Readiness waits re-select on every attempt.
    async fn pod_present(
        &self,
        namespace: &str,
        name_prefix: &str,
        must_be_ready: bool,
        label_selector: Option<&str>,
        retry: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Finding {
        let filter = label_selector.map(PodFilter::labels).unwrap_or_default();

        if must_be_ready {
            let polled = self
                .client
                .wait_for_pod_ready(namespace, name_prefix, &filter, retry, cancel)
                .await;
            return finish(polled, &format!("pod {namespace}/{name_prefix}*"), |pod| {
                format!("pod {namespace}/{} is Ready", pod.name)
            });
        }

        let pods = match self.client.list_pods(namespace, &filter).await {
            Ok(pods) => pods,
            Err(err) => return Finding::from_client_error(&err),
        };
        match select_pod(&pods, name_prefix) {
            Some(pod) => Finding::pass(format!("found pod {namespace}/{} ({})", pod.name, pod.phase)),
            None => Finding::fail(format!(
                "no pod with prefix {name_prefix:?} in namespace {namespace}"
            )),
        }
    }

    async fn https_reachable(
        &self,
        url: &str,
        expected_status: u16,
        skip_tls_verify: bool,
        retry: RetryPolicy,
        cancel: &CancellationToken,
    ) -> Finding {
        let polled = poll(retry, cancel, |_| async move {
            match self.prober.get_status(url, skip_tls_verify).await {
                Ok(status) if status.as_u16() == expected_status => Attempt::Ready(status),
                Ok(status) => Attempt::Retry(format!(
                    "GET {url} returned {status}, expected {expected_status}"
                )),
                Err(err) => Attempt::Retry(format!("GET {url} failed: {err}")),
            }
        })
        .await;

        finish(polled, &format!("GET {url}"), |status| {
            format!("GET {url} returned {status}")
        })
    }
}

/// Turn a finished poll into a finding. Cancellation is an `Error`;
/// everything else goes through the client error taxonomy, so exhaustion
/// lands as a `Fail` carrying the last diagnostic.
fn finish<T>(polled: Polled<T>, what: &str, on_ready: impl FnOnce(T) -> String) -> Finding {
    let attempts = polled.attempts;
    let finding = if matches!(polled.outcome, PollOutcome::Cancelled) {
        Finding::error(CANCELLED.to_string())
    } else {
        match polled.into_result(what) {
            Ok(value) => Finding::pass(on_ready(value)),
            Err(err) => Finding::from_client_error(&err),
        }
    };
    finding.attempts(attempts)
}
