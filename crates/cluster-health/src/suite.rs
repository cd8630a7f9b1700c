//! The reference suite for a k3s cluster running ArgoCD and Longhorn.

use serde::{Deserialize, Serialize};

use crate::expectation::{ExpectationGroup, HealthExpectation, Suite, SuiteError};
use crate::retry::RetryPolicy;

pub const K3S: &str = "k3s";
pub const ARGOCD: &str = "argocd";
pub const LONGHORN: &str = "longhorn";

const KUBE_SYSTEM: &str = "kube-system";
const ARGOCD_NAMESPACE: &str = "argocd";
const LONGHORN_NAMESPACE: &str = "longhorn-system";
const DEFAULT_CLASS_PATH: &str =
    r"{.metadata.annotations.storageclass\.kubernetes\.io/is-default-class}";

/// Tunables of the reference suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteOptions {
    pub min_nodes: usize,
    pub argocd_url: String,
    pub longhorn_url: String,
    /// Accept self-signed certificates on the UI endpoints.
    pub skip_tls_verify: bool,
    pub pod_ready_retry: RetryPolicy,
    pub https_retry: RetryPolicy,
}

impl Default for SuiteOptions {
    fn default() -> Self {
        Self {
            min_nodes: 2,
            argocd_url: "https://argocd.example.com".to_string(),
            longhorn_url: "https://longhorn.example.com".to_string(),
            skip_tls_verify: false,
            pod_ready_retry: RetryPolicy::POD_READY,
            https_retry: RetryPolicy::HTTPS_REACHABLE,
        }
    }
}

impl SuiteOptions {
    fn pod_ready(&self, group: ExpectationGroup, namespace: &str, prefix: &str) -> ExpectationGroup {
        group.expect_with(HealthExpectation::pod_ready(namespace, prefix), self.pod_ready_retry)
    }

    fn https(&self, group: ExpectationGroup, url: &str) -> ExpectationGroup {
        group.expect_with(
            HealthExpectation::HttpsReachable {
                url: url.to_string(),
                expected_status: 200,
                skip_tls_verify: self.skip_tls_verify,
            },
            self.https_retry,
        )
    }
}

/// Build the reference suite: groups `k3s`, `argocd` and `longhorn`.
///
/// # Errors
///
/// Returns [`SuiteError`] if the options produce an invalid suite, e.g. a
/// malformed URL or `min_nodes == 0`.
pub fn reference_suite(options: &SuiteOptions) -> Result<Suite, SuiteError> {
    Suite::new(vec![k3s(options), argocd(options), longhorn(options)])
}

fn k3s(options: &SuiteOptions) -> ExpectationGroup {
    let group = ExpectationGroup::new(K3S)
        .expect(HealthExpectation::AllNodesReady)
        .expect(HealthExpectation::NodeCountAtLeast {
            min: options.min_nodes,
        });

    ["coredns", "traefik", "metrics-server"]
        .into_iter()
        .fold(group, |group, prefix| options.pod_ready(group, KUBE_SYSTEM, prefix))
}

fn argocd(options: &SuiteOptions) -> ExpectationGroup {
    let group = ExpectationGroup::new(ARGOCD)
        .expect(HealthExpectation::namespace_exists(ARGOCD_NAMESPACE));

    let group = [
        "argocd-server",
        "argocd-repo-server",
        "argocd-application-controller",
    ]
    .into_iter()
    .fold(group, |group, prefix| {
        options.pod_ready(group, ARGOCD_NAMESPACE, prefix)
    });

    let group = group.expect(HealthExpectation::ingress_exists(
        ARGOCD_NAMESPACE,
        "argocd-server",
    ));
    options.https(group, &options.argocd_url)
}

fn longhorn(options: &SuiteOptions) -> ExpectationGroup {
    let group = ExpectationGroup::new(LONGHORN)
        .expect(HealthExpectation::namespace_exists(LONGHORN_NAMESPACE));

    let group = ["longhorn-manager", "longhorn-ui"]
        .into_iter()
        .fold(group, |group, prefix| {
            options.pod_ready(group, LONGHORN_NAMESPACE, prefix)
        });

    let group = group.expect(HealthExpectation::ResourceFieldEquals {
        namespace: None,
        kind: "storageclass".to_string(),
        name: "longhorn".to_string(),
        json_path: DEFAULT_CLASS_PATH.to_string(),
        expected: "true".to_string(),
    });
    options.https(group, &options.longhorn_url)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn group<'a>(suite: &'a Suite, name: &str) -> &'a ExpectationGroup {
        suite.groups().iter().find(|g| g.name == name).unwrap()
    }

    #[test]
    fn test_reference_suite_layout() {
        let suite = reference_suite(&SuiteOptions::default()).unwrap();

        let names: Vec<_> = suite.groups().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec![K3S, ARGOCD, LONGHORN]);
        assert_eq!(group(&suite, K3S).checks.len(), 5);
        assert_eq!(group(&suite, ARGOCD).checks.len(), 6);
        assert_eq!(group(&suite, LONGHORN).checks.len(), 5);
        assert_eq!(suite.len(), 16);
    }

    #[test]
    fn test_k3s_group_contents() {
        let suite = reference_suite(&SuiteOptions::default()).unwrap();
        let k3s: Vec<_> = group(&suite, K3S)
            .checks
            .iter()
            .map(|c| c.expectation.clone())
            .collect();

        assert!(k3s.contains(&HealthExpectation::NodeCountAtLeast { min: 2 }));
        assert!(k3s.contains(&HealthExpectation::AllNodesReady));
        for prefix in ["coredns", "traefik", "metrics-server"] {
            assert!(k3s.contains(&HealthExpectation::pod_ready(KUBE_SYSTEM, prefix)));
        }
    }

    #[test]
    fn test_longhorn_default_storage_class_check() {
        let suite = reference_suite(&SuiteOptions::default()).unwrap();
        let found = group(&suite, LONGHORN).checks.iter().any(|c| {
            matches!(
                &c.expectation,
                HealthExpectation::ResourceFieldEquals { namespace: None, kind, name, expected, .. }
                    if kind == "storageclass" && name == "longhorn" && expected == "true"
            )
        });
        assert!(found);
    }

    #[test]
    fn test_options_flow_into_checks() {
        let options = SuiteOptions {
            min_nodes: 3,
            argocd_url: "https://argocd.lab.internal".to_string(),
            skip_tls_verify: true,
            pod_ready_retry: RetryPolicy::new(2, Duration::from_secs(1)),
            ..SuiteOptions::default()
        };
        let suite = reference_suite(&options).unwrap();

        let argocd = group(&suite, ARGOCD);
        let https = argocd
            .checks
            .iter()
            .find(|c| matches!(c.expectation, HealthExpectation::HttpsReachable { .. }))
            .unwrap();
        assert_eq!(
            https.expectation,
            HealthExpectation::HttpsReachable {
                url: "https://argocd.lab.internal".to_string(),
                expected_status: 200,
                skip_tls_verify: true,
            }
        );
        assert_eq!(https.retry, RetryPolicy::HTTPS_REACHABLE);

        let pod = argocd
            .checks
            .iter()
            .find(|c| c.expectation == HealthExpectation::pod_ready(ARGOCD_NAMESPACE, "argocd-server"))
            .unwrap();
        assert_eq!(pod.retry.max_attempts, 2);

        assert!(group(&suite, K3S)
            .checks
            .iter()
            .any(|c| c.expectation == HealthExpectation::NodeCountAtLeast { min: 3 }));
    }

    #[test]
    fn test_tls_verification_is_on_by_default() {
        let suite = reference_suite(&SuiteOptions::default()).unwrap();
        let bypassed = suite.groups().iter().flat_map(|g| &g.checks).any(|c| {
            matches!(
                c.expectation,
                HealthExpectation::HttpsReachable {
                    skip_tls_verify: true,
                    ..
                }
            )
        });
        assert!(!bypassed);
    }

    #[test]
    fn test_invalid_options_are_rejected() {
        let zero_nodes = SuiteOptions {
            min_nodes: 0,
            ..SuiteOptions::default()
        };
        assert!(matches!(
            reference_suite(&zero_nodes),
            Err(SuiteError::InvalidExpectation { .. })
        ));

        let bad_url = SuiteOptions {
            longhorn_url: "longhorn.example.com".to_string(),
            ..SuiteOptions::default()
        };
        assert!(reference_suite(&bad_url).is_err());
    }
}
