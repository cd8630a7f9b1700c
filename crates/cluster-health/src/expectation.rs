//! Declarative health expectations and the suite structure that groups them.
//!
//! Suites are validated once, in [`Suite::new`], so a malformed definition is
//! rejected before any query reaches the cluster.

use std::collections::HashSet;
use std::fmt;

use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jsonpath::JsonPath;
use crate::retry::RetryPolicy;

/// One fact that must hold for the cluster to be considered healthy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealthExpectation {
    NamespaceExists {
        name: String,
    },
    /// A pod whose name starts with `name_prefix` exists in `namespace`.
    /// When several match, the lexicographically smallest name is used.
    PodPresent {
        namespace: String,
        name_prefix: String,
        must_be_ready: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label_selector: Option<String>,
    },
    NodeCountAtLeast {
        min: usize,
    },
    AllNodesReady,
    IngressExists {
        namespace: String,
        name: String,
    },
    /// The field at `json_path` on a resource renders exactly as `expected`.
    ResourceFieldEquals {
        /// `None` for cluster-scoped kinds.
        namespace: Option<String>,
        kind: String,
        name: String,
        json_path: String,
        expected: String,
    },
    HttpsReachable {
        url: String,
        expected_status: u16,
        skip_tls_verify: bool,
    },
}

impl HealthExpectation {
    pub fn namespace_exists(name: impl Into<String>) -> Self {
        Self::NamespaceExists { name: name.into() }
    }

    /// A pod with the given prefix must exist and reach Ready.
    pub fn pod_ready(namespace: impl Into<String>, name_prefix: impl Into<String>) -> Self {
        Self::PodPresent {
            namespace: namespace.into(),
            name_prefix: name_prefix.into(),
            must_be_ready: true,
            label_selector: None,
        }
    }

    /// A pod with the given prefix must exist; readiness is not checked.
    pub fn pod_present(namespace: impl Into<String>, name_prefix: impl Into<String>) -> Self {
        Self::PodPresent {
            namespace: namespace.into(),
            name_prefix: name_prefix.into(),
            must_be_ready: false,
            label_selector: None,
        }
    }

    pub fn ingress_exists(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::IngressExists {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Expect a 200 from `url`, verifying TLS certificates.
    pub fn https_ok(url: impl Into<String>) -> Self {
        Self::HttpsReachable {
            url: url.into(),
            expected_status: 200,
            skip_tls_verify: false,
        }
    }

    /// Whether the fact may be transiently false and should be retried.
    #[must_use]
    pub fn is_eventually_consistent(&self) -> bool {
        matches!(
            self,
            Self::PodPresent {
                must_be_ready: true,
                ..
            } | Self::HttpsReachable { .. }
        )
    }

    /// Retry policy used when the suite does not specify one.
    #[must_use]
    pub fn default_retry(&self) -> RetryPolicy {
        match self {
            _ if !self.is_eventually_consistent() => RetryPolicy::once(),
            Self::HttpsReachable { .. } => RetryPolicy::HTTPS_REACHABLE,
            _ => RetryPolicy::POD_READY,
        }
    }

    /// Check the descriptive fields for obvious mistakes.
    fn validate(&self) -> Result<(), String> {
        fn non_empty(field: &str, value: &str) -> Result<(), String> {
            if value.trim().is_empty() {
                Err(format!("{field} must not be empty"))
            } else {
                Ok(())
            }
        }

        fn query_arg(field: &str, value: &str) -> Result<(), String> {
            non_empty(field, value)?;
            if value.starts_with('-') {
                return Err(format!("{field} must not start with '-'"));
            }
            Ok(())
        }

        match self {
            Self::NamespaceExists { name } => non_empty("namespace name", name),
            Self::PodPresent {
                namespace,
                name_prefix,
                label_selector,
                ..
            } => {
                non_empty("namespace", namespace)?;
                non_empty("pod name prefix", name_prefix)?;
                if let Some(selector) = label_selector {
                    non_empty("label selector", selector)?;
                }
                Ok(())
            }
            Self::NodeCountAtLeast { min } => {
                if *min == 0 {
                    Err("minimum node count must be at least 1".to_string())
                } else {
                    Ok(())
                }
            }
            Self::AllNodesReady => Ok(()),
            Self::IngressExists { namespace, name } => {
                non_empty("namespace", namespace)?;
                non_empty("ingress name", name)
            }
            Self::ResourceFieldEquals {
                namespace,
                kind,
                name,
                json_path,
                ..
            } => {
                if let Some(namespace) = namespace {
                    query_arg("namespace", namespace)?;
                }
                query_arg("kind", kind)?;
                query_arg("resource name", name)?;
                json_path
                    .parse::<JsonPath>()
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            Self::HttpsReachable {
                url,
                expected_status,
                ..
            } => {
                let parsed = Url::parse(url).map_err(|e| format!("invalid URL {url:?}: {e}"))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(format!("unsupported URL scheme {:?}", parsed.scheme()));
                }
                StatusCode::from_u16(*expected_status)
                    .map(|_| ())
                    .map_err(|_| format!("invalid HTTP status {expected_status}"))
            }
        }
    }
}

impl fmt::Display for HealthExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NamespaceExists { name } => write!(f, "namespace {name} exists"),
            Self::PodPresent {
                namespace,
                name_prefix,
                must_be_ready,
                ..
            } => {
                write!(f, "pod {namespace}/{name_prefix}* present")?;
                if *must_be_ready {
                    write!(f, " and Ready")?;
                }
                Ok(())
            }
            Self::NodeCountAtLeast { min } => write!(f, "at least {min} nodes"),
            Self::AllNodesReady => write!(f, "all nodes Ready"),
            Self::IngressExists { namespace, name } => write!(f, "ingress {namespace}/{name} exists"),
            Self::ResourceFieldEquals {
                kind,
                name,
                json_path,
                expected,
                ..
            } => write!(f, "{kind}/{name} {json_path} == {expected:?}"),
            Self::HttpsReachable {
                url,
                expected_status,
                ..
            } => write!(f, "GET {url} returns {expected_status}"),
        }
    }
}

/// An expectation together with the retry policy it is evaluated under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub expectation: HealthExpectation,
    pub retry: RetryPolicy,
}

impl Check {
    /// Pair `expectation` with its kind's default retry policy.
    #[must_use]
    pub fn new(expectation: HealthExpectation) -> Self {
        let retry = expectation.default_retry();
        Self { expectation, retry }
    }

    #[must_use]
    pub fn with_retry(expectation: HealthExpectation, retry: RetryPolicy) -> Self {
        Self { expectation, retry }
    }
}

/// A named set of checks reported together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectationGroup {
    pub name: String,
    pub checks: Vec<Check>,
}

impl ExpectationGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            checks: Vec::new(),
        }
    }

    /// Add an expectation with its default retry policy.
    #[must_use]
    pub fn expect(mut self, expectation: HealthExpectation) -> Self {
        self.checks.push(Check::new(expectation));
        self
    }

    /// Add an expectation with an explicit retry policy.
    #[must_use]
    pub fn expect_with(mut self, expectation: HealthExpectation, retry: RetryPolicy) -> Self {
        self.checks.push(Check::with_retry(expectation, retry));
        self
    }
}

/// A malformed suite definition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SuiteError {
    #[error("suite has no groups")]
    Empty,

    #[error("group names must not be empty")]
    UnnamedGroup,

    #[error("group {0:?} is defined more than once")]
    DuplicateGroup(String),

    #[error("group {0:?} has no expectations")]
    EmptyGroup(String),

    #[error("group {group:?}: expectation `{expectation}` is invalid: {reason}")]
    InvalidExpectation {
        group: String,
        expectation: String,
        reason: String,
    },

    #[error("group {group:?}: `{expectation}` needs at least one attempt")]
    ZeroAttempts { group: String, expectation: String },

    #[error("unknown group {0:?}")]
    UnknownGroup(String),
}

/// A validated, ordered list of expectation groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suite {
    groups: Vec<ExpectationGroup>,
}

impl Suite {
    /// Validate and build a suite.
    pub fn new(groups: Vec<ExpectationGroup>) -> Result<Self, SuiteError> {
        if groups.is_empty() {
            return Err(SuiteError::Empty);
        }

        let mut seen = HashSet::new();
        for group in &groups {
            if group.name.trim().is_empty() {
                return Err(SuiteError::UnnamedGroup);
            }
            if !seen.insert(group.name.as_str()) {
                return Err(SuiteError::DuplicateGroup(group.name.clone()));
            }
            if group.checks.is_empty() {
                return Err(SuiteError::EmptyGroup(group.name.clone()));
            }
            for check in &group.checks {
                check
                    .expectation
                    .validate()
                    .map_err(|reason| SuiteError::InvalidExpectation {
                        group: group.name.clone(),
                        expectation: check.expectation.to_string(),
                        reason,
                    })?;
                if check.retry.max_attempts == 0 {
                    return Err(SuiteError::ZeroAttempts {
                        group: group.name.clone(),
                        expectation: check.expectation.to_string(),
                    });
                }
            }
        }

        Ok(Self { groups })
    }

    #[must_use]
    pub fn groups(&self) -> &[ExpectationGroup] {
        &self.groups
    }

    /// Total number of checks across all groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.checks.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only the named groups, preserving suite order.
    pub fn select(&self, names: &[String]) -> Result<Self, SuiteError> {
        if let Some(unknown) = names
            .iter()
            .find(|name| !self.groups.iter().any(|g| &g.name == *name))
        {
            return Err(SuiteError::UnknownGroup(unknown.clone()));
        }

        let groups = self
            .groups
            .iter()
            .filter(|g| names.contains(&g.name))
            .cloned()
            .collect();
        Self::new(groups)
    }
}
