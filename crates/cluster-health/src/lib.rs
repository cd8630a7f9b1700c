//! Declarative health checks for Kubernetes clusters.
//!
//! A [`Suite`] groups [`HealthExpectation`]s; the [`HealthCheckRunner`]
//! evaluates them concurrently through an [`ExpectationEvaluator`] and
//! aggregates a [`HealthReport`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use cluster_health::{
//!     reference_suite, ExpectationEvaluator, HealthCheckRunner, HttpsProber,
//!     KubeClusterClient, ProbeConfig, RunnerConfig, SuiteOptions,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let path = cluster_health::kubeconfig::resolve(None)?;
//!     let client = KubeClusterClient::from_kubeconfig(&path, None).await?;
//!     let prober = HttpsProber::new(&ProbeConfig::default())?;
//!     let evaluator = ExpectationEvaluator::new(Arc::new(client), prober);
//!
//!     let suite = reference_suite(&SuiteOptions::default())?;
//!     let report = HealthCheckRunner::new(evaluator, RunnerConfig::default())
//!         .run(&suite)
//!         .await;
//!     report.print_summary();
//!     Ok(())
//! }
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]
// Allow imports after statements in functions
#![allow(clippy::items_after_statements)]

pub mod client;
pub mod evaluator;
pub mod expectation;
pub mod fake;
pub mod jsonpath;
pub mod kubeconfig;
pub mod probe;
pub mod report;
pub mod retry;
pub mod runner;
pub mod suite;
pub mod ui;

// Re-export commonly used types at the crate root
pub use client::{ClientError, ClusterClient, KubeClusterClient, Kubectl};
pub use evaluator::{CheckStatus, EvaluationResult, ExpectationEvaluator};
pub use expectation::{Check, ExpectationGroup, HealthExpectation, Suite, SuiteError};
pub use probe::{HttpsProber, ProbeConfig};
pub use report::{GroupReport, HealthReport, Verdict};
pub use retry::RetryPolicy;
pub use runner::{CancelHandle, HealthCheckRunner, RunnerConfig};
pub use suite::{reference_suite, SuiteOptions};
