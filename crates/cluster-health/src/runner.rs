//! Concurrent execution of a [`Suite`] and aggregation into a [`HealthReport`].
//!
//! Every check runs in its own task. Tasks only hand back
//! [`EvaluationResult`] values; the runner task is the single writer of the
//! report. Cancellation flows runner -> group -> check through child tokens.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::evaluator::{CheckStatus, EvaluationResult, ExpectationEvaluator};
use crate::expectation::Suite;
use crate::report::{GroupReport, HealthReport};

/// Runner tuning.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Upper bound on evaluations in flight; `None` runs everything at once.
    pub concurrency: Option<usize>,
    /// Time granted to in-flight evaluations after cancellation before they
    /// are aborted.
    pub grace_period: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: None,
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Handle for stopping a run from outside, e.g. on Ctrl-C or a deadline.
#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

type Slots = Vec<Vec<Option<EvaluationResult>>>;

/// Runs suites against one evaluator.
pub struct HealthCheckRunner {
    evaluator: Arc<ExpectationEvaluator>,
    config: RunnerConfig,
    cancel: CancellationToken,
}

impl HealthCheckRunner {
    #[must_use]
    pub fn new(evaluator: ExpectationEvaluator, config: RunnerConfig) -> Self {
        Self {
            evaluator: Arc::new(evaluator),
            config,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    /// Evaluate every check in `suite` and build the report.
    ///
    /// The cancel handle is shared by every run of this runner, so once it
    /// fires later runs come back incomplete straight away.
    ///
    /// Failures never stop sibling checks. If the cancel handle fires, checks
    /// still running get the grace period to finish; whatever is left is
    /// aborted and recorded as `Error("cancelled")`, and the report is
    /// marked incomplete.
    pub async fn run(&self, suite: &Suite) -> HealthReport {
        let started_at = Utc::now();
        let start = Instant::now();
        info!(
            groups = suite.groups().len(),
            checks = suite.len(),
            concurrency = ?self.config.concurrency,
            "Running health suite"
        );

        let semaphore = self
            .config
            .concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        let mut slots: Slots = suite
            .groups()
            .iter()
            .map(|g| vec![None; g.checks.len()])
            .collect();
        let mut tasks = JoinSet::new();

        for (group_index, group) in suite.groups().iter().enumerate() {
            let group_cancel = self.cancel.child_token();

            for (check_index, check) in group.checks.iter().enumerate() {
                let cancel = group_cancel.child_token();
                let evaluator = Arc::clone(&self.evaluator);
                let semaphore = semaphore.clone();
                let check = check.clone();
                let span = info_span!("check", group = %group.name, expectation = %check.expectation);

                tasks.spawn(
                    async move {
                        let _permit = match semaphore {
                            Some(semaphore) => tokio::select! {
                                biased;
                                () = cancel.cancelled() => {
                                    let result = EvaluationResult::cancelled(check.expectation, 0, Duration::ZERO);
                                    return (group_index, check_index, result);
                                }
                                permit = semaphore.acquire_owned() => permit.ok(),
                            },
                            None => None,
                        };

                        let result = evaluator
                            .evaluate_until(&check.expectation, check.retry, &cancel)
                            .await;
                        (group_index, check_index, result)
                    }
                    .instrument(span),
                );
            }
        }

        let finished = tokio::select! {
            biased;
            () = drain(&mut tasks, &mut slots) => true,
            () = self.cancel.cancelled() => false,
        };

        if !finished {
            warn!(
                outstanding = tasks.len(),
                grace_secs = self.config.grace_period.as_secs_f64(),
                "Run cancelled, waiting for in-flight checks"
            );
            if tokio::time::timeout(self.config.grace_period, drain(&mut tasks, &mut slots))
                .await
                .is_err()
            {
                warn!(outstanding = tasks.len(), "Grace period expired, aborting remaining checks");
            }
            tasks.shutdown().await;
        }

        // A cancel that lands after the last result is still a cancelled run.
        let cancelled = self.cancel.is_cancelled();

        let groups = suite
            .groups()
            .iter()
            .zip(slots)
            .map(|(group, results)| GroupReport {
                name: group.name.clone(),
                results: group
                    .checks
                    .iter()
                    .zip(results)
                    .map(|(check, slot)| {
                        slot.unwrap_or_else(|| {
                            if cancelled {
                                EvaluationResult::cancelled(check.expectation.clone(), 0, Duration::ZERO)
                            } else {
                                EvaluationResult {
                                    expectation: check.expectation.clone(),
                                    status: CheckStatus::Error,
                                    message: "evaluation task did not complete".to_string(),
                                    attempts: 0,
                                    elapsed: Duration::ZERO,
                                }
                            }
                        })
                    })
                    .collect(),
            })
            .collect();

        let report = HealthReport::new(groups, !cancelled, started_at, start.elapsed());
        info!(
            verdict = %report.verdict,
            passed = report.passed_count(),
            total = report.total_checks(),
            complete = report.complete,
            "Health suite finished"
        );
        report
    }
}

/// Collect finished tasks into their slots until the set is empty.
async fn drain(tasks: &mut JoinSet<(usize, usize, EvaluationResult)>, slots: &mut Slots) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((group_index, check_index, result)) => {
                slots[group_index][check_index] = Some(result);
            }
            Err(err) if err.is_cancelled() => {}
            Err(err) => warn!(error = %err, "Evaluation task panicked"),
        }
    }
}
