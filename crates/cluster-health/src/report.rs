//! Health report aggregation and formatting.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::evaluator::{CheckStatus, EvaluationResult};
use crate::ui;

pub(crate) fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// Results of one expectation group, in definition order.
#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub name: String,
    pub results: Vec<EvaluationResult>,
}

impl GroupReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(EvaluationResult::passed)
    }

    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }
}

/// The complete report of a suite run.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub started_at: DateTime<Utc>,
    #[serde(rename = "elapsed_ms", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// False when the run was cancelled before every evaluation finished.
    pub complete: bool,
    pub verdict: Verdict,
    pub groups: Vec<GroupReport>,
}

impl HealthReport {
    /// Build a report. The verdict is `Fail` if any result is not `Pass` or
    /// the run is incomplete.
    #[must_use]
    pub fn new(groups: Vec<GroupReport>, complete: bool, started_at: DateTime<Utc>, elapsed: Duration) -> Self {
        let all_passed = groups.iter().all(GroupReport::all_passed);
        let verdict = if complete && all_passed {
            Verdict::Pass
        } else {
            Verdict::Fail
        };

        Self {
            started_at,
            elapsed,
            complete,
            verdict,
            groups,
        }
    }

    /// Whether the process should exit successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn results(&self) -> impl Iterator<Item = &EvaluationResult> {
        self.groups.iter().flat_map(|g| g.results.iter())
    }

    #[must_use]
    pub fn total_checks(&self) -> usize {
        self.results().count()
    }

    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.count(CheckStatus::Pass)
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.count(CheckStatus::Error)
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.results().filter(|r| r.status == status).count()
    }

    /// Print a human-readable summary to stdout.
    pub fn print_summary(&self) {
        for group in &self.groups {
            ui::print_section(&format!(
                "{} ({}/{} passed)",
                group.name,
                group.passed_count(),
                group.results.len()
            ));

            for result in &group.results {
                let detail = format!(
                    "{} [{} attempt{}, {:.1}s]",
                    result.message,
                    result.attempts,
                    if result.attempts == 1 { "" } else { "s" },
                    result.elapsed.as_secs_f64()
                );
                match result.status {
                    CheckStatus::Pass => {
                        ui::print_check_result(&result.expectation.to_string(), true, Some(&detail));
                    }
                    CheckStatus::Fail => {
                        ui::print_check_result(&result.expectation.to_string(), false, Some(&detail));
                    }
                    CheckStatus::Error => {
                        ui::print_check_error(&result.expectation.to_string(), &detail);
                    }
                }
            }
        }

        println!();
        ui::print_kv(
            "Summary",
            &format!(
                "{}/{} passed, {} failed, {} errors in {:.1}s",
                self.passed_count(),
                self.total_checks(),
                self.failed_count(),
                self.error_count(),
                self.elapsed.as_secs_f64()
            ),
        );

        if !self.complete {
            ui::print_warning("Run was cancelled; the report is incomplete");
        }
        if self.is_success() {
            ui::print_success("Cluster health checks passed");
        } else {
            ui::print_error("Cluster health checks failed");
        }
        println!();
    }
}
