//! Bounded, cancellable retry for eventually-consistent checks.
//!
//! Every retrying check in the crate goes through [`poll`], so attempt
//! counting, spacing and cancellation behave the same for pod readiness and
//! HTTPS reachability.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::ClientError;

/// How many times to try an eventually-consistent check and how long to wait
/// between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Upper bound on attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between two consecutive attempts.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Pod readiness: 10 polls, 5 seconds apart.
    pub const POD_READY: Self = Self {
        max_attempts: 10,
        interval: Duration::from_secs(5),
    };

    /// HTTPS reachability: 30 requests, 5 seconds apart.
    pub const HTTPS_REACHABLE: Self = Self {
        max_attempts: 30,
        interval: Duration::from_secs(5),
    };

    /// A single attempt with no waiting, used for point-in-time facts.
    #[must_use]
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            interval: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.max_attempts <= 1 {
            write!(f, "single attempt")
        } else {
            write!(f, "{}x every {:?}", self.max_attempts, self.interval)
        }
    }
}

/// What a single attempt observed.
#[derive(Debug)]
pub enum Attempt<T> {
    /// The condition holds; stop polling.
    Ready(T),
    /// Not there yet. The string is the diagnostic kept if this turns out to
    /// be the last attempt.
    Retry(String),
    /// Retrying cannot help (auth failure, malformed query).
    Abort(ClientError),
}

/// Terminal state of a polling loop.
#[derive(Debug)]
pub enum PollOutcome<T> {
    Ready(T),
    /// Every attempt failed; carries the last diagnostic.
    Exhausted(String),
    Cancelled,
    Aborted(ClientError),
}

/// Result of [`poll`]: the outcome plus how many attempts were made.
#[derive(Debug)]
pub struct Polled<T> {
    pub attempts: u32,
    pub outcome: PollOutcome<T>,
}

impl<T> Polled<T> {
    /// Collapse into the client error taxonomy. Exhaustion and cancellation
    /// both surface as [`ClientError::Transient`], never as `NotFound`.
    pub fn into_result(self, what: &str) -> Result<T, ClientError> {
        match self.outcome {
            PollOutcome::Ready(value) => Ok(value),
            PollOutcome::Exhausted(last) => Err(ClientError::Transient(format!(
                "{what} not ready after {} attempts: {last}",
                self.attempts
            ))),
            PollOutcome::Cancelled => Err(ClientError::Transient(format!(
                "cancelled while waiting for {what}"
            ))),
            PollOutcome::Aborted(err) => Err(err),
        }
    }
}

/// Run `attempt` until it reports [`Attempt::Ready`], the policy runs out of
/// attempts, or `cancel` fires.
///
/// The first attempt runs immediately. Cancellation is observed before each
/// attempt and during the wait between attempts; an attempt already in flight
/// is allowed to finish.
pub async fn poll<T, F, Fut>(policy: RetryPolicy, cancel: &CancellationToken, mut attempt: F) -> Polled<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut last = String::from("no attempt was made");

    for n in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Polled {
                attempts: n - 1,
                outcome: PollOutcome::Cancelled,
            };
        }

        match attempt(n).await {
            Attempt::Ready(value) => {
                return Polled {
                    attempts: n,
                    outcome: PollOutcome::Ready(value),
                }
            }
            Attempt::Abort(err) => {
                return Polled {
                    attempts: n,
                    outcome: PollOutcome::Aborted(err),
                }
            }
            Attempt::Retry(diagnostic) => {
                debug!(
                    attempt = n,
                    max_attempts = policy.max_attempts,
                    diagnostic = %diagnostic,
                    "Attempt did not succeed"
                );
                last = diagnostic;
            }
        }

        if n < policy.max_attempts {
            tokio::select! {
                () = cancel.cancelled() => {
                    return Polled {
                        attempts: n,
                        outcome: PollOutcome::Cancelled,
                    };
                }
                () = tokio::time::sleep(policy.interval) => {}
            }
        }
    }

    Polled {
        attempts: policy.max_attempts,
        outcome: PollOutcome::Exhausted(last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_poll_short_circuits_on_first_success() {
        let cancel = CancellationToken::new();
        let polled = poll(RetryPolicy::POD_READY, &cancel, |_| async { Attempt::Ready(()) }).await;

        assert_eq!(polled.attempts, 1);
        assert!(matches!(polled.outcome, PollOutcome::Ready(())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_exhausts_and_keeps_last_diagnostic() {
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let policy = RetryPolicy::new(4, Duration::from_secs(5));

        let polled: Polled<()> = poll(policy, &cancel, |n| async move {
            Attempt::Retry(format!("attempt {n} failed"))
        })
        .await;

        assert_eq!(polled.attempts, 4);
        match polled.outcome {
            PollOutcome::Exhausted(last) => assert_eq!(last, "attempt 4 failed"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // Three waits between four attempts, none after the last.
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_stops_on_abort() {
        let cancel = CancellationToken::new();
        let polled: Polled<()> = poll(RetryPolicy::POD_READY, &cancel, |n| async move {
            if n == 2 {
                Attempt::Abort(ClientError::Fatal("forbidden".into()))
            } else {
                Attempt::Retry("not yet".into())
            }
        })
        .await;

        assert_eq!(polled.attempts, 2);
        assert!(matches!(polled.outcome, PollOutcome::Aborted(ClientError::Fatal(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_cancelled_during_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            trigger.cancel();
        });

        let polled: Polled<()> =
            poll(RetryPolicy::POD_READY, &cancel, |_| async { Attempt::Retry("pending".into()) }).await;

        // Attempts at t=0 and t=5; the wait towards t=10 is interrupted.
        assert_eq!(polled.attempts, 2);
        assert!(matches!(polled.outcome, PollOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_poll_already_cancelled_makes_no_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let polled: Polled<()> = poll(RetryPolicy::POD_READY, &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Retry("unreachable".into()) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(polled.attempts, 0);
        assert!(matches!(polled.outcome, PollOutcome::Cancelled));
    }

    #[test]
    fn test_into_result_maps_exhaustion_to_transient() {
        let polled: Polled<()> = Polled {
            attempts: 10,
            outcome: PollOutcome::Exhausted("pod is Pending".into()),
        };
        let err = polled.into_result("pod argocd/argocd-server-abc").unwrap_err();
        assert!(matches!(err, ClientError::Transient(_)));
        assert!(err.to_string().contains("10 attempts"));
    }

    #[test]
    fn test_retry_policy_display() {
        assert_eq!(RetryPolicy::once().to_string(), "single attempt");
        assert_eq!(RetryPolicy::POD_READY.to_string(), "10x every 5s");
    }
}
