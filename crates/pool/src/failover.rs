//! Walks an ordered candidate list applying the retry policy.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tabgate_core_types::{ErrorCode, GatewayError, GatewayResult};
use tracing::debug;

/// Cross-candidate retry policy, from `backend.pool.failover`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverPolicy {
    pub enabled: bool,
    #[serde(rename = "maxRetries")]
    pub max_retries: u32,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
        }
    }
}

/// One candidate's outcome.
pub enum AttemptOutcome<T> {
    Done(T),
    /// The candidate could not be attempted at all (e.g. busy). Does not
    /// count against the retry budget and produces no error of its own.
    Skip(&'static str),
    Fail(GatewayError),
}

/// Result of walking the list.
pub enum FailoverRun<T> {
    Finished(GatewayResult<T>),
    /// Every candidate was skipped without a single attempt.
    Starved,
}

/// Try candidates in order until one succeeds.
///
/// Retryable failures consume the budget; non-retryable failures skip to the
/// next candidate without consuming it (the next candidate is a different
/// adapter and may not share the limitation). Effective attempts are
/// `min(max_retries + 1, N)`, or all N when `max_retries` is zero. The last
/// underlying cause is wrapped as `FAILOVER_EXHAUSTED`.
pub async fn run_failover<C, F, Fut, T>(
    candidates: &[C],
    max_retries: u32,
    mut attempt: F,
    mut on_retry: impl FnMut(&C, &GatewayError, usize),
) -> FailoverRun<T>
where
    F: FnMut(&C) -> Fut,
    Fut: Future<Output = AttemptOutcome<T>>,
{
    let budget = if max_retries > 0 {
        (max_retries as usize + 1).min(candidates.len())
    } else {
        candidates.len()
    };

    let mut counted = 0usize;
    let mut last_error: Option<GatewayError> = None;

    for (index, candidate) in candidates.iter().enumerate() {
        match attempt(candidate).await {
            AttemptOutcome::Done(value) => return FailoverRun::Finished(Ok(value)),
            AttemptOutcome::Skip(reason) => {
                debug!(index, reason, "failover candidate skipped");
                continue;
            }
            AttemptOutcome::Fail(error) => {
                if error.retryable() {
                    counted += 1;
                }
                on_retry(candidate, &error, index);
                last_error = Some(error);
                if counted >= budget {
                    break;
                }
            }
        }
    }

    match last_error {
        Some(cause) => FailoverRun::Finished(Err(GatewayError::new(
            ErrorCode::FailoverExhausted,
            format!("all candidates failed; last error: {}", cause.message),
        ))),
        None => FailoverRun::Starved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn timeout_error() -> GatewayError {
        GatewayError::classified("Timeout waiting for upstream response")
    }

    #[tokio::test]
    async fn first_success_wins() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let run = run_failover(
            &["a", "b", "c"],
            2,
            |_c| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    AttemptOutcome::Done("ok")
                }
            },
            |_, _, _| {},
        )
        .await;
        match run {
            FailoverRun::Finished(Ok(value)) => assert_eq!(value, "ok"),
            _ => panic!("expected success"),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_failures_consume_budget() {
        // max_retries = 1 means two effective attempts over four candidates.
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let run = run_failover(
            &[1, 2, 3, 4],
            1,
            |_c| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    AttemptOutcome::<()>::Fail(timeout_error())
                }
            },
            |_, _, _| {},
        )
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        match run {
            FailoverRun::Finished(Err(err)) => {
                assert_eq!(err.code, ErrorCode::FailoverExhausted);
                assert!(err.message.contains("Timeout"), "message: {}", err.message);
            }
            _ => panic!("expected exhaustion"),
        }
    }

    #[tokio::test]
    async fn zero_retries_tries_every_candidate_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let _ = run_failover(
            &[1, 2, 3],
            0,
            |_c| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    AttemptOutcome::<()>::Fail(timeout_error())
                }
            },
            |_, _, _| {},
        )
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_skips_without_consuming_budget() {
        // Candidate 1 fails non-retryably, 2 retryably, 3 succeeds. With
        // max_retries = 1 the non-retryable skip must not spend the budget.
        let run = run_failover(
            &[1usize, 2, 3],
            1,
            |c| {
                let c = *c;
                async move {
                    match c {
                        1 => AttemptOutcome::Fail(GatewayError::invalid_model("m")),
                        2 => AttemptOutcome::Fail(timeout_error()),
                        _ => AttemptOutcome::Done("late success"),
                    }
                }
            },
            |_, _, _| {},
        )
        .await;
        match run {
            FailoverRun::Finished(Ok(value)) => assert_eq!(value, "late success"),
            _ => panic!("expected the third candidate to win"),
        }
    }

    #[tokio::test]
    async fn all_skipped_is_starved() {
        let run = run_failover(
            &[1, 2],
            2,
            |_c| async { AttemptOutcome::<()>::Skip("busy") },
            |_, _, _| {},
        )
        .await;
        assert!(matches!(run, FailoverRun::Starved));
    }

    #[tokio::test]
    async fn on_retry_sees_each_failure() {
        let mut seen = Vec::new();
        let _ = run_failover(
            &["a", "b"],
            0,
            |_c| async { AttemptOutcome::<()>::Fail(timeout_error()) },
            |candidate, _err, index| seen.push((*candidate, index)),
        )
        .await;
        assert_eq!(seen, vec![("a", 0), ("b", 1)]);
    }
}
