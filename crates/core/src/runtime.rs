//! Unit-of-work runner.
//!
//! Stands in for the durable-execution substrate: every delegated call
//! (model, tool, send) runs as a named unit with a bounded timeout and a
//! bounded retry count with exponential backoff. The orchestrator's own
//! control flow never sleeps, retries, or reads the clock - all of that
//! happens here, so the state machine stays a pure function of unit
//! results.

use std::future::Future;
use std::time::{Duration, Instant};

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};

use crate::error::Retryable;

/// Errors the runner can raise on behalf of a unit.
pub trait UnitError: Retryable {
    /// Constructed when an attempt exceeds the unit's timeout.
    fn timed_out(unit: &str, timeout: Duration) -> Self;
}

impl UnitError for crate::error::AgentError {
    fn timed_out(unit: &str, timeout: Duration) -> Self {
        crate::error::AgentError::Transient(format!("{unit} timed out after {timeout:?}"))
    }
}

impl UnitError for crate::error::DeliveryError {
    fn timed_out(unit: &str, timeout: Duration) -> Self {
        crate::error::DeliveryError::Transient(format!("{unit} timed out after {timeout:?}"))
    }
}

/// Bounded retry policy for one class of units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, first try included.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-attempt timeout.
    pub timeout_ms: u64,
}

impl RetryPolicy {
    /// Model-backed steps: a handful of quick retries.
    pub fn model_default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            timeout_ms: 45_000,
        }
    }

    /// Data-tool invocations.
    pub fn tool_default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            timeout_ms: 20_000,
        }
    }

    /// Outbound sends: more patient than anything pipeline-internal.
    pub fn delivery_default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            timeout_ms: 30_000,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_delay_ms))
            .with_max_interval(Duration::from_millis(self.max_delay_ms))
            .with_multiplier(2.0)
            .with_randomization_factor(0.5)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Successful unit execution plus the observability the audit log wants.
#[derive(Debug)]
pub struct UnitReport<T> {
    pub value: T,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

/// Terminal unit failure: retries exhausted or a non-retryable error.
#[derive(Debug)]
pub struct UnitFailure<E> {
    pub unit: String,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub error: E,
}

/// Run one unit of work under `policy`.
///
/// `op` is invoked once per attempt; each attempt is capped at
/// `policy.timeout_ms`. Non-retryable errors fail immediately; retryable
/// ones back off exponentially (with jitter) until the attempt cap.
pub async fn run_unit<T, E, F, Fut>(
    unit: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<UnitReport<T>, UnitFailure<E>>
where
    E: UnitError + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let timeout = Duration::from_millis(policy.timeout_ms);
    let started = Instant::now();
    let mut backoff = policy.backoff();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let result = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(unit, timeout)),
        };

        match result {
            Ok(value) => {
                return Ok(UnitReport {
                    value,
                    attempts: attempt,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
            Err(error) => {
                if !error.is_retryable() || attempt >= policy.max_attempts {
                    tracing::warn!(unit, attempt, %error, "unit of work exhausted");
                    return Err(UnitFailure {
                        unit: unit.to_string(),
                        attempts: attempt,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                        error,
                    });
                }
                let delay = backoff
                    .next_backoff()
                    .unwrap_or_else(|| Duration::from_millis(policy.max_delay_ms));
                tracing::warn!(unit, attempt, %error, ?delay, "retrying unit of work");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            timeout_ms: 200,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let report = run_unit("test.flaky", &fast_policy(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AgentError::Transient("hiccup".into()))
            } else {
                Ok::<_, AgentError>(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(report.value, 42);
        assert_eq!(report.attempts, 2);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let failure = run_unit("test.rejected", &fast_policy(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>(AgentError::Rejected("401".into()))
        })
        .await
        .unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_cap_is_respected() {
        let calls = AtomicU32::new(0);
        let failure = run_unit("test.exhausted", &fast_policy(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>(AgentError::Transient("still down".into()))
        })
        .await
        .unwrap_err();

        assert_eq!(failure.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            timeout_ms: 10,
        };
        let failure = run_unit("test.slow", &policy, || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, AgentError>(1)
        })
        .await
        .unwrap_err();

        assert_eq!(failure.attempts, 2);
        assert!(failure.error.is_retryable());
    }
}
