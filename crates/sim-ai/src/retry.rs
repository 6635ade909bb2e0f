use crate::{Advice, AdvisoryError, AdvisoryRequest, Advisor};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Bounds on how long the engine waits for the panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Per-attempt deadline.
    pub attempt_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            attempt_timeout_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Delay before retry number `retry` (1-based), doubling up to the cap.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

/// Wraps an advisor with a per-attempt timeout and capped exponential
/// backoff. Only transient failures are retried.
#[derive(Debug)]
pub struct RetryingAdvisor<A> {
    inner: A,
    policy: RetryPolicy,
}

impl<A> RetryingAdvisor<A> {
    pub fn new(inner: A, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn into_inner(self) -> A {
        self.inner
    }
}

impl<A: Advisor + Send> Advisor for RetryingAdvisor<A> {
    async fn advise(&mut self, request: &AdvisoryRequest) -> Result<Advice, AdvisoryError> {
        let attempts = self.policy.max_attempts.max(1);
        let deadline = self.policy.attempt_timeout();
        let mut attempt = 1;
        loop {
            let outcome = match timeout(deadline, self.inner.advise(request)).await {
                Ok(result) => result,
                Err(_) => Err(AdvisoryError::Timeout(deadline)),
            };
            let err = match outcome {
                Ok(advice) => {
                    debug!(week = request.week, attempt, "advisory call succeeded");
                    return Ok(advice);
                }
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => err,
            };
            if attempt >= attempts {
                return Err(AdvisoryError::Exhausted {
                    attempts,
                    last: Box::new(err),
                });
            }
            let wait = self.policy.backoff(attempt);
            warn!(week = request.week, attempt, error = %err, ?wait, "retrying advisory call");
            sleep(wait).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptedAdvisor;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            attempt_timeout_ms: 50,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(1_000));
        assert_eq!(p.backoff(10), Duration::from_millis(8_000));
        assert_eq!(p.backoff(200), Duration::from_millis(8_000));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let script = ScriptedAdvisor::new(vec![
            Err(AdvisoryError::Transient("rate limited".into())),
            Ok(Advice::default()),
        ]);
        let mut advisor = RetryingAdvisor::new(script, fast(3));
        let req = AdvisoryRequest::new(1, "SALES", "x");
        assert!(advisor.advise(&req).await.is_ok());
        assert_eq!(advisor.inner().requests().len(), 2);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let script = ScriptedAdvisor::new(vec![Err(AdvisoryError::Malformed("bad".into()))]);
        let mut advisor = RetryingAdvisor::new(script, fast(3));
        let err = advisor
            .advise(&AdvisoryRequest::new(1, "SALES", "x"))
            .await
            .unwrap_err();
        assert_eq!(err, AdvisoryError::Malformed("bad".into()));
        assert_eq!(advisor.inner().requests().len(), 1);
    }

    #[tokio::test]
    async fn slow_panel_times_out_then_exhausts() {
        let script = ScriptedAdvisor::new(vec![Ok(Advice::default()), Ok(Advice::default())])
            .with_delay(Duration::from_millis(500));
        let mut advisor = RetryingAdvisor::new(script, fast(2));
        let err = advisor
            .advise(&AdvisoryRequest::new(1, "SALES", "x"))
            .await
            .unwrap_err();
        match err {
            AdvisoryError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, AdvisoryError::Timeout(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
