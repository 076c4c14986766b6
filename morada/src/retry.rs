//! Retry policies for external calls (scraper, LLM, vision).
//!
//! Retries live at the call sites, not in the graph runner: a stage or client
//! wraps its own upstream call in [`run_with_retry`] and only transient
//! failures are retried.

use std::future::Future;
use std::time::Duration;

use crate::error::AgentError;

/// Retry policy: how many times and with what delay to retry a failed call.
#[derive(Debug, Clone)]
pub enum RetryPolicy {
    /// Fail immediately on error.
    None,
    /// Constant delay between attempts.
    Fixed {
        max_attempts: usize,
        interval: Duration,
    },
    /// Exponentially increasing delay, capped at `max_interval`.
    Exponential {
        max_attempts: usize,
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
    },
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy::None
    }

    pub fn fixed(max_attempts: usize, interval: Duration) -> Self {
        RetryPolicy::Fixed {
            max_attempts,
            interval,
        }
    }

    pub fn exponential(
        max_attempts: usize,
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
    ) -> Self {
        RetryPolicy::Exponential {
            max_attempts,
            initial_interval,
            max_interval,
            multiplier,
        }
    }

    /// True when attempt number `attempt` (0-based count of failures so far)
    /// should be followed by another try.
    pub fn should_retry(&self, attempt: usize) -> bool {
        match self {
            RetryPolicy::None => false,
            RetryPolicy::Fixed { max_attempts, .. }
            | RetryPolicy::Exponential { max_attempts, .. } => attempt < *max_attempts,
        }
    }

    /// Delay before retrying after `attempt` failures.
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            RetryPolicy::None => Duration::ZERO,
            RetryPolicy::Fixed { interval, .. } => *interval,
            RetryPolicy::Exponential {
                initial_interval,
                max_interval,
                multiplier,
                ..
            } => {
                let factor = multiplier.powi(attempt as i32);
                let delay = initial_interval.as_secs_f64() * factor;
                Duration::from_secs_f64(delay.min(max_interval.as_secs_f64()))
            }
        }
    }
}

/// Runs `op`, retrying transient failures per `policy`. Non-transient errors
/// return immediately; a transient error that exhausts the budget is returned
/// as-is.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && policy.should_retry(attempt) => {
                let delay = policy.delay(attempt);
                tracing::debug!(attempt, ?delay, error = %e, "retrying transient failure");
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// **Scenario**: exponential delays double and respect the cap.
    #[test]
    fn exponential_delay_doubles_and_caps() {
        let p = RetryPolicy::exponential(
            3,
            Duration::from_secs(2),
            Duration::from_secs(6),
            2.0,
        );
        assert_eq!(p.delay(0), Duration::from_secs(2));
        assert_eq!(p.delay(1), Duration::from_secs(4));
        assert_eq!(p.delay(2), Duration::from_secs(6)); // capped, not 8
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
    }

    #[test]
    fn none_never_retries() {
        let p = RetryPolicy::none();
        assert!(!p.should_retry(0));
        assert_eq!(p.delay(0), Duration::ZERO);
    }

    /// **Scenario**: transient failures are retried until success; the
    /// operation runs exactly failures + 1 times.
    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        let out = run_with_retry(&policy, move || {
            let calls = calls2.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AgentError::Transient("503".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    /// **Scenario**: permanent failures are not retried.
    #[tokio::test]
    async fn permanent_fails_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        let out: Result<(), _> = run_with_retry(&policy, move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AgentError::Permanent("404".into()))
            }
        })
        .await;
        assert!(matches!(out, Err(AgentError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// **Scenario**: a transient error that exhausts the budget is returned.
    #[tokio::test]
    async fn transient_exhausts_budget() {
        let policy = RetryPolicy::fixed(2, Duration::ZERO);
        let out: Result<(), _> = run_with_retry(&policy, || async {
            Err(AgentError::Transient("timeout".into()))
        })
        .await;
        assert!(matches!(out, Err(AgentError::Transient(_))));
    }
}
