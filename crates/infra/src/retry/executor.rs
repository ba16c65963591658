use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};

use super::policy::RetryPolicy;
use super::{FailureKind, Retryable};

/// Why the last attempt of a retried operation failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttemptError<E> {
    #[error("{operation} timed out after {timeout:?}")]
    TimedOut { operation: String, timeout: Duration },

    #[error("{0}")]
    Failed(E),
}

impl<E> AttemptError<E> {
    /// Collapse into the operation's own error type, converting a timeout
    /// with `on_timeout`.
    pub fn into_inner_or_else(self, on_timeout: impl FnOnce(String, Duration) -> E) -> E {
        match self {
            AttemptError::TimedOut { operation, timeout } => on_timeout(operation, timeout),
            AttemptError::Failed(err) => err,
        }
    }
}

impl<E: Retryable> Retryable for AttemptError<E> {
    fn failure_kind(&self) -> FailureKind {
        match self {
            AttemptError::TimedOut { .. } => FailureKind::Transient,
            AttemptError::Failed(err) => err.failure_kind(),
        }
    }
}

/// Runs fallible async operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `op` until it succeeds, fails terminally, or the policy's
    /// attempts are exhausted.
    ///
    /// `op` receives the 1-based attempt number. Every attempt races the
    /// per-attempt timeout; a timeout counts as a transient failure. The last
    /// observed failure is returned.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, AttemptError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + fmt::Display,
    {
        let max_attempts = self.policy.effective_attempts();
        let timeout = self.policy.attempt_timeout;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let failure = match tokio::time::timeout(timeout, op(attempt)).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        info!(operation, attempts = attempt, "operation recovered after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(err)) => AttemptError::Failed(err),
                Err(_) => AttemptError::TimedOut {
                    operation: operation.to_string(),
                    timeout,
                },
            };

            if failure.failure_kind() == FailureKind::Terminal {
                warn!(operation, attempt, error = %failure, "terminal failure, not retrying");
                return Err(failure);
            }

            if attempt >= max_attempts {
                error!(operation, attempts = attempt, error = %failure, "operation failed after all attempts");
                return Err(failure);
            }

            let delay = self.policy.backoff_after(attempt - 1);
            warn!(
                operation,
                attempt,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %failure,
                "attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq, thiserror::Error)]
    enum TestError {
        #[error("flaky")]
        Flaky,
        #[error("quota exceeded")]
        Quota,
    }

    impl Retryable for TestError {
        fn failure_kind(&self) -> FailureKind {
            match self {
                TestError::Flaky => FailureKind::Transient,
                TestError::Quota => FailureKind::Terminal,
            }
        }
    }

    fn executor(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::new(RetryPolicy::default().with_max_attempts(max_attempts))
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_operation_runs_exactly_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), _> = executor(4)
            .run("always-fails", |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Flaky)
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), AttemptError::Failed(TestError::Flaky));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeding_on_attempt_k_runs_k_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let value = executor(5)
            .run("eventually-ok", |attempt| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 { Err(TestError::Flaky) } else { Ok(attempt) }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_failure_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), _> = executor(5)
            .run("quota", |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Quota)
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), AttemptError::Failed(TestError::Quota));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out_and_is_retried() {
        let policy = RetryPolicy::default()
            .with_max_attempts(2)
            .with_attempt_timeout(Duration::from_millis(50));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = RetryExecutor::new(policy)
            .run("slow-then-fast", |attempt| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    if attempt == 1 {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                    Ok::<_, TestError>("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_timeouts_surface_timed_out() {
        let policy = RetryPolicy::default()
            .with_max_attempts(2)
            .with_attempt_timeout(Duration::from_millis(10));

        let result: Result<(), AttemptError<TestError>> = RetryExecutor::new(policy)
            .run("hangs", |_| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;

        match result {
            Err(AttemptError::TimedOut { operation, timeout }) => {
                assert_eq!(operation, "hangs");
                assert_eq!(timeout, Duration::from_millis(10));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delays_between_attempts_follow_backoff() {
        let policy = RetryPolicy::default()
            .with_max_attempts(6)
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Some(Duration::from_millis(500)));
        let starts: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
        let s = starts.clone();

        let _: Result<(), _> = RetryExecutor::new(policy.clone())
            .run("backoff", |_| {
                let s = s.clone();
                async move {
                    s.lock().unwrap().push(Instant::now());
                    Err(TestError::Flaky)
                }
            })
            .await;

        let starts = starts.lock().unwrap();
        assert_eq!(starts.len(), 6);
        let gaps: Vec<Duration> = starts.windows(2).map(|w| w[1] - w[0]).collect();
        let expected: Vec<Duration> = (0..5).map(|i| policy.backoff_after(i)).collect();
        assert_eq!(gaps, expected);
        assert_eq!(
            expected,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
    }
}
