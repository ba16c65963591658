use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy as a value object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay. `None` means uncapped.
    pub max_delay: Option<Duration>,
    /// Multiplier applied to the delay after every failed attempt.
    pub backoff_factor: f64,
    /// Each attempt is abandoned (and counted as failed) after this long.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Some(Duration::from_millis(10_000)),
            backoff_factor: 2.0,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy for crediting tokens after a captured payment:
    /// 1s, 2s, 4s, ... with no cap.
    pub fn crediting() -> Self {
        Self {
            max_delay: None,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Attempts actually made by an executor using this policy.
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the attempt at 0-based index `attempt` failed:
    /// `min(initial_delay * backoff_factor^attempt, max_delay)`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent);
        let delay = if nanos.is_finite() && nanos < u64::MAX as f64 {
            Duration::from_nanos(nanos.round() as u64)
        } else {
            Duration::MAX
        };
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            anyhow::bail!("backoff_factor must be a finite number >= 1.0");
        }
        if self.attempt_timeout.is_zero() {
            anyhow::bail!("attempt_timeout must be greater than zero");
        }
        if let Some(cap) = self.max_delay {
            if cap < self.initial_delay {
                anyhow::bail!("max_delay must not be smaller than initial_delay");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_caps_at_ten_seconds() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (0..6).map(|i| policy.backoff_after(i)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(10),
                Duration::from_secs(10),
            ]
        );
    }

    #[test]
    fn crediting_policy_is_uncapped() {
        let policy = RetryPolicy::crediting();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_after(5), Duration::from_secs(32));
    }

    #[test]
    fn huge_exponent_saturates_instead_of_panicking() {
        let policy = RetryPolicy::crediting();
        assert_eq!(policy.backoff_after(u32::MAX), Duration::MAX);
        assert_eq!(RetryPolicy::default().backoff_after(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        assert_eq!(RetryPolicy::default().with_max_attempts(0).effective_attempts(), 1);
    }

    #[test]
    fn validation_rejects_shrinking_backoff() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::default().with_backoff_factor(0.5).validate().is_err());
        assert!(RetryPolicy::default().with_attempt_timeout(Duration::ZERO).validate().is_err());
    }

    proptest::proptest! {
        #[test]
        fn delays_never_shrink_and_respect_the_cap(
            initial_ms in 1u64..5_000,
            factor in 1.0f64..4.0,
            cap_ms in 5_000u64..60_000,
            attempt in 0u32..40,
        ) {
            let policy = RetryPolicy::default()
                .with_initial_delay(Duration::from_millis(initial_ms))
                .with_backoff_factor(factor)
                .with_max_delay(Some(Duration::from_millis(cap_ms)));

            let this = policy.backoff_after(attempt);
            let next = policy.backoff_after(attempt + 1);
            proptest::prop_assert!(next >= this);
            proptest::prop_assert!(this <= Duration::from_millis(cap_ms));
        }
    }
}
