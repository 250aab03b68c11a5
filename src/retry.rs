//! Bounded retry with exponential backoff.
//!
//! One utility shared by every content-engine and persistence-gateway call
//! site. Each attempt is individually wrapped in a timeout; a timed-out
//! attempt counts as a failed attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Retry policy for a single logical operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            timeout,
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Delay before attempt number `attempt` (1-based; attempt 1 never waits).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exp = self
            .base_delay
            .saturating_mul(1u32 << (attempt - 2).min(16))
            .min(self.max_delay);
        // Up to 10% jitter so parallel processes do not retry in lockstep.
        let jitter_ms = rand::thread_rng().gen_range(0..=exp.as_millis() as u64 / 10);
        exp + Duration::from_millis(jitter_ms)
    }
}

/// Why a retried operation ultimately failed.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error.
    Exhausted { attempts: u32, last: E },
    /// The last attempt timed out.
    TimedOut { attempts: u32, timeout: Duration },
}

impl<E> RetryError<E> {
    /// Attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::TimedOut { attempts, .. } => *attempts,
        }
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted { attempts, last } => {
                write!(f, "failed after {attempts} attempt(s): {last}")
            }
            Self::TimedOut { attempts, timeout } => {
                write!(f, "timed out after {attempts} attempt(s) ({timeout:?} each)")
            }
        }
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.
pub async fn retry_async<T, E, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let delay = policy.delay_for(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = match tokio::time::timeout(policy.timeout, op(attempt)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                warn!(op = op_name, attempt, max = policy.max_attempts, error = %e, "Attempt failed");
                RetryError::Exhausted { attempts: attempt, last: e }
            }
            Err(_) => {
                warn!(op = op_name, attempt, max = policy.max_attempts, timeout = ?policy.timeout, "Attempt timed out");
                RetryError::TimedOut {
                    attempts: attempt,
                    timeout: policy.timeout,
                }
            }
        };

        if attempt >= policy.max_attempts {
            return Err(failure);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(200)).with_base_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryError<String>> = retry_async(&fast(3), "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(format!("boom {attempt}"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RetryError<&str>> = retry_async(&fast(2), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope") }
        })
        .await;
        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last, "nope");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let policy = RetryPolicy::new(1, Duration::from_millis(10)).with_base_delay(Duration::ZERO);
        let result: Result<(), RetryError<String>> = retry_async(&policy, "slow", |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(RetryError::TimedOut { attempts: 1, .. })));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::from_secs(1)).max_attempts, 1);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::ZERO);
        assert!(policy.delay_for(2) >= Duration::from_secs(1));
        assert!(policy.delay_for(3) >= Duration::from_secs(2));
        assert!(policy.delay_for(10) <= Duration::from_secs(33));
    }
}
