//! Capped exponential backoff for transient failures.
//!
//! Both the enricher (TheTVDB lookups) and the dispatcher (Telegram sends)
//! retry transient errors forever with the same [`BackoffPolicy`]:
//!
//! ```text
//! attempt:  1   2   3   4    5    6    7    8 ...
//! sleep:    1s  2s  4s  8s  16s  32s  60s  60s ...
//! ```
//!
//! Permanent errors are returned to the caller immediately. The stop token is
//! checked before every attempt and before every sleep, and the sleep itself
//! is raced against it, so a stop request never waits out a backoff interval.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Errors that know whether retrying could help.
pub trait Transient {
    /// Returns true for failures expected to resolve with time.
    fn is_transient(&self) -> bool;
}

/// Retry backoff policy.
///
/// The delay before retry `n` (1-indexed) is `first × factor^(n-1)`, clamped
/// to `max`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt
    pub first: Duration,
    /// Upper bound for any single delay
    pub max: Duration,
    /// Multiplicative growth factor
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// 1s, 2s, 4s, ... capped at 60s.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(60),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay to sleep after failed attempt number `attempt` (starting at 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

/// Final result of [`retry_transient`].
#[derive(Debug, PartialEq)]
pub enum RetryOutcome<T, E> {
    /// The operation eventually succeeded
    Done(T),
    /// The operation failed with a non-transient error
    Failed(E),
    /// The stop token was cancelled before success
    Stopped,
}

/// Run `op` until it succeeds, fails permanently, or `stop` is cancelled.
///
/// Every transient failure is logged with the attempt number and the sleep
/// that follows it.
pub async fn retry_transient<T, E, F, Fut>(
    operation: &str,
    policy: &BackoffPolicy,
    stop: &CancellationToken,
    mut op: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + fmt::Display,
{
    let mut attempt: u32 = 1;

    loop {
        if stop.is_cancelled() {
            return RetryOutcome::Stopped;
        }

        let error = match op().await {
            Ok(value) => return RetryOutcome::Done(value),
            Err(e) if e.is_transient() => e,
            Err(e) => return RetryOutcome::Failed(e),
        };

        let sleep = policy.delay(attempt);
        warn!(
            operation = %operation,
            attempt = attempt,
            sleep_secs = sleep.as_secs_f64(),
            error = %error,
            "{} in trouble; attempt={} sleep={:?}",
            operation,
            attempt,
            sleep
        );

        if stop.is_cancelled() {
            return RetryOutcome::Stopped;
        }

        tokio::select! {
            biased;
            _ = stop.cancelled() => return RetryOutcome::Stopped,
            _ = tokio::time::sleep(sleep) => {}
        }

        attempt = attempt.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Blip,
        Fatal,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Transient for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Blip)
        }
    }

    #[test]
    fn test_default_delays_double_and_cap() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (1..=9).map(|a| policy.delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn test_attempt_zero_treated_as_first() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
    }

    #[test]
    fn test_huge_attempt_clamps_to_max() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_constant_factor() {
        let policy = BackoffPolicy {
            first: Duration::from_millis(500),
            max: Duration::from_secs(60),
            factor: 1.0,
        };
        for attempt in 1..10 {
            assert_eq!(policy.delay(attempt), Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_with_backoff_then_succeeds() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let stop = CancellationToken::new();
        let policy = BackoffPolicy::default();

        let recorded = calls.clone();
        let outcome = retry_transient("test op", &policy, &stop, || {
            let recorded = recorded.clone();
            async move {
                let mut calls = recorded.lock().unwrap();
                calls.push(Instant::now());
                if calls.len() <= 4 {
                    Err(TestError::Blip)
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(outcome, RetryOutcome::Done("done"));

        let calls = calls.lock().unwrap();
        let gaps: Vec<u64> = calls.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!(gaps, vec![1, 2, 4, 8]);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let stop = CancellationToken::new();

        let counter = calls.clone();
        let outcome: RetryOutcome<(), _> =
            retry_transient("test op", &BackoffPolicy::default(), &stop, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            })
            .await;

        assert_eq!(outcome, RetryOutcome::Failed(TestError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let stop = CancellationToken::new();
        stop.cancel();

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome: RetryOutcome<(), TestError> =
            retry_transient("test op", &BackoffPolicy::default(), &stop, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert_eq!(outcome, RetryOutcome::Stopped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_backoff_sleep() {
        let stop = CancellationToken::new();
        let policy = BackoffPolicy {
            first: Duration::from_secs(60),
            ..BackoffPolicy::default()
        };

        let trigger = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome: RetryOutcome<(), _> =
            retry_transient("test op", &policy, &stop, || async { Err(TestError::Blip) }).await;

        assert_eq!(outcome, RetryOutcome::Stopped);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
