//! Bounded retry helpers.
//!
//! `RetryPolicy` runs an operation a fixed number of times with a fixed gap.
//! `Backoff` computes capped exponential delays for loops that never give up.

use std::future::Future;
use std::time::Duration;

/// Fixed-count, fixed-delay policy. No backoff growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

/// Every attempt of [`RetryPolicy::retry`] failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Tally of [`RetryPolicy::repeat`].
#[derive(Debug)]
pub struct RepeatReport<E> {
    pub successes: u32,
    pub failures: Vec<E>,
}

impl<E> RepeatReport<E> {
    pub fn any_succeeded(&self) -> bool {
        self.successes > 0
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds or the attempts run out. `op` receives the 1-based attempt number.
    pub async fn retry<T, E, F, Fut>(&self, op: F) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.retry_while(op, |_| true).await
    }

    /// Like [`retry`](Self::retry) but gives up at once on errors `retryable` rejects.
    pub async fn retry_while<T, E, F, Fut, P>(&self, mut op: F, retryable: P) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= attempts || !retryable(&e) => {
                    return Err(Exhausted {
                        attempts: attempt,
                        last_error: e,
                    })
                }
                Err(_) => {
                    attempt += 1;
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
    }

    /// Run `op` exactly `attempts` times regardless of outcome (redundant sends).
    pub async fn repeat<E, F, Fut>(&self, mut op: F) -> RepeatReport<E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let attempts = self.attempts.max(1);
        let mut report = RepeatReport {
            successes: 0,
            failures: Vec::new(),
        };
        for attempt in 1..=attempts {
            match op(attempt).await {
                Ok(()) => report.successes += 1,
                Err(e) => report.failures.push(e),
            }
            if attempt < attempts && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
        report
    }
}

/// Capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// attempt 0: zero, attempt n: min(base * 2^(n-1), max)
    pub fn for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        std::cmp::min(self.base.saturating_mul(multiplier), self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_calculation() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(5));
        assert_eq!(backoff.for_attempt(0), Duration::ZERO);
        assert_eq!(backoff.for_attempt(1), Duration::from_millis(100));
        assert_eq!(backoff.for_attempt(3), Duration::from_millis(400));
        // 6.4s capped
        assert_eq!(backoff.for_attempt(7), Duration::from_secs(5));
        assert_eq!(backoff.for_attempt(100), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_at_first_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(200));
        let result: Result<u32, Exhausted<&str>> = policy
            .retry(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err("not yet")
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_reports_last_error() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let err = policy
            .retry(|attempt| async move { Err::<(), _>(attempt) })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_while_stops_on_fatal_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let err = policy
            .retry_while(
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err::<(), _>(if attempt == 2 { "fatal" } else { "flaky" }) }
                },
                |e| *e != "fatal",
            )
            .await
            .unwrap_err();
        assert_eq!(err.last_error, "fatal");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_runs_every_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(150));
        let start = tokio::time::Instant::now();
        let report = policy
            .repeat(|attempt| async move {
                if attempt == 2 {
                    Err("lost")
                } else {
                    Ok(())
                }
            })
            .await;
        assert_eq!(report.successes, 2);
        assert_eq!(report.failures, vec!["lost"]);
        assert!(report.any_succeeded());
        // two gaps between three sends
        assert!(start.elapsed() >= Duration::from_millis(300));
    }
}
