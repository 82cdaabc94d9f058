//! Bounded retry with exponential backoff for metadata requests.
//!
//! Attempts run strictly one after another. Between attempts the caller
//! sleeps for `base_delay * 2^(attempt-1)` (capped at `max_delay`), or for the
//! server's Retry-After hint when that is longer. Cancellation is observed
//! during the sleep.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::requester::RequestError;

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Must be at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add up to 25% random extra delay to each backoff.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: RequestError },
    #[error("{0}")]
    Permanent(RequestError),
    #[error("cancelled")]
    Cancelled,
}

impl RetryPolicy {
    /// A policy with no delays, for tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Deterministic backoff after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff to apply after `attempt` failed with `err`.
    ///
    /// A Retry-After hint wins when it is longer than the computed delay, but
    /// is still capped at `max_delay`.
    pub fn backoff(&self, attempt: u32, err: &RequestError) -> Duration {
        let mut delay = self.delay_for(attempt);
        if let Some(hint) = err.retry_after() {
            delay = delay.max(hint.min(self.max_delay));
        }
        if self.jitter && !delay.is_zero() {
            let extra_ms = fastrand::u64(0..=delay.as_millis() as u64 / 4);
            delay += Duration::from_millis(extra_ms);
        }
        delay
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts,
    /// or `cancel` fires.
    ///
    /// `op` receives the 1-based attempt number. `on_retry` is called before
    /// each backoff sleep with the failed attempt number, the chosen delay and
    /// the error.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
        mut on_retry: impl FnMut(u32, Duration, &RequestError),
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RequestError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(RetryError::Permanent(err));
            }
            if attempt >= max_attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.backoff(attempt, &err);
            on_retry(attempt, delay, &err);
            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fixed(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = fixed(10);
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(40), Duration::from_secs(30));
    }

    #[test]
    fn retry_after_hint_extends_delay() {
        let policy = fixed(3);
        let err = RequestError::RateLimited {
            retry_after: Some(Duration::from_secs(10)),
        };
        assert_eq!(policy.backoff(1, &err), Duration::from_secs(10));

        let huge = RequestError::RateLimited {
            retry_after: Some(Duration::from_secs(3600)),
        };
        assert_eq!(policy.backoff(1, &huge), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let policy = RetryPolicy {
            jitter: true,
            ..fixed(3)
        };
        let err = RequestError::Transient("x".into());
        for _ in 0..50 {
            let d = policy.backoff(2, &err);
            assert!(d >= Duration::from_secs(4));
            assert!(d <= Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Cell::new(0u32);
        let retries = Cell::new(0u32);
        let cancel = CancellationToken::new();

        let result = fixed(3)
            .run(
                &cancel,
                |attempt| {
                    calls.set(calls.get() + 1);
                    async move {
                        if attempt < 3 {
                            Err(RequestError::Transient("503".into()))
                        } else {
                            Ok("done")
                        }
                    }
                },
                |_, _, _| retries.set(retries.get() + 1),
            )
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.get(), 3);
        assert_eq!(retries.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts() {
        let calls = Cell::new(0u32);
        let cancel = CancellationToken::new();

        let result: Result<(), _> = fixed(4)
            .run(
                &cancel,
                |_| {
                    calls.set(calls.get() + 1);
                    async { Err(RequestError::RateLimited { retry_after: None }) }
                },
                |_, _, _| {},
            )
            .await;

        assert_eq!(calls.get(), 4);
        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert_eq!(last, RequestError::RateLimited { retry_after: None });
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let calls = Cell::new(0u32);
        let cancel = CancellationToken::new();

        let result: Result<(), _> = fixed(5)
            .run(
                &cancel,
                |_| {
                    calls.set(calls.get() + 1);
                    async { Err(RequestError::Permanent("HTTP 403".into())) }
                },
                |_, _, _| {},
            )
            .await;

        assert_eq!(calls.get(), 1);
        assert!(matches!(result, Err(RetryError::Permanent(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_sleeps_are_observed() {
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        let _: Result<(), _> = fixed(3)
            .run(
                &cancel,
                |_| async { Err(RequestError::Transient("x".into())) },
                |_, _, _| {},
            )
            .await;

        // 2s after the first failure, 4s after the second
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(6100), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let calls = Cell::new(0u32);

        let result: Result<(), _> = fixed(5)
            .run(
                &cancel,
                |_| {
                    calls.set(calls.get() + 1);
                    async { Err(RequestError::Transient("x".into())) }
                },
                |_, _, _| cancel.cancel(),
            )
            .await;

        assert_eq!(result, Err(RetryError::Cancelled));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let cancel = CancellationToken::new();
        let result = RetryPolicy::immediate(0)
            .run(&cancel, |_| async { Ok::<_, RequestError>(1) }, |_, _, _| {})
            .await;
        assert_eq!(result, Ok(1));
    }
}
