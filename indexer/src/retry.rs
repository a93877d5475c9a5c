//! Bounded exponential backoff for transient errors.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::StorageError;

/// Errors that may succeed on retry.
pub trait Retriable {
    /// Returns true if retrying may succeed.
    fn is_retriable(&self) -> bool;
}

impl Retriable for StorageError {
    fn is_retriable(&self) -> bool {
        self.is_transient()
    }
}

/// Retry policy for transient errors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Initial backoff in milliseconds.
    pub initial_backoff_ms: u64,

    /// Backoff multiplier.
    pub backoff_multiplier: f64,

    /// Maximum backoff in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10_000,
        }
    }
}

/// Final failure of [`RetryPolicy::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure<E> {
    /// Attempts made, including the first.
    pub attempts: u32,
    /// Error of the last attempt.
    pub error: E,
}

impl RetryPolicy {
    /// Calculates the backoff duration for a given retry count.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let backoff = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let backoff = if backoff.is_finite() {
            (backoff as u64).min(self.max_backoff_ms)
        } else {
            self.max_backoff_ms
        };
        Duration::from_millis(backoff)
    }

    /// Runs `operation` until it succeeds, fails permanently or runs out of
    /// retries. `on_retry` is called before each backoff sleep.
    ///
    /// # Errors
    ///
    /// Returns the last error together with the number of attempts.
    pub async fn run<T, E, F, Fut, R>(
        &self,
        mut operation: F,
        mut on_retry: R,
    ) -> Result<T, RetryFailure<E>>
    where
        E: Retriable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(u32, &E),
    {
        let mut retry = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retriable() && retry < self.max_retries => {
                    let delay = self.backoff(retry);
                    retry += 1;
                    warn!(
                        attempt = retry,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "transient error, retrying"
                    );
                    on_retry(retry, &error);
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    return Err(RetryFailure {
                        attempts: retry + 1,
                        error,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_backoff_ms: 1,
            backoff_multiplier: 2.0,
            max_backoff_ms: 4,
        }
    }

    #[test]
    fn test_backoff_growth() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_capped() {
        let policy = RetryPolicy {
            initial_backoff_ms: 1000,
            backoff_multiplier: 10.0,
            max_backoff_ms: 5000,
            ..Default::default()
        };
        assert_eq!(policy.backoff(2), Duration::from_millis(5000));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn test_run_retries_transient() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let mut retries = Vec::new();

        let result = fast()
            .run(
                move || async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StorageError::Transient("busy".to_string()))
                    } else {
                        Ok(42)
                    }
                },
                |attempt, _| retries.push(attempt),
            )
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_run_gives_up() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = fast()
            .run(
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(StorageError::Transient("down".to_string()))
                },
                |_, _| {},
            )
            .await;

        let failure = result.expect_err("exhausted");
        assert_eq!(failure.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_run_stops_on_permanent() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = fast()
            .run(
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(StorageError::Permanent("constraint".to_string()))
                },
                |_, _| {},
            )
            .await;

        assert_eq!(result.expect_err("permanent").attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
