//! Bounded, fixed-delay retry.
//!
//! Every failure is retried the same way: no backoff, no jitter, and each
//! attempt reissues the whole call.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use super::error::LLMError;

/// Retry settings passed explicitly to [`RetryPolicy::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` counts the first call; zero is treated as one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    ///
    /// Sleeps `delay` between attempts only. Once attempts run out, the last
    /// error is wrapped in [`LLMError::Exhausted`].
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, LLMError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LLMError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt >= self.max_attempts => {
                    return Err(LLMError::Exhausted {
                        attempts: attempt,
                        last: Box::new(error),
                    });
                }
                Err(error) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "LLM call failed, retrying"
                    );
                    sleep(self.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn server_error() -> LLMError {
        LLMError::Api {
            status: 500,
            message: "Server error".to_string(),
        }
    }

    #[tokio::test]
    async fn success_on_first_attempt_does_not_wait() {
        let policy = RetryPolicy::new(3, Duration::from_secs(60));
        let start = Instant::now();

        let result = policy.execute(|| async { Ok::<_, LLMError>("ok") }).await;

        assert_eq!(result.unwrap(), "ok");
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn success_on_second_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::from_millis(5));

        let result = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(server_error())
                    } else {
                        Ok("success")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let delay = Duration::from_millis(20);
        let policy = RetryPolicy::new(4, delay);
        let start = Instant::now();

        let result: Result<(), LLMError> = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(server_error())
                }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 4);
        // Three waits between four attempts.
        assert!(start.elapsed() >= delay * 3);

        match result.unwrap_err() {
            LLMError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, LLMError::Api { status: 500, .. }));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_attempts_still_calls_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);

        let result: Result<(), LLMError> = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(LLMError::InvalidResponse("empty".to_string()))
                }
            })
            .await;

        assert!(result.unwrap_err().is_exhausted());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
