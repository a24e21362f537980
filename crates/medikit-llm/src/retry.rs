//! Exponential-backoff retry for provider calls.

use crate::backend::{LlmError, LlmResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy: `max_attempts` tries with exponentially growing delays.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
        }
    }

    /// No retries; used for streaming once the first token has arrived.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            backoff_factor: 1.0,
        }
    }

    /// Run `op` until it succeeds or the attempt budget is exhausted.
    pub async fn run<T, F, Fut>(&self, name: &str, mut op: F) -> LlmResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LlmResult<T>>,
    {
        let mut delay = self.base_delay;
        let mut last_error = LlmError::ApiError("no attempts made".to_string());

        for attempt in 1..=self.max_attempts.max(1) {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt < self.max_attempts {
                        warn!(
                            target = name,
                            attempt,
                            max_attempts = self.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying after failure"
                        );
                        tokio::time::sleep(delay).await;
                        delay = delay.mul_f64(self.backoff_factor);
                    }
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();

        let counter = attempts.clone();
        let result = policy
            .run("test", move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(LlmError::ConnectionFailed("transient".into()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_budget_and_returns_last_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();

        let counter = attempts.clone();
        let result: LlmResult<()> = policy
            .run("test", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(LlmError::ApiError("persistent".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(LlmError::ApiError(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn none_policy_makes_a_single_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: LlmResult<()> = RetryPolicy::none()
            .run("test", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(LlmError::Timeout(1))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
