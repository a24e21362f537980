//! Per-provider circuit breaker.
//!
//! The breaker wraps the whole retry loop: one guarded call is one outcome,
//! however many attempts the retry policy burned inside it.

use crate::backend::{LlmError, LlmResult};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Rejecting calls until the recovery timeout elapses.
    Open,
    /// Admitting a single probe.
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker with closed → open → half-open transitions.
///
/// Opens after `failure_threshold` consecutive failures; after
/// `recovery_timeout` a single probe is admitted, and only its success
/// closes the breaker.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &str, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Default provider breaker: 5 failures, 60 s recovery.
    pub fn for_provider(name: &str) -> Self {
        Self::new(name, 5, Duration::from_secs(60))
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("lock poisoned").state
    }

    /// Admission check. In the open state no call reaches the provider
    /// until the recovery timeout has elapsed; then exactly one probe goes
    /// through.
    fn admit(&self) -> LlmResult<()> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.recovery_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(breaker = %self.name, "breaker half-open, admitting probe");
                    Ok(())
                } else {
                    Err(LlmError::BreakerOpen)
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(LlmError::BreakerOpen)
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if inner.state == BreakerState::HalfOpen {
            info!(breaker = %self.name, "probe succeeded, breaker closed");
        }
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.probe_in_flight = false;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        inner.probe_in_flight = false;

        if inner.state == BreakerState::HalfOpen || inner.failure_count >= self.failure_threshold {
            if inner.state != BreakerState::Open {
                warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    "breaker opened"
                );
            }
            inner.state = BreakerState::Open;
        }
    }

    /// Run `op` under the breaker.
    pub async fn call<T, F, Fut>(&self, op: F) -> LlmResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LlmResult<T>>,
    {
        self.admit()?;
        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fail(breaker: &CircuitBreaker) -> LlmResult<()> {
        breaker
            .call(|| async { Err(LlmError::ApiError("boom".into())) })
            .await
    }

    #[tokio::test]
    async fn opens_after_threshold_and_rejects() {
        let breaker = CircuitBreaker::new("llm", 3, Duration::from_secs(60));

        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        // Rejected without touching the provider.
        let result = breaker.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(LlmError::BreakerOpen)));
    }

    #[tokio::test]
    async fn half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::new("llm", 1, Duration::from_millis(5));
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = breaker.call(|| async { Ok("pong") }).await;
        assert_eq!(result.unwrap(), "pong");
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("llm", 1, Duration::from_millis(5));
        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new("llm", 3, Duration::from_secs(60));
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        breaker.call(|| async { Ok(()) }).await.unwrap();

        // Two more failures do not reach the threshold after the reset.
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
