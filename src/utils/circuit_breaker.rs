use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Sits in front of the payment gateway. After repeated failures the circuit
// opens and calls fail fast instead of tying up request handlers on a dead
// upstream.
//
// States:
// - Closed: calls pass through
// - Open: calls rejected until `open_for` has elapsed
// - HalfOpen: probing; enough successes close it, one failure reopens it
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing
    pub open_for: Duration,
    /// Probe successes needed to close again
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_for: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    opened_at: Option<Instant>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    inner: Arc<Mutex<BreakerState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            })),
            config,
        }
    }

    /// Run `operation` unless the circuit is open. Only errors for which
    /// `counts` returns true are held against the upstream: a 4xx from the
    /// gateway is the caller's fault, not a sign the gateway is down.
    pub async fn call_filtered<F, T, E, P>(
        &self,
        operation: F,
        counts: P,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        self.admit().await?;

        match operation.await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(err) => {
                if counts(&err) {
                    self.on_failure().await;
                } else {
                    self.on_success().await;
                }
                Err(CircuitBreakerError::OperationFailed(err))
            }
        }
    }

    async fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut inner = self.inner.lock().await;

        if inner.state == CircuitState::Open {
            let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
            if elapsed < self.config.open_for {
                return Err(CircuitBreakerError::CircuitOpen);
            }
            tracing::info!(breaker = self.name, "Circuit breaker half-open, probing");
            inner.state = CircuitState::HalfOpen;
            inner.successes = 0;
        }

        Ok(())
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    tracing::info!(breaker = self.name, "Circuit breaker closed");
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Closed => inner.failures = 0,
            CircuitState::Open => {}
        }
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.failures += 1;

        let reopen = match inner.state {
            CircuitState::Closed => inner.failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if reopen {
            tracing::warn!(
                breaker = self.name,
                failures = inner.failures,
                "Circuit breaker opened"
            );
            inner.state = CircuitState::Open;
            inner.successes = 0;
            inner.opened_at = Some(Instant::now());
        }
    }

    /// Current state, as last settled by a call. An open circuit whose
    /// `open_for` has elapsed still reads `Open` until the next call is let through.
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(open_for: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            open_for,
            success_threshold: 1,
        }
    }

    fn always(_: &&str) -> bool {
        true
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_fails_fast() {
        let breaker = CircuitBreaker::new("gateway", config(Duration::from_secs(60)));

        for _ in 0..3 {
            let result = breaker
                .call_filtered(async { Err::<(), _>("connection reset") }, always)
                .await;
            assert!(matches!(result, Err(CircuitBreakerError::OperationFailed(_))));
        }
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert_eq!(breaker.state().await.as_str(), "open");

        let result = breaker.call_filtered(async { Ok::<_, &str>(()) }, always).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen)));
    }

    #[tokio::test]
    async fn test_half_open_success_closes_circuit() {
        let breaker = CircuitBreaker::new("gateway", config(Duration::from_millis(50)));

        for _ in 0..3 {
            let _ = breaker
                .call_filtered(async { Err::<(), _>("timeout") }, always)
                .await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(breaker
            .call_filtered(async { Ok::<_, &str>(()) }, always)
            .await
            .is_ok());
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.state().await.as_str(), "closed");
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_circuit() {
        let breaker = CircuitBreaker::new("gateway", config(Duration::from_millis(50)));

        for _ in 0..3 {
            let _ = breaker
                .call_filtered(async { Err::<(), _>("timeout") }, always)
                .await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;

        let _ = breaker
            .call_filtered(async { Err::<(), _>("timeout") }, always)
            .await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_filtered_errors_do_not_trip() {
        let breaker = CircuitBreaker::new("gateway", config(Duration::from_secs(60)));

        for _ in 0..5 {
            let _ = breaker
                .call_filtered(async { Err::<(), _>(400u16) }, |status| *status >= 500)
                .await;
        }
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
