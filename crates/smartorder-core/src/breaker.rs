//! Circuit breaker for outbound services.
//!
//! Closed lets every call through. After `failure_threshold` consecutive
//! failures the circuit opens and calls fail fast until `recovery_timeout`
//! has passed. The first call after that runs half-open: success closes the
//! circuit, failure opens it again.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl BreakerConfig {
    pub fn language_model() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }

    pub fn invoicing() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Error)]
pub enum CircuitError<E> {
    #[error("circuit '{name}' is open, next attempt in {}s", .retry_in.as_secs())]
    Open { name: String, retry_in: Duration },
    #[error(transparent)]
    Failed(E),
}

#[derive(Debug)]
struct BreakerState {
    circuit: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: BreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                ..config
            },
            state: Mutex::new(BreakerState {
                circuit: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().circuit
    }

    /// Runs `op` unless the circuit is open. Every error returned by `op`
    /// counts as a failure.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Err(retry_in) = self.admit() {
            return Err(CircuitError::Open {
                name: self.name.clone(),
                retry_in,
            });
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(CircuitError::Failed(err))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `Err` carries the time left until the circuit may be retried.
    fn admit(&self) -> Result<(), Duration> {
        let mut state = self.lock();
        if state.circuit != CircuitState::Open {
            return Ok(());
        }

        let elapsed = state.opened_at.map(|at| at.elapsed()).unwrap_or(self.config.recovery_timeout);
        if elapsed < self.config.recovery_timeout {
            return Err(self.config.recovery_timeout - elapsed);
        }
        state.circuit = CircuitState::HalfOpen;
        info!(circuit = %self.name, "circuit half-open, trying a request");
        Ok(())
    }

    fn record_success(&self) {
        let mut state = self.lock();
        if state.circuit != CircuitState::Closed {
            info!(circuit = %self.name, "circuit closed, service recovered");
        }
        state.circuit = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_failures += 1;
        let trips = match state.circuit {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => state.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trips {
            state.circuit = CircuitState::Open;
            state.opened_at = Some(Instant::now());
            warn!(
                circuit = %self.name,
                failures = state.consecutive_failures,
                recovery_secs = self.config.recovery_timeout.as_secs(),
                "circuit opened"
            );
        }
    }
}
