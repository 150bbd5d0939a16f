//! Circuit breaker around durable store writes.
//!
//! Protects the event store from being hammered during an outage and gives the receiver a fast, predictable failure
//! to fall back on. Closed passes calls through and counts consecutive failures; at the error threshold the breaker
//! opens and rejects calls without attempting them; after the reset timeout a single trial call is let through
//! (half-open). The trial closing the breaker on success, or re-opening it immediately on failure.

use std::{future::Future, time::Duration};

use log::{info, warn};
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};

pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker is open. The wrapped operation was not attempted.
    #[error("The circuit breaker is open; the call was not attempted")]
    Open,
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    error_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_THRESHOLD, DEFAULT_RESET_TIMEOUT)
    }
}

impl CircuitBreaker {
    pub fn new(error_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            error_threshold,
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Runs the operation under breaker protection. Fails fast with [`BreakerError::Open`] when the breaker is
    /// rejecting calls.
    pub async fn execute<T, E, F>(&self, op: F) -> Result<T, BreakerError<E>>
    where F: Future<Output = Result<T, E>> {
        self.try_acquire().await.map_err(|_| BreakerError::Open)?;
        match op.await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            },
            Err(e) => {
                self.record_failure().await;
                Err(BreakerError::Inner(e))
            },
        }
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }

    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.state == BreakerState::Open
    }

    async fn try_acquire(&self) -> Result<(), ()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner.last_failure.map(|t| t.elapsed()).unwrap_or(self.reset_timeout);
                if elapsed >= self.reset_timeout {
                    info!("🔌️ Circuit breaker reset timeout has elapsed. Allowing a trial call.");
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(())
                } else {
                    Err(())
                }
            },
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(())
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            },
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != BreakerState::Closed {
            info!("🔌️ Circuit breaker closing after a successful call");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::HalfOpen => {
                warn!("🔌️ Trial call failed. Circuit breaker is re-opening.");
                inner.state = BreakerState::Open;
            },
            BreakerState::Closed if inner.consecutive_failures >= self.error_threshold => {
                warn!("🔌️ Circuit breaker opening after {} consecutive failures", inner.consecutive_failures);
                inner.state = BreakerState::Open;
            },
            _ => {},
        }
        inner.trial_in_flight = false;
    }
}
