//! Circuit breaker over failure rate and slow-call rate.
//!
//! The breaker keeps a count-based sliding window of recent call outcomes.
//! Once the window is full, it opens when at least half the calls failed or
//! at least half were slower than the slow-call threshold. While open, calls
//! fail immediately; after the open-state duration it admits a fixed number
//! of trial calls, closing again only when the trials stay clean.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::store::config::CircuitBreakerConfig;
use crate::store::StoreError;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, calls pass through
    Closed,
    /// Circuit is open, calls fail fast
    Open,
    /// Circuit is half-open, trial calls probe the store
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    success: bool,
    slow: bool,
}

struct BreakerInner {
    state: CircuitState,
    window: VecDeque<Outcome>,
    opened_at: Option<Instant>,
    trials_admitted: usize,
    trials_succeeded: usize,
}

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub window_len: usize,
    pub failure_rate: f64,
    pub slow_call_rate: f64,
}

/// Circuit breaker implementation
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    window_size: usize,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create new circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        // The rate is meaningless on fewer than 10 observations.
        let window_size = config.window_size.max(10);
        Self {
            config,
            window_size,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(window_size),
                opened_at: None,
                trials_admitted: 0,
                trials_succeeded: 0,
            }),
        }
    }

    /// Admit or reject a call.
    pub fn try_acquire(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.open_duration {
                    self.transition_to_half_open(&mut inner);
                    inner.trials_admitted = 1;
                    Ok(())
                } else {
                    Err(StoreError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if inner.trials_admitted < self.config.half_open_calls.max(1) {
                    inner.trials_admitted += 1;
                    Ok(())
                } else {
                    Err(StoreError::CircuitOpen)
                }
            }
        }
    }

    /// Record a finished call.
    pub fn record(&self, success: bool, duration: Duration) {
        let slow = duration > self.config.slow_call_threshold;
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                if inner.window.len() == self.window_size {
                    inner.window.pop_front();
                }
                inner.window.push_back(Outcome { success, slow });
                if inner.window.len() >= self.window_size && self.rates_exceeded(&inner.window) {
                    self.transition_to_open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                if !success || slow {
                    self.transition_to_open(&mut inner);
                } else {
                    inner.trials_succeeded += 1;
                    if inner.trials_succeeded >= self.config.half_open_calls.max(1) {
                        self.transition_to_closed(&mut inner);
                    }
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Get current state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Get statistics
    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        let len = inner.window.len();
        let (failures, slow) = inner.window.iter().fold((0usize, 0usize), |(f, s), o| {
            (f + usize::from(!o.success), s + usize::from(o.slow))
        });
        BreakerStats {
            state: inner.state,
            window_len: len,
            failure_rate: if len == 0 { 0.0 } else { failures as f64 / len as f64 },
            slow_call_rate: if len == 0 { 0.0 } else { slow as f64 / len as f64 },
        }
    }

    fn rates_exceeded(&self, window: &VecDeque<Outcome>) -> bool {
        let len = window.len() as f64;
        let failures = window.iter().filter(|o| !o.success).count() as f64;
        let slow = window.iter().filter(|o| o.slow).count() as f64;
        failures / len >= self.config.failure_rate_threshold
            || slow / len >= self.config.slow_call_rate_threshold
    }

    fn transition_to_closed(&self, inner: &mut BreakerInner) {
        tracing::info!("Circuit breaker transitioning to CLOSED");
        inner.state = CircuitState::Closed;
        inner.window.clear();
        inner.opened_at = None;
        inner.trials_admitted = 0;
        inner.trials_succeeded = 0;
    }

    fn transition_to_open(&self, inner: &mut BreakerInner) {
        tracing::warn!("Circuit breaker transitioning to OPEN");
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trials_admitted = 0;
        inner.trials_succeeded = 0;
    }

    fn transition_to_half_open(&self, inner: &mut BreakerInner) {
        tracing::info!("Circuit breaker transitioning to HALF-OPEN");
        inner.state = CircuitState::HalfOpen;
        inner.opened_at = None;
        inner.trials_admitted = 0;
        inner.trials_succeeded = 0;
    }
}
