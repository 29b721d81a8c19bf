//! # Circuit Breaker Module
//!
//! This module implements the circuit breaker pattern for remote store calls.
//! When the store fails repeatedly, calls fail fast instead of piling up
//! against an unreachable database.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RecoveryConfig;

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    last_failure_time: Option<Instant>,
}

/// Circuit breaker guarding the remote store
///
/// # State Machine
///
/// - **Closed**: Normal operation, requests pass through
/// - **Open**: Failure threshold exceeded, requests fail fast
/// - **Half-Open**: Reset timeout elapsed, the next request is let through
///
/// Uses `RecoveryConfig::circuit_breaker_threshold` and
/// `RecoveryConfig::circuit_breaker_reset_secs`.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    config: RecoveryConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    ///
    /// # Examples
    ///
    /// ```rust
    /// use flowercost::circuit_breaker::CircuitBreaker;
    /// use flowercost::config::RecoveryConfig;
    ///
    /// let breaker = CircuitBreaker::new(RecoveryConfig::default());
    /// assert!(!breaker.is_open());
    /// ```
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
            config,
        }
    }

    /// Check if the circuit is open (blocking requests)
    ///
    /// Resets to closed once the reset timeout has elapsed since the last
    /// failure.
    pub fn is_open(&self) -> bool {
        let mut state = self.lock();

        if state.failure_count >= self.config.circuit_breaker_threshold {
            if let Some(last_time) = state.last_failure_time {
                let reset_after = Duration::from_secs(self.config.circuit_breaker_reset_secs);
                if last_time.elapsed() < reset_after {
                    return true;
                }
                *state = BreakerState::default();
            }
        }
        false
    }

    /// Record a failed remote call
    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());
    }

    /// Record a successful remote call, closing the circuit
    pub fn record_success(&self) {
        *self.lock() = BreakerState::default();
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        // A poisoned counter is still a valid counter
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(RecoveryConfig {
            circuit_breaker_threshold: threshold,
            circuit_breaker_reset_secs: reset_secs,
            ..Default::default()
        })
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = breaker(2, 60);
        assert!(!breaker.is_open());

        breaker.record_failure();
        assert!(!breaker.is_open());

        breaker.record_failure();
        assert!(breaker.is_open());
        assert_eq!(breaker.failure_count(), 2);
    }

    #[test]
    fn test_success_closes_circuit() {
        let breaker = breaker(1, 60);
        breaker.record_failure();
        assert!(breaker.is_open());

        breaker.record_success();
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_resets_after_timeout() {
        let breaker = breaker(1, 0);
        breaker.record_failure();
        // Zero reset window: the next check lets traffic through again
        assert!(!breaker.is_open());
        assert_eq!(breaker.failure_count(), 0);
    }
}
