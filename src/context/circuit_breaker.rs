//! Circuit breaker for remote relevance scoring

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,   // Normal operation
    Open,     // Failing, skip the scorer
    HalfOpen, // Letting a probe call through
}

#[derive(Debug)]
struct BreakerEntry {
    state: BreakerState,
    failure_count: usize,
    opened_at: Option<Instant>,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Trips after consecutive scorer failures so reductions stop paying the
/// timeout on every call; reopens for a probe after `reset_timeout`.
#[derive(Debug)]
pub struct CircuitBreaker {
    entry: Mutex<BreakerEntry>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            entry: Mutex::new(BreakerEntry {
                state: BreakerState::Closed,
                failure_count: 0,
                opened_at: None,
            }),
            config,
        }
    }

    /// Whether calls should currently be skipped
    pub fn is_open(&self) -> bool {
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        match entry.state {
            BreakerState::Closed | BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let elapsed = entry
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.config.reset_timeout);
                if elapsed {
                    entry.state = BreakerState::HalfOpen;
                    false
                } else {
                    true
                }
            }
        }
    }

    pub fn mark_success(&self) {
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        entry.state = BreakerState::Closed;
        entry.failure_count = 0;
        entry.opened_at = None;
    }

    pub fn mark_failure(&self) {
        let mut entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        entry.failure_count += 1;

        // A failed probe reopens immediately
        if entry.state == BreakerState::HalfOpen
            || entry.failure_count >= self.config.failure_threshold
        {
            entry.state = BreakerState::Open;
            entry.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> BreakerState {
        self.entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
