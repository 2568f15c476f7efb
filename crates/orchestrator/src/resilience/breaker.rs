//! Per-worker circuit breaker: CLOSED / OPEN / HALF_OPEN.
//!
//! One instance per [`crate::task::Role`], admission checked once per
//! logical call before the retry loop starts — retries inside one logical
//! call share the admission decision rather than re-checking per attempt.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout: Duration::from_secs(60) }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Set while a HALF_OPEN probe call is outstanding, so a second
    /// concurrent call cannot also be admitted as a probe.
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    role: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(role: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            role: role.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Admit or reject a logical call. On `Ok(())` the caller must report
    /// the outcome back via [`Self::on_success`] / [`Self::on_failure`].
    pub fn try_acquire(&self) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.recovery_timeout && !inner.probe_in_flight {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(role = %self.role, "circuit breaker half-open, admitting probe call");
                    Ok(())
                } else {
                    Err(OrchestratorError::OpenCircuit { role: self.role.clone() })
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(OrchestratorError::OpenCircuit { role: self.role.clone() })
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                info!(role = %self.role, "circuit breaker closing after successful probe");
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.probe_in_flight = false;
            }
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                warn!(role = %self.role, "circuit breaker reopening after failed probe");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(role = %self.role, failures = inner.consecutive_failures, "circuit breaker opening");
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_consecutive_failure_threshold() {
        let breaker = CircuitBreaker::new("developer", BreakerConfig { failure_threshold: 3, ..Default::default() });
        for _ in 0..3 {
            breaker.try_acquire().unwrap();
            breaker.on_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn success_resets_consecutive_failures_in_closed() {
        let breaker = CircuitBreaker::new("developer", BreakerConfig { failure_threshold: 3, ..Default::default() });
        breaker.try_acquire().unwrap();
        breaker.on_failure();
        breaker.try_acquire().unwrap();
        breaker.on_success();
        breaker.try_acquire().unwrap();
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_probe_closes_on_success() {
        let breaker = CircuitBreaker::new(
            "developer",
            BreakerConfig { failure_threshold: 1, recovery_timeout: Duration::from_millis(0) },
        );
        breaker.try_acquire().unwrap();
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        breaker.try_acquire().unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.on_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_probe_reopens_on_failure() {
        let breaker = CircuitBreaker::new(
            "developer",
            BreakerConfig { failure_threshold: 1, recovery_timeout: Duration::from_millis(0) },
        );
        breaker.try_acquire().unwrap();
        breaker.on_failure();
        breaker.try_acquire().unwrap();
        breaker.on_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn only_one_probe_admitted_while_open_past_timeout() {
        let breaker = CircuitBreaker::new(
            "developer",
            BreakerConfig { failure_threshold: 1, recovery_timeout: Duration::from_millis(0) },
        );
        breaker.try_acquire().unwrap();
        breaker.on_failure();

        breaker.try_acquire().unwrap();
        assert!(breaker.try_acquire().is_err());
    }
}
