//! Per-tool circuit breakers.
//!
//! closed → open after `failure_threshold` consecutive failures;
//! open → half-open once `timeout_secs` have elapsed since it opened;
//! half-open → closed after `success_threshold` successes, or back to open
//! on any failure. At most `half_open_max_calls` probes run at once while
//! half-open.
//!
//! Every transition starts a new generation. Outcomes are reported against
//! the [`Admission`] that let the call in, and an outcome from an earlier
//! generation is ignored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use toolwright_config::CircuitBreakerPolicy;
use toolwright_core::CircuitState;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_calls: u32,
}

/// Proof that a call was let through, tagged with the generation it was
/// admitted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Admission {
    generation: u64,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    opened_at: Option<Instant>,
    generation: u64,
}

impl BreakerState {
    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.success_count = 0;
        self.half_open_calls = 0;
        self.generation += 1;
        match to {
            CircuitState::Open => self.opened_at = Some(Instant::now()),
            CircuitState::Closed => {
                self.failure_count = 0;
                self.opened_at = None;
            }
            CircuitState::HalfOpen => {}
        }
    }
}

pub struct CircuitBreaker {
    name: String,
    policy: CircuitBreakerPolicy,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, policy: CircuitBreakerPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_calls: 0,
                opened_at: None,
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &CircuitBreakerPolicy {
        &self.policy
    }

    /// Ask to run one call. In half-open this reserves a probe slot, which
    /// must be released by `record_success`, `record_failure` or
    /// `release`.
    pub fn try_acquire(&self) -> Option<Admission> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                let timeout = Duration::from_secs(self.policy.timeout_secs);
                let cooled = inner
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= timeout);
                if !cooled {
                    return None;
                }
                tracing::info!(tool = %self.name, "Circuit half-open, probing");
                inner.transition(CircuitState::HalfOpen);
                inner.half_open_calls = 1;
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls >= self.policy.half_open_max_calls {
                    return None;
                }
                inner.half_open_calls += 1;
            }
        }
        Some(Admission {
            generation: inner.generation,
        })
    }

    /// Time until an open circuit will admit a probe.
    pub fn retry_after(&self) -> Duration {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(at)) => {
                Duration::from_secs(self.policy.timeout_secs).saturating_sub(at.elapsed())
            }
            _ => Duration::ZERO,
        }
    }

    pub fn record_success(&self, admission: Admission) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_stale(&inner, admission) {
            return;
        }
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
                inner.success_count += 1;
                if inner.success_count >= self.policy.success_threshold {
                    tracing::info!(tool = %self.name, "Circuit closed");
                    inner.transition(CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, admission: Admission) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if self.is_stale(&inner, admission) {
            return;
        }
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.policy.failure_threshold {
                    tracing::warn!(
                        tool = %self.name,
                        failures = inner.failure_count,
                        "Circuit opened"
                    );
                    inner.transition(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(tool = %self.name, "Probe failed, circuit re-opened");
                inner.transition(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Give back an admission without reporting an outcome, freeing its
    /// half-open slot.
    pub fn release(&self, admission: Admission) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !self.is_stale(&inner, admission) && inner.state == CircuitState::HalfOpen {
            inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.transition(CircuitState::Closed);
    }

    fn is_stale(&self, inner: &BreakerState, admission: Admission) -> bool {
        let stale = admission.generation != inner.generation;
        if stale {
            tracing::debug!(
                tool = %self.name,
                state = ?inner.state,
                "Ignoring outcome of a call admitted before the last transition"
            );
        }
        stale
    }

    /// Current state. An open circuit whose timeout has elapsed still reports
    /// `Open` until the next call probes it.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            half_open_calls: inner.half_open_calls,
        }
    }
}

/// Lazily-created breakers keyed by tool name.
#[derive(Default)]
pub struct CircuitBreakers {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, tool_name: &str, policy: CircuitBreakerPolicy) -> Arc<CircuitBreaker> {
        self.breakers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(tool_name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(tool_name, policy)))
            .clone()
    }

    pub fn get(&self, tool_name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(tool_name)
            .cloned()
    }

    pub fn remove(&self, tool_name: &str) {
        self.breakers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(tool_name);
    }
}
