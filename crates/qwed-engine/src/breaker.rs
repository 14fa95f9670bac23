//! Per-engine circuit breaker.
//!
//! ```text
//! Closed ──(failure rate > threshold over the window)──▶ Open
//! Open ──(cool-down elapsed, next call)──▶ HalfOpen (one probe)
//! HalfOpen ──(probe succeeds)──▶ Closed
//! HalfOpen ──(probe fails)──▶ Open (cool-down restarts)
//! ```
//!
//! Callers pass `now` explicitly so transitions are testable without
//! sleeping.

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use tracing::{info, warn};

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open { opened_at: Instant },
    HalfOpen { probe_in_flight: bool },
}

impl BreakerState {
    pub fn name(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open { .. } => "open",
            BreakerState::HalfOpen { .. } => "half-open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The single trial call of a half-open breaker.
    Probe,
    Rejected,
}

impl Admission {
    pub fn is_permitted(self) -> bool {
        !matches!(self, Admission::Rejected)
    }
}

/// Point-in-time view for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub window_failure_rate: f64,
    pub window_len: usize,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    engine: String,
    config: BreakerConfig,
    state: BreakerState,
    /// Recent outcomes, oldest first; `true` is a failure.
    window: VecDeque<bool>,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    pub fn new(engine: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            engine: engine.into(),
            config,
            state: BreakerState::Closed,
            window: VecDeque::with_capacity(config.window),
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            window_failure_rate: self.failure_rate(),
            window_len: self.window.len(),
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|failed| **failed).count();
        failures as f64 / self.window.len() as f64
    }

    fn transition(&mut self, to: BreakerState) {
        let from = self.state;
        self.state = to;
        match to {
            BreakerState::Open { .. } => warn!(
                engine = %self.engine,
                %from,
                failure_rate = self.failure_rate(),
                consecutive_failures = self.consecutive_failures,
                "circuit breaker opened"
            ),
            _ => info!(engine = %self.engine, %from, %to, "circuit breaker transition"),
        }
    }

    /// Ask to make a call at `now`.
    pub fn try_acquire_at(&mut self, now: Instant) -> Admission {
        match self.state {
            BreakerState::Closed => Admission::Allowed,
            BreakerState::Open { opened_at } => {
                if now.saturating_duration_since(opened_at) >= self.config.cooldown() {
                    self.transition(BreakerState::HalfOpen {
                        probe_in_flight: true,
                    });
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            BreakerState::HalfOpen {
                probe_in_flight: true,
            } => Admission::Rejected,
            BreakerState::HalfOpen {
                probe_in_flight: false,
            } => {
                self.state = BreakerState::HalfOpen {
                    probe_in_flight: true,
                };
                Admission::Probe
            }
        }
    }

    pub fn try_acquire(&mut self) -> Admission {
        self.try_acquire_at(Instant::now())
    }

    pub fn record_success(&mut self, admission: Admission) {
        self.consecutive_failures = 0;
        match (self.state, admission) {
            (BreakerState::HalfOpen { .. }, Admission::Probe) => {
                self.window.clear();
                self.transition(BreakerState::Closed);
            }
            (BreakerState::Closed, Admission::Allowed) => self.push_outcome(false),
            // Late answers from calls admitted under an earlier state.
            _ => {}
        }
    }

    pub fn record_failure_at(&mut self, admission: Admission, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match (self.state, admission) {
            (BreakerState::HalfOpen { .. }, Admission::Probe) => {
                self.transition(BreakerState::Open { opened_at: now });
            }
            (BreakerState::Closed, Admission::Allowed) => {
                self.push_outcome(true);
                if self.should_trip() {
                    self.transition(BreakerState::Open { opened_at: now });
                }
            }
            _ => {}
        }
    }

    pub fn record_failure(&mut self, admission: Admission) {
        self.record_failure_at(admission, Instant::now());
    }

    /// A call that was cancelled before the engine answered. Neither a
    /// success nor a failure; a probe gives its slot back.
    pub fn release(&mut self, admission: Admission) {
        if admission == Admission::Probe
            && self.state
                == (BreakerState::HalfOpen {
                    probe_in_flight: true,
                })
        {
            self.state = BreakerState::HalfOpen {
                probe_in_flight: false,
            };
        }
    }

    fn push_outcome(&mut self, failed: bool) {
        if self.window.len() == self.config.window {
            self.window.pop_front();
        }
        self.window.push_back(failed);
    }

    fn should_trip(&self) -> bool {
        self.window.len() >= self.config.minimum_calls
            && self.failure_rate() > self.config.failure_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> BreakerConfig {
        BreakerConfig {
            window: 4,
            failure_threshold: 0.5,
            minimum_calls: 3,
            cooldown_ms: 1_000,
        }
    }

    fn fail(breaker: &mut CircuitBreaker, now: Instant) {
        let admission = breaker.try_acquire_at(now);
        assert!(admission.is_permitted());
        breaker.record_failure_at(admission, now);
    }

    fn succeed(breaker: &mut CircuitBreaker, now: Instant) {
        let admission = breaker.try_acquire_at(now);
        assert!(admission.is_permitted());
        breaker.record_success(admission);
    }

    #[test]
    fn opens_only_after_minimum_calls() {
        let t0 = Instant::now();
        let mut breaker = CircuitBreaker::new("e", config());
        fail(&mut breaker, t0);
        fail(&mut breaker, t0);
        assert_eq!(breaker.state(), BreakerState::Closed);
        fail(&mut breaker, t0);
        assert_eq!(breaker.state(), BreakerState::Open { opened_at: t0 });
        assert_eq!(breaker.try_acquire_at(t0), Admission::Rejected);
    }

    #[test]
    fn rate_at_threshold_does_not_trip() {
        let t0 = Instant::now();
        let mut breaker = CircuitBreaker::new("e", config());
        succeed(&mut breaker, t0);
        fail(&mut breaker, t0);
        succeed(&mut breaker, t0);
        fail(&mut breaker, t0);
        assert_eq!(breaker.snapshot().window_failure_rate, 0.5);
        assert_eq!(breaker.state(), BreakerState::Closed);
        // Window slides: [fail, succeed, fail, fail] = 0.75.
        fail(&mut breaker, t0);
        assert!(matches!(breaker.state(), BreakerState::Open { .. }));
    }

    #[test]
    fn exactly_one_probe_after_cooldown() {
        let t0 = Instant::now();
        let mut breaker = CircuitBreaker::new("e", config());
        for _ in 0..3 {
            fail(&mut breaker, t0);
        }
        let before = t0 + Duration::from_millis(999);
        assert_eq!(breaker.try_acquire_at(before), Admission::Rejected);

        let after = t0 + Duration::from_millis(1_000);
        assert_eq!(breaker.try_acquire_at(after), Admission::Probe);
        assert_eq!(breaker.try_acquire_at(after), Admission::Rejected);
        breaker.record_success(Admission::Probe);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.snapshot().window_len, 0);
        assert_eq!(breaker.try_acquire_at(after), Admission::Allowed);
    }

    #[test]
    fn failed_probe_restarts_cooldown() {
        let t0 = Instant::now();
        let mut breaker = CircuitBreaker::new("e", config());
        for _ in 0..3 {
            fail(&mut breaker, t0);
        }
        let t1 = t0 + Duration::from_secs(2);
        assert_eq!(breaker.try_acquire_at(t1), Admission::Probe);
        breaker.record_failure_at(Admission::Probe, t1);
        assert_eq!(breaker.state(), BreakerState::Open { opened_at: t1 });
        assert_eq!(
            breaker.try_acquire_at(t1 + Duration::from_millis(500)),
            Admission::Rejected
        );
        assert_eq!(
            breaker.try_acquire_at(t1 + Duration::from_secs(1)),
            Admission::Probe
        );
    }

    #[test]
    fn released_probe_can_be_retried() {
        let t0 = Instant::now();
        let mut breaker = CircuitBreaker::new("e", config());
        for _ in 0..3 {
            fail(&mut breaker, t0);
        }
        let t1 = t0 + Duration::from_secs(5);
        assert_eq!(breaker.try_acquire_at(t1), Admission::Probe);
        breaker.release(Admission::Probe);
        assert_eq!(
            breaker.state(),
            BreakerState::HalfOpen {
                probe_in_flight: false
            }
        );
        assert_eq!(breaker.try_acquire_at(t1), Admission::Probe);
    }

    #[test]
    fn late_outcomes_do_not_move_an_open_breaker() {
        let t0 = Instant::now();
        let mut breaker = CircuitBreaker::new("e", config());
        let straggler = breaker.try_acquire_at(t0);
        for _ in 0..3 {
            fail(&mut breaker, t0);
        }
        breaker.record_success(straggler);
        assert!(matches!(breaker.state(), BreakerState::Open { .. }));
    }
}
