//! Per-model circuit breaker.
//!
//! Tracks consecutive failures per model ID. After `max_failures` in a row
//! the circuit opens and callers fail fast for `cooldown`; the first read
//! after the cooldown half-opens the circuit and permits exactly one probe.
//! A successful probe closes the circuit (the record is deleted), a failed
//! probe re-opens it with a fresh cooldown.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_MAX_FAILURES: u32 = 3;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(60_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Counting failures; requests pass through.
    Closed,
    /// Rejecting requests until the cooldown elapses.
    Open { since: Instant },
    /// One probe is in flight; further requests are rejected until the
    /// probe's outcome is recorded.
    HalfOpen,
}

#[derive(Debug)]
struct CircuitRecord {
    state: State,
    consecutive_failures: u32,
}

/// Per-model failure accumulator with open/half-open/closed states.
#[derive(Debug)]
pub struct CircuitBreaker {
    max_failures: u32,
    cooldown: Duration,
    records: RwLock<HashMap<String, CircuitRecord>>,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, cooldown: Duration) -> Self {
        Self {
            max_failures: max_failures.max(1),
            cooldown,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Whether calls to `model` should be rejected right now.
    ///
    /// This is the read with the cooldown side effect: an open circuit whose
    /// cooldown has elapsed transitions to half-open and permits the
    /// caller's attempt (returns `false`); while half-open, subsequent reads
    /// reject until the probe's outcome is recorded.
    pub fn is_open(&self, model: &str) -> bool {
        let mut records = self.records.write().unwrap();
        let Some(record) = records.get_mut(model) else {
            return false;
        };
        match record.state {
            State::Closed => false,
            State::HalfOpen => true,
            State::Open { since } => {
                if since.elapsed() >= self.cooldown {
                    record.state = State::HalfOpen;
                    tracing::info!(model, "circuit cooldown elapsed, permitting one probe");
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Cooldown remaining for an open circuit, `None` when requests are
    /// currently permitted.
    pub fn cooldown_remaining(&self, model: &str) -> Option<Duration> {
        let records = self.records.read().unwrap();
        match records.get(model)?.state {
            State::Open { since } => self.cooldown.checked_sub(since.elapsed()),
            State::HalfOpen => Some(Duration::ZERO),
            State::Closed => None,
        }
    }

    /// Record a success: the circuit closes and the record is deleted.
    pub fn record_success(&self, model: &str) {
        let mut records = self.records.write().unwrap();
        if records.remove(model).is_some() {
            tracing::info!(model, "circuit closed after successful call");
        }
    }

    /// Record a failure: increments the counter, opening the circuit at the
    /// threshold. A half-open probe failure re-opens immediately.
    pub fn record_failure(&self, model: &str) {
        let mut records = self.records.write().unwrap();
        let record = records.entry(model.to_string()).or_insert(CircuitRecord {
            state: State::Closed,
            consecutive_failures: 0,
        });
        record.consecutive_failures += 1;

        let should_open = matches!(record.state, State::HalfOpen)
            || record.consecutive_failures >= self.max_failures;
        if should_open {
            record.state = State::Open {
                since: Instant::now(),
            };
            tracing::warn!(
                model,
                failures = record.consecutive_failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "circuit opened"
            );
        }
    }

    /// Model IDs whose circuit is open and still within cooldown.
    pub fn open_models(&self) -> Vec<String> {
        let records = self.records.read().unwrap();
        records
            .iter()
            .filter(|(_, r)| match r.state {
                State::Open { since } => since.elapsed() < self.cooldown,
                State::HalfOpen => false,
                State::Closed => false,
            })
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FAILURES, DEFAULT_COOLDOWN)
    }
}
