//! Circuit breaker shared by every recovery that selects it.
//!
//! State survives across contexts. CLOSED counts failures until the
//! threshold trips it OPEN; OPEN short-circuits until the reset timeout has
//! elapsed, then admits one probe batch in HALF_OPEN.

use async_trait::async_trait;
use ironloop_config::{CircuitBreakerConfig, StrategySettings};
use ironloop_core::{Operation, RecoveryError, StrategyKind};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::RecoveryStrategy;
use crate::context::{RecoveryContext, StrategyOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_probe_count: u32,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    /// Successful probes in the current HALF_OPEN batch
    half_open_probe_count: u32,
    /// Probes admitted in the current HALF_OPEN batch
    probes_admitted: u32,
    /// Context ids admitted but not yet recorded
    in_flight: HashSet<String>,
}

pub struct CircuitBreakerStrategy {
    settings: StrategySettings,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_requests: u32,
    state: Mutex<BreakerState>,
}

impl CircuitBreakerStrategy {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            settings: config.settings(),
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: Duration::from_millis(config.reset_timeout_ms),
            half_open_requests: config.half_open_requests.max(1),
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                half_open_probe_count: 0,
                probes_admitted: 0,
                in_flight: HashSet::new(),
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let s = self.state.lock();
        CircuitSnapshot {
            state: s.state,
            failure_count: s.failure_count,
            half_open_probe_count: s.half_open_probe_count,
        }
    }

    /// Decide whether a call may pass. `Err` carries the short-circuit reason.
    fn admit(&self, id: &str) -> Result<(), String> {
        let mut s = self.state.lock();

        if s.state == CircuitState::Open {
            let cooled = s
                .last_failure
                .is_none_or(|at| at.elapsed() >= self.reset_timeout);
            if !cooled {
                return Err("Circuit is OPEN".into());
            }
            info!("Circuit breaker entering HALF_OPEN");
            s.state = CircuitState::HalfOpen;
            s.half_open_probe_count = 0;
            s.probes_admitted = 0;
        }

        if s.state == CircuitState::HalfOpen {
            if s.probes_admitted >= self.half_open_requests {
                return Err("Circuit is HALF_OPEN and its probe batch is taken".into());
            }
            s.probes_admitted += 1;
        }

        s.in_flight.insert(id.to_string());
        Ok(())
    }

    fn count_failure(&self, s: &mut BreakerState) {
        s.failure_count += 1;
        if s.failure_count >= self.failure_threshold {
            warn!(failures = s.failure_count, "Circuit breaker tripped OPEN");
            s.state = CircuitState::Open;
            s.last_failure = Some(Instant::now());
        }
    }

    fn record(&self, id: &str, success: bool) {
        let mut s = self.state.lock();
        s.in_flight.remove(id);

        match (s.state, success) {
            (CircuitState::Closed, true) => s.failure_count = 0,
            (CircuitState::Closed, false) => self.count_failure(&mut s),
            (CircuitState::HalfOpen, true) => {
                s.half_open_probe_count += 1;
                if s.half_open_probe_count >= self.half_open_requests {
                    info!("Circuit breaker closed after successful probes");
                    s.state = CircuitState::Closed;
                    s.failure_count = 0;
                    s.half_open_probe_count = 0;
                    s.probes_admitted = 0;
                }
            }
            (CircuitState::HalfOpen, false) => {
                warn!("Probe failed, circuit breaker back to OPEN");
                s.state = CircuitState::Open;
                s.last_failure = Some(Instant::now());
                s.half_open_probe_count = 0;
                s.probes_admitted = 0;
            }
            // A concurrent probe already reopened the circuit.
            (CircuitState::Open, false) => s.last_failure = Some(Instant::now()),
            (CircuitState::Open, true) => {}
        }
    }
}

#[async_trait]
impl RecoveryStrategy for CircuitBreakerStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CircuitBreaker
    }

    fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    async fn execute(&self, context: &mut RecoveryContext) -> Result<StrategyOutcome, RecoveryError> {
        let handler = context.handler()?;

        if let Err(reason) = self.admit(&context.id) {
            debug!(recovery_id = %context.id, %reason, "Circuit breaker short-circuited");
            return Ok(StrategyOutcome::failed(reason).with_meta("circuit_state", self.state().to_string()));
        }

        context.begin_attempt();
        let result = handler.handle(&Operation::Recover).await;
        let success = matches!(&result, Ok(outcome) if outcome.success);
        self.record(&context.id, success);

        let state = self.state().to_string();
        match result {
            Ok(_) if success => Ok(StrategyOutcome::succeeded().with_meta("circuit_state", state)),
            Ok(_) => Ok(StrategyOutcome::failed("recover operation failed").with_meta("circuit_state", state)),
            Err(e) => Err(e),
        }
    }

    /// A call cut short after admission never recorded an outcome.
    /// In HALF_OPEN it gives its probe slot back; in CLOSED it counts as a
    /// failure so slow recoveries can trip the breaker.
    async fn cleanup(&self, context: &RecoveryContext) {
        let mut s = self.state.lock();
        if !s.in_flight.remove(&context.id) {
            return;
        }
        match s.state {
            CircuitState::HalfOpen => {
                s.probes_admitted = s.probes_admitted.saturating_sub(1);
                debug!(recovery_id = %context.id, "Released abandoned probe slot");
            }
            CircuitState::Closed => {
                debug!(recovery_id = %context.id, "Abandoned call counted as failure");
                self.count_failure(&mut s);
            }
            CircuitState::Open => {}
        }
    }
}
