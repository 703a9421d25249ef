// ⚙️ Gate Movement Engine - the only producer of ledger events
//
// Per animal the engine runs a two-state machine:
//
//   Outside ──scan(pen)──▶ Inside(pen)
//   Inside(_) ──scan(any pen)──▶ Outside
//
// An exit is recorded against whichever pen reported the scan, even if the
// animal entered a different one: a gate reader only knows "this tag was
// seen here".
//
// Scan flow: resolve ids → take the animal's lock slot → read tail → decide
// direction and timestamp → compare-and-append. A conflicting append (another
// process wrote the same animal meanwhile) is retried once on a fresh read.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::{Clock, ClockSkewPolicy, SystemClock, MAX_CLOCK_EPSILON_MICROS};
use crate::error::{GateError, GateResult};
use crate::ledger::{AnimalLocks, AppendError, Ledger};
use crate::movement::{Direction, MovementEvent};
use crate::resolver::IdentityResolver;

/// What the caller gets back for a successful scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReceipt {
    pub event_id: String,
    pub animal_id: String,
    pub pen_id: String,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    /// "Entry recorded" / "Exit recorded"
    pub message: String,
}

impl From<&MovementEvent> for ScanReceipt {
    fn from(event: &MovementEvent) -> Self {
        ScanReceipt {
            event_id: event.id.clone(),
            animal_id: event.animal_id.clone(),
            pen_id: event.pen_id.clone(),
            direction: event.direction,
            timestamp: event.timestamp,
            message: format!("{} recorded", event.direction),
        }
    }
}

pub struct GateEngine {
    resolver: IdentityResolver,
    ledger: Arc<dyn Ledger>,
    locks: AnimalLocks,
    clock: Arc<dyn Clock>,
    skew_policy: ClockSkewPolicy,
    epsilon: Duration,
}

impl GateEngine {
    pub fn new(resolver: IdentityResolver, ledger: Arc<dyn Ledger>) -> Self {
        GateEngine {
            resolver,
            ledger,
            locks: AnimalLocks::new(),
            clock: Arc::new(SystemClock),
            skew_policy: ClockSkewPolicy::Clamp,
            epsilon: Duration::microseconds(1),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_skew_policy(mut self, policy: ClockSkewPolicy, epsilon: Duration) -> Self {
        self.skew_policy = policy;
        // below storage precision a clamp would collapse onto `last`
        self.epsilon = epsilon.clamp(
            Duration::microseconds(1),
            Duration::microseconds(MAX_CLOCK_EPSILON_MICROS),
        );
        self
    }

    /// Inbound scan: a pen's gate reader saw `raw_payload`.
    pub fn scan(&self, pen_id: &str, raw_payload: &str) -> GateResult<ScanReceipt> {
        let event = self.record_scan(raw_payload, pen_id)?;
        Ok(ScanReceipt::from(&event))
    }

    /// Append the next movement for `animal_id` at `pen_id` and return it.
    pub fn record_scan(&self, animal_id: &str, pen_id: &str) -> GateResult<MovementEvent> {
        let animal_id = self.resolver.resolve(animal_id).map_err(|e| {
            warn!(pen_id, error = %e, "scan rejected");
            e
        })?;
        let pen_id = self.resolver.resolve_pen(pen_id).map_err(|e| {
            warn!(animal_id = %animal_id, error = %e, "scan rejected");
            e
        })?;

        let slot = self.locks.slot(&animal_id);
        let _held = slot.lock();

        let mut retried = false;
        loop {
            let last = self.ledger.last_event(&animal_id)?;
            let event = MovementEvent::new(
                &animal_id,
                &pen_id,
                Direction::following(last.as_ref()),
                self.stamp(&animal_id, last.as_ref())?,
                last.as_ref().map_or(1, |e| e.sequence + 1),
            );

            match self.ledger.append(&event, last.as_ref().map(|e| e.id.as_str())) {
                Ok(()) => {
                    info!(
                        event_id = %event.id,
                        animal_id = %event.animal_id,
                        pen_id = %event.pen_id,
                        direction = %event.direction,
                        timestamp = %event.timestamp,
                        "scan recorded"
                    );
                    return Ok(event);
                }
                Err(AppendError::Conflict { expected, found, .. }) if !retried => {
                    warn!(
                        animal_id = %animal_id,
                        ?expected,
                        ?found,
                        "ledger tail moved during scan, retrying once"
                    );
                    retried = true;
                }
                Err(AppendError::Conflict { .. }) => {
                    warn!(animal_id = %animal_id, "second append conflict, giving up");
                    return Err(GateError::ConcurrentScanConflict(animal_id));
                }
                Err(AppendError::Failed(e)) => return Err(e),
            }
        }
    }

    /// Ingestion timestamp, never earlier than the animal's last event.
    fn stamp(&self, animal_id: &str, last: Option<&MovementEvent>) -> GateResult<DateTime<Utc>> {
        let now = self.clock.now().trunc_subsecs(6);

        let last = match last {
            Some(last) if now <= last.timestamp => last,
            _ => return Ok(now),
        };

        if now < last.timestamp && self.skew_policy == ClockSkewPolicy::Reject {
            warn!(animal_id, %now, last = %last.timestamp, "clock skew, scan rejected");
            return Err(GateError::ClockSkew {
                animal_id: animal_id.to_string(),
                now,
                last: last.timestamp,
            });
        }

        let clamped = last
            .timestamp
            .checked_add_signed(self.epsilon)
            .ok_or_else(|| GateError::ClockSkew {
                animal_id: animal_id.to_string(),
                now,
                last: last.timestamp,
            })?;
        if now < last.timestamp {
            warn!(animal_id, %now, %clamped, "clock behind last event, timestamp clamped");
        }
        Ok(clamped)
    }
}

// ============================================================================
// TESTS
// ============================================================================
