// ⚠️ Error Taxonomy - every failure a scan or an admin edit can surface
//
// Scans fail with UnknownAnimal / UnknownPen (never retried) or
// ConcurrentScanConflict (retried once by the engine, then surfaced).
// Admin edits fail with AlternationViolation and leave the ledger unchanged.

use crate::movement::Direction;
use thiserror::Error;

/// Errors returned by the resolver, ledger, engine and query service.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("Unknown animal: {0:?}")]
    UnknownAnimal(String),

    #[error("Unknown pen: {0:?}")]
    UnknownPen(String),

    #[error("Unknown vaccine: {0:?}")]
    UnknownVaccine(String),

    #[error("Unknown movement event: {0}")]
    UnknownEvent(String),

    #[error("Concurrent scan conflict for animal {0}")]
    ConcurrentScanConflict(String),

    #[error("Alternation violation for animal {animal_id}: {reason}")]
    AlternationViolation { animal_id: String, reason: String },

    /// Only raised under `ClockSkewPolicy::Reject`; the default policy clamps.
    #[error("Clock skew for animal {animal_id}: {now} precedes last event at {last}")]
    ClockSkew {
        animal_id: String,
        now: chrono::DateTime<chrono::Utc>,
        last: chrono::DateTime<chrono::Utc>,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GateError {
    pub(crate) fn alternation(animal_id: &str, reason: impl Into<String>) -> Self {
        GateError::AlternationViolation {
            animal_id: animal_id.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn repeated(animal_id: &str, direction: Direction) -> Self {
        Self::alternation(
            animal_id,
            format!("two consecutive {} events", direction.as_str()),
        )
    }

    /// An animal's history must start from Outside with an Entry.
    pub(crate) fn opens_with(animal_id: &str, direction: Direction) -> Self {
        Self::alternation(
            animal_id,
            format!("history cannot open with an {} event", direction.as_str()),
        )
    }

    /// Errors the caller caused (bad ids, invariant breaks) as opposed to
    /// infrastructure failures.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            GateError::Storage(_) | GateError::Serialization(_)
        )
    }
}

pub type GateResult<T> = Result<T, GateError>;
