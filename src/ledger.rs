// 📒 Location Ledger - append-only movement history, source of truth for location
//
// Guarantees:
// 1. Appends are compare-and-append: the writer names the last event it saw,
//    and the append fails with a conflict if the animal's tail moved since.
// 2. Every write (append, correct, remove) is one SQLite transaction. The
//    cached animals.current_pen_id and the audit row commit with it or not
//    at all.
// 3. No committed state ever has two adjacent same-direction events for one
//    animal.

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

use crate::db::{get_events_for_entity, insert_event, Database, Event};
use crate::entities::animal::refresh_current_pen;
use crate::error::{GateError, GateResult};
use crate::movement::{
    find_alternation_break, format_timestamp, parse_timestamp, Direction, MovementEvent, TimeRange,
};

pub const AUDIT_ENTITY: &str = "movement_event";

// ============================================================================
// APPEND OUTCOME
// ============================================================================

/// Why an append did not commit.
#[derive(Debug)]
pub enum AppendError {
    /// The animal's tail is not the event the writer read. Nothing was written.
    Conflict {
        animal_id: String,
        expected: Option<String>,
        found: Option<String>,
    },
    Failed(GateError),
}

impl From<GateError> for AppendError {
    fn from(err: GateError) -> Self {
        AppendError::Failed(err)
    }
}

impl From<rusqlite::Error> for AppendError {
    fn from(err: rusqlite::Error) -> Self {
        AppendError::Failed(GateError::Storage(err))
    }
}

// ============================================================================
// LEDGER CONTRACT
// ============================================================================

pub trait Ledger: Send + Sync {
    /// Most recent event for the animal, or None if it was never scanned.
    fn last_event(&self, animal_id: &str) -> GateResult<Option<MovementEvent>>;

    /// Durably persist `event` if the animal's current last event id is
    /// still `expected_last`.
    fn append(&self, event: &MovementEvent, expected_last: Option<&str>) -> Result<(), AppendError>;

    /// The animal's events inside `range`, newest first.
    fn history(&self, animal_id: &str, range: TimeRange) -> GateResult<Vec<MovementEvent>>;

    /// Every animal's events inside `range`, newest first.
    fn events_in_range(&self, range: TimeRange) -> GateResult<Vec<MovementEvent>>;

    /// Latest event of every animal that has one.
    fn latest_events(&self) -> GateResult<Vec<MovementEvent>>;

    fn get_event(&self, event_id: &str) -> GateResult<Option<MovementEvent>>;

    /// Change an event's direction; rejected if alternation would break.
    fn correct(&self, event_id: &str, direction: Direction, actor: &str) -> GateResult<MovementEvent>;

    /// Delete an event; rejected if its neighbours would then share a direction.
    fn remove(&self, event_id: &str, actor: &str) -> GateResult<MovementEvent>;

    /// Audit rows for an event, newest first.
    fn audit_trail(&self, event_id: &str) -> GateResult<Vec<Event>>;
}

// ============================================================================
// ROW MAPPING + SHARED QUERIES
// ============================================================================

const EVENT_COLUMNS: &str = "event_id, animal_id, pen_id, direction, timestamp, sequence";

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<MovementEvent> {
    let direction: String = row.get(3)?;
    let timestamp: String = row.get(4)?;

    Ok(MovementEvent {
        id: row.get(0)?,
        animal_id: row.get(1)?,
        pen_id: row.get(2)?,
        direction: direction.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?,
        timestamp: parse_timestamp(&timestamp).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?,
        sequence: row.get(5)?,
    })
}

/// Last event for an animal on an already-held connection or transaction.
pub(crate) fn last_event_on(conn: &Connection, animal_id: &str) -> GateResult<Option<MovementEvent>> {
    let sql = format!(
        "SELECT {} FROM movement_events
         WHERE animal_id = ?1
         ORDER BY timestamp DESC, sequence DESC
         LIMIT 1",
        EVENT_COLUMNS
    );
    let event = conn.query_row(&sql, params![animal_id], event_from_row).optional()?;
    Ok(event)
}

fn get_event_on(conn: &Connection, event_id: &str) -> GateResult<Option<MovementEvent>> {
    let sql = format!("SELECT {} FROM movement_events WHERE event_id = ?1", EVENT_COLUMNS);
    let event = conn.query_row(&sql, params![event_id], event_from_row).optional()?;
    Ok(event)
}

/// Full history of one animal, oldest first.
fn timeline_on(conn: &Connection, animal_id: &str) -> GateResult<Vec<MovementEvent>> {
    let sql = format!(
        "SELECT {} FROM movement_events
         WHERE animal_id = ?1
         ORDER BY timestamp ASC, sequence ASC",
        EVENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let events = stmt
        .query_map(params![animal_id], event_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

// ============================================================================
// SQLITE LEDGER
// ============================================================================

#[derive(Clone)]
pub struct SqliteLedger {
    db: Database,
}

impl SqliteLedger {
    pub fn new(db: Database) -> Self {
        SqliteLedger { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Apply an edit to one animal's timeline, validate alternation on the
    /// result, and commit with an audit row. Nothing is written on rejection.
    fn edit<F>(
        &self,
        event_id: &str,
        actor: &str,
        audit_type: &str,
        edit: F,
    ) -> GateResult<MovementEvent>
    where
        F: FnOnce(&rusqlite::Transaction<'_>, &MovementEvent, &mut Vec<MovementEvent>) -> GateResult<serde_json::Value>,
    {
        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let target = get_event_on(&tx, event_id)?
            .ok_or_else(|| GateError::UnknownEvent(event_id.to_string()))?;

        let mut timeline = timeline_on(&tx, &target.animal_id)?;
        let details = edit(&tx, &target, &mut timeline)?;

        let directions: Vec<Direction> = timeline.iter().map(|e| e.direction).collect();
        if let Some(idx) = find_alternation_break(&directions) {
            // tx drops here and rolls back
            return Err(match idx {
                0 => GateError::opens_with(&target.animal_id, directions[0]),
                _ => GateError::repeated(&target.animal_id, directions[idx]),
            });
        }

        refresh_current_pen(&tx, &target.animal_id)?;
        insert_event(
            &tx,
            &Event::new(audit_type, AUDIT_ENTITY, event_id, details, actor),
        )?;
        tx.commit()?;

        Ok(target)
    }
}

impl Ledger for SqliteLedger {
    fn last_event(&self, animal_id: &str) -> GateResult<Option<MovementEvent>> {
        let conn = self.db.lock();
        last_event_on(&conn, animal_id)
    }

    fn append(&self, event: &MovementEvent, expected_last: Option<&str>) -> Result<(), AppendError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = last_event_on(&tx, &event.animal_id)?;
        let found = current.as_ref().map(|e| e.id.clone());
        if found.as_deref() != expected_last {
            return Err(AppendError::Conflict {
                animal_id: event.animal_id.clone(),
                expected: expected_last.map(str::to_string),
                found,
            });
        }

        if let Some(last) = &current {
            if last.direction == event.direction {
                return Err(GateError::repeated(&event.animal_id, event.direction).into());
            }
            if event.timestamp < last.timestamp {
                return Err(GateError::ClockSkew {
                    animal_id: event.animal_id.clone(),
                    now: event.timestamp,
                    last: last.timestamp,
                }
                .into());
            }
        }

        let inserted = tx.execute(
            "INSERT INTO movement_events (event_id, animal_id, pen_id, direction, timestamp, sequence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.id,
                event.animal_id,
                event.pen_id,
                event.direction.as_str(),
                format_timestamp(&event.timestamp),
                event.sequence,
            ],
        );

        match inserted {
            Ok(_) => {}
            // another writer took this sequence slot first
            Err(e) if is_unique_violation(&e) => {
                return Err(AppendError::Conflict {
                    animal_id: event.animal_id.clone(),
                    expected: expected_last.map(str::to_string),
                    found: None,
                });
            }
            Err(e) => return Err(e.into()),
        }

        refresh_current_pen(&tx, &event.animal_id)?;
        tx.commit()?;

        debug!(event_id = %event.id, animal_id = %event.animal_id, "ledger append committed");
        Ok(())
    }

    fn history(&self, animal_id: &str, range: TimeRange) -> GateResult<Vec<MovementEvent>> {
        let conn = self.db.lock();
        let (from, to) = range.sql_bounds();
        let sql = format!(
            "SELECT {} FROM movement_events
             WHERE animal_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
             ORDER BY timestamp DESC, sequence DESC",
            EVENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(params![animal_id, from, to], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn events_in_range(&self, range: TimeRange) -> GateResult<Vec<MovementEvent>> {
        let conn = self.db.lock();
        let (from, to) = range.sql_bounds();
        let sql = format!(
            "SELECT {} FROM movement_events
             WHERE timestamp >= ?1 AND timestamp < ?2
             ORDER BY timestamp DESC, sequence DESC",
            EVENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(params![from, to], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn latest_events(&self) -> GateResult<Vec<MovementEvent>> {
        let conn = self.db.lock();
        let sql = format!(
            "SELECT {} FROM movement_events m
             WHERE m.event_id = (
                 SELECT event_id FROM movement_events
                 WHERE animal_id = m.animal_id
                 ORDER BY timestamp DESC, sequence DESC
                 LIMIT 1
             )
             ORDER BY m.animal_id",
            EVENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map([], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn get_event(&self, event_id: &str) -> GateResult<Option<MovementEvent>> {
        let conn = self.db.lock();
        get_event_on(&conn, event_id)
    }

    fn correct(&self, event_id: &str, direction: Direction, actor: &str) -> GateResult<MovementEvent> {
        let mut corrected = self.edit(event_id, actor, "movement_corrected", |tx, target, timeline| {
            for event in timeline.iter_mut().filter(|e| e.id == target.id) {
                event.direction = direction;
            }
            tx.execute(
                "UPDATE movement_events SET direction = ?1 WHERE event_id = ?2",
                params![direction.as_str(), target.id],
            )?;
            Ok(serde_json::json!({
                "animal_id": target.animal_id,
                "from": target.direction,
                "to": direction,
            }))
        })?;

        info!(
            event_id,
            animal_id = %corrected.animal_id,
            from = %corrected.direction,
            to = %direction,
            actor,
            "movement event corrected"
        );
        corrected.direction = direction;
        Ok(corrected)
    }

    fn remove(&self, event_id: &str, actor: &str) -> GateResult<MovementEvent> {
        let removed = self.edit(event_id, actor, "movement_removed", |tx, target, timeline| {
            timeline.retain(|e| e.id != target.id);
            tx.execute(
                "DELETE FROM movement_events WHERE event_id = ?1",
                params![target.id],
            )?;
            Ok(serde_json::to_value(target)?)
        })?;

        info!(
            event_id,
            animal_id = %removed.animal_id,
            direction = %removed.direction,
            actor,
            "movement event removed"
        );
        Ok(removed)
    }

    fn audit_trail(&self, event_id: &str) -> GateResult<Vec<Event>> {
        let conn = self.db.lock();
        get_events_for_entity(&conn, AUDIT_ENTITY, event_id)
    }
}

// ============================================================================
// PER-ANIMAL LOCK ARENA
// ============================================================================

/// Map from animal id to that animal's append lock.
///
/// Scans of the same animal queue behind one another; scans of different
/// animals never touch each other's slot. The map shard is held only long
/// enough to find or create a slot.
#[derive(Default)]
pub struct AnimalLocks {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

impl AnimalLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, animal_id: &str) -> Arc<Mutex<()>> {
        self.slots
            .entry(animal_id.to_string())
            .or_insert_with(|| {
                debug!(animal_id, "creating append lock slot");
                Arc::new(Mutex::new(()))
            })
            .clone()
    }
}

// ============================================================================
// TESTS
// ============================================================================
