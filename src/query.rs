// 📊 Movement Query Service - read side of the ledger
//
// Never writes. Every answer is derived from ledger events; the cached
// animals.current_pen_id column is not consulted.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::{Database, Event};
use crate::entities::{animal, pen, vaccine};
use crate::error::{GateError, GateResult};
use crate::ledger::Ledger;
use crate::movement::{find_alternation_break, Direction, Location, MovementEvent, TimeRange};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MovementCounts {
    pub entries: u64,
    pub exits: u64,
}

impl MovementCounts {
    pub fn total(&self) -> u64 {
        self.entries + self.exits
    }

    fn tally(events: &[MovementEvent]) -> Self {
        events.iter().fold(MovementCounts::default(), |mut acc, e| {
            match e.direction {
                Direction::Entry => acc.entries += 1,
                Direction::Exit => acc.exits += 1,
            }
            acc
        })
    }
}

/// Figures behind the dashboard screen
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_animals: i64,
    pub total_pens: i64,
    pub total_vaccines: i64,
    pub animals_inside: usize,
    pub gate: MovementCounts,
}

pub struct MovementQuery {
    ledger: Arc<dyn Ledger>,
    db: Database,
}

impl MovementQuery {
    pub fn new(ledger: Arc<dyn Ledger>, db: Database) -> Self {
        MovementQuery { ledger, db }
    }

    fn ensure_animal(&self, animal_id: &str) -> GateResult<()> {
        let conn = self.db.lock();
        if animal::animal_exists(&conn, animal_id)? {
            Ok(())
        } else {
            Err(GateError::UnknownAnimal(animal_id.to_string()))
        }
    }

    pub fn current_location(&self, animal_id: &str) -> GateResult<Location> {
        self.ensure_animal(animal_id)?;
        let last = self.ledger.last_event(animal_id)?;
        Ok(Location::from_last(last.as_ref()))
    }

    /// Newest first.
    pub fn history_for(&self, animal_id: &str, range: TimeRange) -> GateResult<Vec<MovementEvent>> {
        self.ensure_animal(animal_id)?;
        self.ledger.history(animal_id, range)
    }

    pub fn counts(&self, range: TimeRange) -> GateResult<MovementCounts> {
        let events = self.ledger.events_in_range(range)?;
        Ok(MovementCounts::tally(&events))
    }

    /// Gate history across all animals, newest first, optionally one direction.
    pub fn gate_history(
        &self,
        range: TimeRange,
        direction: Option<Direction>,
    ) -> GateResult<Vec<MovementEvent>> {
        let mut events = self.ledger.events_in_range(range)?;
        if let Some(direction) = direction {
            events.retain(|e| e.direction == direction);
        }
        Ok(events)
    }

    pub fn event(&self, event_id: &str) -> GateResult<MovementEvent> {
        self.ledger
            .get_event(event_id)?
            .ok_or_else(|| GateError::UnknownEvent(event_id.to_string()))
    }

    pub fn audit_trail(&self, event_id: &str) -> GateResult<Vec<Event>> {
        self.event(event_id)?;
        self.ledger.audit_trail(event_id)
    }

    /// Animals whose latest event is an Entry into `pen_id`.
    pub fn occupancy(&self, pen_id: &str) -> GateResult<Vec<String>> {
        {
            let conn = self.db.lock();
            if !pen::pen_exists(&conn, pen_id)? {
                return Err(GateError::UnknownPen(pen_id.to_string()));
            }
        }
        Ok(self
            .ledger
            .latest_events()?
            .into_iter()
            .filter(|e| e.resulting_location().pen_id() == Some(pen_id))
            .map(|e| e.animal_id)
            .collect())
    }

    pub fn dashboard(&self, range: TimeRange) -> GateResult<DashboardStats> {
        let (total_animals, total_pens, total_vaccines) = {
            let conn = self.db.lock();
            (
                animal::count_animals(&conn)?,
                pen::count_pens(&conn)?,
                vaccine::count_vaccines(&conn)?,
            )
        };

        let animals_inside = self
            .ledger
            .latest_events()?
            .iter()
            .filter(|e| e.resulting_location().is_inside())
            .count();

        Ok(DashboardStats {
            total_animals,
            total_pens,
            total_vaccines,
            animals_inside,
            gate: self.counts(range)?,
        })
    }

    /// Ids of animals whose history does not open with an Entry or has two
    /// adjacent same-direction events. Empty on a healthy ledger.
    pub fn verify_ledger(&self) -> GateResult<Vec<String>> {
        let mut by_animal: BTreeMap<String, Vec<MovementEvent>> = BTreeMap::new();
        for event in self.ledger.events_in_range(TimeRange::all())? {
            by_animal.entry(event.animal_id.clone()).or_default().push(event);
        }

        Ok(by_animal
            .into_iter()
            .filter_map(|(animal_id, mut events)| {
                events.sort_by(|a, b| {
                    a.timestamp
                        .cmp(&b.timestamp)
                        .then(a.sequence.cmp(&b.sequence))
                });
                let directions: Vec<Direction> = events.iter().map(|e| e.direction).collect();
                find_alternation_break(&directions).map(|_| animal_id)
            })
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================
