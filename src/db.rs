use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::{debug, info};

use crate::entities::{animal, pen, vaccine, Animal, Pen, Vaccine};
use crate::error::GateError;
use crate::movement::{format_timestamp, parse_timestamp};

/// Shared handle to the SQLite database.
///
/// One connection behind a mutex per handle: every statement is short, and
/// SQLite admits a single writer per file anyway. Reads queue behind writes
/// within one handle. Separate handles on the same file (other processes, or
/// a second `Database::open`) run independently and are serialized only by
/// the ledger's IMMEDIATE transactions.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        setup_database(&conn).context("Failed to initialize schema")?;
        info!(path = %path.display(), "database opened");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Database {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

/// Event for audit trail: who changed which ledger entry, and how
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> rusqlite::Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Registry tables
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pens (
            pen_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS vaccines (
            vaccine_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            added_at TEXT NOT NULL
        )",
        [],
    )?;

    // current_pen_id is a cache of the ledger, refreshed on every ledger write
    conn.execute(
        "CREATE TABLE IF NOT EXISTS animals (
            animal_id TEXT PRIMARY KEY,
            breed TEXT NOT NULL,
            registered_at TEXT NOT NULL,
            vaccine_id TEXT REFERENCES vaccines(vaccine_id) ON DELETE SET NULL,
            current_pen_id TEXT REFERENCES pens(pen_id) ON DELETE SET NULL,
            image_path TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Location ledger (append-only movement events)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS movement_events (
            event_id TEXT PRIMARY KEY,
            animal_id TEXT NOT NULL REFERENCES animals(animal_id),
            pen_id TEXT NOT NULL REFERENCES pens(pen_id),
            direction TEXT NOT NULL CHECK (direction IN ('Entry', 'Exit')),
            timestamp TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (animal_id, sequence)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS vaccinations (
            vaccination_id TEXT PRIMARY KEY,
            animal_id TEXT NOT NULL REFERENCES animals(animal_id),
            vaccine_id TEXT NOT NULL REFERENCES vaccines(vaccine_id),
            dose TEXT NOT NULL,
            vaccinated_at TEXT NOT NULL,
            movement_event_id TEXT REFERENCES movement_events(event_id) ON DELETE SET NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail of administrative edits)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_movement_animal_time
         ON movement_events(animal_id, timestamp, sequence)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_movement_timestamp ON movement_events(timestamp)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> crate::GateResult<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            format_timestamp(&event.timestamp),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> crate::GateResult<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(&timestamp_str).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        1,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// CSV IMPORT (animals and pens registered ahead of gate scanning)
// ============================================================================

#[derive(Debug, Deserialize)]
struct AnimalRow {
    id: String,
    breed: String,
    #[serde(default)]
    registered_at: Option<String>,
    #[serde(default)]
    vaccine_id: Option<String>,
    #[serde(default)]
    image_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VaccineRow {
    id: String,
    name: String,
    #[serde(default)]
    added_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PenRow {
    id: String,
    name: String,
    #[serde(default)]
    created_at: Option<String>,
}

fn parse_optional_date(raw: Option<&str>) -> Result<DateTime<Utc>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => parse_timestamp(s).with_context(|| format!("Invalid timestamp: {}", s)),
        None => Ok(Utc::now()),
    }
}

pub fn load_animals_csv(csv_path: &Path) -> Result<Vec<Animal>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;

    let mut animals = Vec::new();

    for result in rdr.deserialize() {
        let row: AnimalRow = result.context("Failed to deserialize animal row")?;
        let mut animal = Animal::new(&row.id, &row.breed);
        animal.registered_at = parse_optional_date(row.registered_at.as_deref())?;
        animal.vaccine_id = row.vaccine_id.filter(|v| !v.is_empty());
        animal.image_path = row.image_path.filter(|v| !v.is_empty());
        animals.push(animal);
    }

    Ok(animals)
}

pub fn load_pens_csv(csv_path: &Path) -> Result<Vec<Pen>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;

    let mut pens = Vec::new();

    for result in rdr.deserialize() {
        let row: PenRow = result.context("Failed to deserialize pen row")?;
        let mut pen = Pen::new(&row.id, &row.name);
        pen.created_at = parse_optional_date(row.created_at.as_deref())?;
        pens.push(pen);
    }

    Ok(pens)
}

pub fn load_vaccines_csv(csv_path: &Path) -> Result<Vec<Vaccine>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;

    let mut vaccines = Vec::new();

    for result in rdr.deserialize() {
        let row: VaccineRow = result.context("Failed to deserialize vaccine row")?;
        let mut vaccine = Vaccine::new(&row.id, &row.name);
        vaccine.added_at = parse_optional_date(row.added_at.as_deref())?;
        vaccines.push(vaccine);
    }

    Ok(vaccines)
}

/// Outcome of an import run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub pens_inserted: usize,
    pub vaccines_inserted: usize,
    pub animals_inserted: usize,
    pub duplicates: usize,
}

/// Only a primary key collision means "already registered"; foreign key and
/// check failures are real errors.
fn is_duplicate_key(err: &GateError) -> bool {
    matches!(
        err,
        GateError::Storage(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// Import pens, vaccines, then animals in one transaction; rows whose id
/// already exists are skipped. Any other failure rolls the whole import back.
pub fn import_registry(
    conn: &Connection,
    pens: &[Pen],
    vaccines: &[Vaccine],
    animals: &[Animal],
) -> Result<ImportSummary> {
    let tx = conn.unchecked_transaction()?;
    let mut summary = ImportSummary::default();

    for p in pens {
        match pen::insert_pen(&tx, p) {
            Ok(()) => summary.pens_inserted += 1,
            Err(e) if is_duplicate_key(&e) => {
                debug!(pen_id = %p.id, "pen already registered, skipping");
                summary.duplicates += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to import pen {}", p.id)),
        }
    }

    for v in vaccines {
        match vaccine::insert_vaccine(&tx, v) {
            Ok(()) => summary.vaccines_inserted += 1,
            Err(e) if is_duplicate_key(&e) => {
                debug!(vaccine_id = %v.id, "vaccine already registered, skipping");
                summary.duplicates += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to import vaccine {}", v.id)),
        }
    }

    for a in animals {
        if let Some(vaccine_id) = &a.vaccine_id {
            if vaccine::get_vaccine(&tx, vaccine_id)?.is_none() {
                return Err(GateError::UnknownVaccine(vaccine_id.clone()))
                    .with_context(|| format!("Failed to import animal {}", a.id));
            }
        }

        match animal::insert_animal(&tx, a) {
            Ok(()) => summary.animals_inserted += 1,
            Err(e) if is_duplicate_key(&e) => {
                debug!(animal_id = %a.id, "animal already registered, skipping");
                summary.duplicates += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to import animal {}", a.id)),
        }
    }

    tx.commit()?;

    info!(
        pens = summary.pens_inserted,
        vaccines = summary.vaccines_inserted,
        animals = summary.animals_inserted,
        duplicates = summary.duplicates,
        "registry import finished"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_event_log() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let event = Event::new(
            "movement_corrected",
            "movement_event",
            "evt-123",
            serde_json::json!({"from": "Entry", "to": "Exit"}),
            "admin",
        );

        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "movement_event", "evt-123").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "movement_corrected");
        assert_eq!(events[0].actor, "admin");
        assert_eq!(events[0].data["to"], "Exit");
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();
    }

    #[test]
    fn test_import_twice_skips_duplicates() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let pens = vec![Pen::new("P-1", "North"), Pen::new("P-2", "South")];
        let animals = vec![Animal::new("A-1", "Boer"), Animal::new("A-2", "Etawa")];

        let vaccines = vec![Vaccine::new("VX-1", "Anthrax")];
        let mut vaccinated = Animal::new("A-3", "Kacang");
        vaccinated.vaccine_id = Some("VX-1".to_string());
        let animals = vec![Animal::new("A-1", "Boer"), Animal::new("A-2", "Etawa"), vaccinated];

        let first = import_registry(&conn, &pens, &vaccines, &animals).unwrap();
        assert_eq!(first.pens_inserted, 2);
        assert_eq!(first.vaccines_inserted, 1);
        assert_eq!(first.animals_inserted, 3);
        assert_eq!(first.duplicates, 0);

        let second = import_registry(&conn, &pens, &vaccines, &animals).unwrap();
        assert_eq!(second.pens_inserted, 0);
        assert_eq!(second.animals_inserted, 0);
        assert_eq!(second.duplicates, 6);
    }

    #[test]
    fn test_import_unknown_vaccine_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut animal = Animal::new("A-1", "Boer");
        animal.vaccine_id = Some("VX-1".to_string());

        let err = import_registry(&conn, &[Pen::new("P-1", "North")], &[], &[animal]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GateError>(),
            Some(GateError::UnknownVaccine(id)) if id == "VX-1"
        ));

        // the pen from the same run rolled back too
        assert!(!animal::animal_exists(&conn, "A-1").unwrap());
        assert!(!pen::pen_exists(&conn, "P-1").unwrap());
    }

    #[test]
    fn test_foreign_key_failure_is_not_a_duplicate() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let fk: GateError = conn
            .execute(
                "INSERT INTO animals (animal_id, breed, registered_at, vaccine_id)
                 VALUES ('A-1', 'Boer', '2025-01-01T00:00:00.000000Z', 'VX-9')",
                [],
            )
            .unwrap_err()
            .into();
        assert!(!is_duplicate_key(&fk));

        animal::insert_animal(&conn, &Animal::new("A-2", "Boer")).unwrap();
        let dup = animal::insert_animal(&conn, &Animal::new("A-2", "Boer")).unwrap_err();
        assert!(is_duplicate_key(&dup));
    }

    #[test]
    fn test_load_csv_files() {
        let dir = tempfile::tempdir().unwrap();

        let animals_path = dir.path().join("animals.csv");
        let mut f = std::fs::File::create(&animals_path).unwrap();
        writeln!(f, "id,breed,registered_at,vaccine_id,image_path").unwrap();
        writeln!(f, "A-1,Boer,2025-01-02T03:04:05Z,,").unwrap();
        writeln!(f, "A-2,Etawa,,,goat.jpg").unwrap();

        let pens_path = dir.path().join("pens.csv");
        let mut f = std::fs::File::create(&pens_path).unwrap();
        writeln!(f, "id,name,created_at").unwrap();
        writeln!(f, "P-1,North,").unwrap();

        let animals = load_animals_csv(&animals_path).unwrap();
        assert_eq!(animals.len(), 2);
        assert_eq!(animals[0].id, "A-1");
        assert_eq!(format_timestamp(&animals[0].registered_at), "2025-01-02T03:04:05.000000Z");
        assert!(animals[0].image_path.is_none());
        assert_eq!(animals[1].image_path.as_deref(), Some("goat.jpg"));

        let pens = load_pens_csv(&pens_path).unwrap();
        assert_eq!(pens.len(), 1);
        assert_eq!(pens[0].name, "North");

        let vaccines_path = dir.path().join("vaccines.csv");
        let mut f = std::fs::File::create(&vaccines_path).unwrap();
        writeln!(f, "id,name,added_at").unwrap();
        writeln!(f, "VX-1,Anthrax,2024-12-01T00:00:00Z").unwrap();

        let vaccines = load_vaccines_csv(&vaccines_path).unwrap();
        assert_eq!(vaccines.len(), 1);
        assert_eq!(vaccines[0].name, "Anthrax");
    }
}
