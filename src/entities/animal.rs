// 🐐 Animal Entity - the tracked livestock unit
//
// "The animal id is IDENTITY (printed on its QR tag), everything else is a VALUE"
//
// - id is exactly the string encoded in the animal's QR label
// - current_pen_id is a CACHE of the location ledger, never the source of truth

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::{GateError, GateResult};
use crate::ledger;
use crate::movement::{format_timestamp, parse_timestamp, Direction};

// ============================================================================
// ANIMAL ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Animal {
    /// Stable identity, also the literal QR payload
    pub id: String,

    /// Breed / lineage label
    pub breed: String,

    pub registered_at: DateTime<Utc>,

    /// Vaccine currently assigned to this animal
    pub vaccine_id: Option<String>,

    /// Cached "currently inside" pen, derived from the ledger
    pub current_pen_id: Option<String>,

    pub image_path: Option<String>,
}

impl Animal {
    pub fn new(id: &str, breed: &str) -> Self {
        Animal {
            id: id.to_string(),
            breed: breed.to_string(),
            registered_at: Utc::now(),
            vaccine_id: None,
            current_pen_id: None,
            image_path: None,
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let registered: String = row.get(2)?;
        Ok(Animal {
            id: row.get(0)?,
            breed: row.get(1)?,
            registered_at: parse_timestamp(&registered).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
            })?,
            vaccine_id: row.get(3)?,
            current_pen_id: row.get(4)?,
            image_path: row.get(5)?,
        })
    }
}

const ANIMAL_COLUMNS: &str =
    "animal_id, breed, registered_at, vaccine_id, current_pen_id, image_path";

// ============================================================================
// PERSISTENCE
// ============================================================================

/// Register an animal. The cached pen is never written from here; it only
/// follows the ledger.
pub fn insert_animal(conn: &Connection, animal: &Animal) -> GateResult<()> {
    conn.execute(
        "INSERT INTO animals (animal_id, breed, registered_at, vaccine_id, image_path)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            animal.id,
            animal.breed,
            format_timestamp(&animal.registered_at),
            animal.vaccine_id,
            animal.image_path,
        ],
    )?;
    Ok(())
}

pub fn get_animal(conn: &Connection, id: &str) -> GateResult<Option<Animal>> {
    let sql = format!("SELECT {} FROM animals WHERE animal_id = ?1", ANIMAL_COLUMNS);
    let animal = conn
        .query_row(&sql, params![id], Animal::from_row)
        .optional()?;
    Ok(animal)
}

pub fn animal_exists(conn: &Connection, id: &str) -> GateResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM animals WHERE animal_id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn list_animals(conn: &Connection) -> GateResult<Vec<Animal>> {
    let sql = format!("SELECT {} FROM animals ORDER BY animal_id", ANIMAL_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let animals = stmt
        .query_map([], Animal::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(animals)
}

pub fn count_animals(conn: &Connection) -> GateResult<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM animals", [], |row| row.get(0))?)
}

/// Point the cached pen at whatever the ledger says now.
pub(crate) fn refresh_current_pen(conn: &Connection, animal_id: &str) -> GateResult<()> {
    let pen = match ledger::last_event_on(conn, animal_id)? {
        Some(event) if event.direction == Direction::Entry => Some(event.pen_id),
        _ => None,
    };

    let updated = conn.execute(
        "UPDATE animals SET current_pen_id = ?1 WHERE animal_id = ?2",
        params![pen, animal_id],
    )?;

    if updated == 0 {
        return Err(GateError::UnknownAnimal(animal_id.to_string()));
    }
    Ok(())
}

/// Recompute every animal's cached pen from the ledger. Returns how many
/// cache entries changed.
pub fn rebuild_location_cache(conn: &Connection) -> GateResult<usize> {
    let mut changed = 0;
    for animal in list_animals(conn)? {
        refresh_current_pen(conn, &animal.id)?;
        let after = get_animal(conn, &animal.id)?.and_then(|a| a.current_pen_id);
        if after != animal.current_pen_id {
            changed += 1;
        }
    }
    Ok(changed)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::pen::{insert_pen, Pen};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_animal_creation() {
        let animal = Animal::new("KMB-001", "Boer");

        assert_eq!(animal.id, "KMB-001");
        assert_eq!(animal.breed, "Boer");
        assert!(animal.vaccine_id.is_none());
        assert!(animal.current_pen_id.is_none());
    }

    #[test]
    fn test_insert_and_get_animal() {
        let conn = test_conn();
        let mut animal = Animal::new("KMB-001", "Boer");
        animal.image_path = Some("uploads/kmb-001.jpg".to_string());
        insert_animal(&conn, &animal).unwrap();

        let loaded = get_animal(&conn, "KMB-001").unwrap().unwrap();
        assert_eq!(loaded.breed, "Boer");
        assert_eq!(loaded.image_path.as_deref(), Some("uploads/kmb-001.jpg"));

        assert!(animal_exists(&conn, "KMB-001").unwrap());
        assert!(!animal_exists(&conn, "kmb-001").unwrap());
        assert!(get_animal(&conn, "KMB-999").unwrap().is_none());
        assert_eq!(count_animals(&conn).unwrap(), 1);
    }

    #[test]
    fn test_insert_animal_with_unknown_vaccine_fails() {
        let conn = test_conn();
        let mut animal = Animal::new("KMB-001", "Boer");
        animal.vaccine_id = Some("VX-404".to_string());

        assert!(matches!(insert_animal(&conn, &animal), Err(GateError::Storage(_))));
    }

    #[test]
    fn test_refresh_current_pen_follows_ledger() {
        let conn = test_conn();
        insert_pen(&conn, &Pen::new("P-1", "North")).unwrap();
        insert_animal(&conn, &Animal::new("KMB-001", "Boer")).unwrap();

        conn.execute(
            "INSERT INTO movement_events (event_id, animal_id, pen_id, direction, timestamp, sequence)
             VALUES ('e1', 'KMB-001', 'P-1', 'Entry', '2025-01-01T00:00:00.000000Z', 1)",
            [],
        )
        .unwrap();

        // cache is stale until rebuilt
        assert!(get_animal(&conn, "KMB-001").unwrap().unwrap().current_pen_id.is_none());

        assert_eq!(rebuild_location_cache(&conn).unwrap(), 1);
        assert_eq!(
            get_animal(&conn, "KMB-001").unwrap().unwrap().current_pen_id.as_deref(),
            Some("P-1")
        );
        assert_eq!(rebuild_location_cache(&conn).unwrap(), 0);
    }

    #[test]
    fn test_refresh_unknown_animal() {
        let conn = test_conn();
        assert!(matches!(
            refresh_current_pen(&conn, "ghost"),
            Err(GateError::UnknownAnimal(_))
        ));
    }
}
