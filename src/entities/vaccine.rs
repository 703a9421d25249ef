// 💉 Vaccines and vaccination records
//
// A vaccination record points at the movement event that placed the animal
// where it was vaccinated (its last Entry). The reference is non-owning: if
// an administrator removes that event, the record keeps everything else and
// loses only the location.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::entities::animal::animal_exists;
use crate::error::{GateError, GateResult};
use crate::ledger;
use crate::movement::{format_timestamp, parse_timestamp, Direction};

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vaccine {
    pub id: String,
    pub name: String,
    pub added_at: DateTime<Utc>,
}

impl Vaccine {
    pub fn new(id: &str, name: &str) -> Self {
        Vaccine {
            id: id.to_string(),
            name: name.to_string(),
            added_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaccinationRecord {
    pub id: String,
    pub animal_id: String,
    pub vaccine_id: String,
    pub dose: String,
    pub vaccinated_at: DateTime<Utc>,

    /// Entry event locating the animal at vaccination time (None if the
    /// animal was outside all pens, or the event was since removed)
    pub movement_event_id: Option<String>,
}

impl VaccinationRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(VaccinationRecord {
            id: row.get(0)?,
            animal_id: row.get(1)?,
            vaccine_id: row.get(2)?,
            dose: row.get(3)?,
            vaccinated_at: ts_column(row, 4)?,
            movement_event_id: row.get(5)?,
        })
    }
}

pub fn insert_vaccine(conn: &Connection, vaccine: &Vaccine) -> GateResult<()> {
    conn.execute(
        "INSERT INTO vaccines (vaccine_id, name, added_at) VALUES (?1, ?2, ?3)",
        params![vaccine.id, vaccine.name, format_timestamp(&vaccine.added_at)],
    )?;
    Ok(())
}

pub fn get_vaccine(conn: &Connection, id: &str) -> GateResult<Option<Vaccine>> {
    let vaccine = conn
        .query_row(
            "SELECT vaccine_id, name, added_at FROM vaccines WHERE vaccine_id = ?1",
            params![id],
            |row| {
                Ok(Vaccine {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    added_at: ts_column(row, 2)?,
                })
            },
        )
        .optional()?;
    Ok(vaccine)
}

pub fn count_vaccines(conn: &Connection) -> GateResult<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM vaccines", [], |row| row.get(0))?)
}

/// Record a vaccination, linking it to the animal's current Entry event.
pub fn record_vaccination(
    conn: &Connection,
    animal_id: &str,
    vaccine_id: &str,
    dose: &str,
    vaccinated_at: DateTime<Utc>,
) -> GateResult<VaccinationRecord> {
    if !animal_exists(conn, animal_id)? {
        return Err(GateError::UnknownAnimal(animal_id.to_string()));
    }
    if get_vaccine(conn, vaccine_id)?.is_none() {
        return Err(GateError::UnknownVaccine(vaccine_id.to_string()));
    }

    let movement_event_id = ledger::last_event_on(conn, animal_id)?
        .filter(|event| event.direction == Direction::Entry)
        .map(|event| event.id);

    let record = VaccinationRecord {
        id: uuid::Uuid::new_v4().to_string(),
        animal_id: animal_id.to_string(),
        vaccine_id: vaccine_id.to_string(),
        dose: dose.to_string(),
        vaccinated_at,
        movement_event_id,
    };

    conn.execute(
        "INSERT INTO vaccinations (
            vaccination_id, animal_id, vaccine_id, dose, vaccinated_at, movement_event_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.id,
            record.animal_id,
            record.vaccine_id,
            record.dose,
            format_timestamp(&record.vaccinated_at),
            record.movement_event_id,
        ],
    )?;

    info!(
        animal_id,
        vaccine_id,
        located = record.movement_event_id.is_some(),
        "vaccination recorded"
    );

    Ok(record)
}

pub fn vaccinations_for(conn: &Connection, animal_id: &str) -> GateResult<Vec<VaccinationRecord>> {
    let mut stmt = conn.prepare(
        "SELECT vaccination_id, animal_id, vaccine_id, dose, vaccinated_at, movement_event_id
         FROM vaccinations
         WHERE animal_id = ?1
         ORDER BY vaccinated_at DESC",
    )?;
    let records = stmt
        .query_map(params![animal_id], VaccinationRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}
