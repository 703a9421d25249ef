// 🏠 Pen Entity - a physical enclosure with a gate reader
//
// No capacity is modeled: a pen accepts any number of animals.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::GateResult;
use crate::movement::{format_timestamp, parse_timestamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pen {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Pen {
    pub fn new(id: &str, name: &str) -> Self {
        Pen {
            id: id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let created: String = row.get(2)?;
        Ok(Pen {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: parse_timestamp(&created).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
            })?,
        })
    }
}

pub fn insert_pen(conn: &Connection, pen: &Pen) -> GateResult<()> {
    conn.execute(
        "INSERT INTO pens (pen_id, name, created_at) VALUES (?1, ?2, ?3)",
        params![pen.id, pen.name, format_timestamp(&pen.created_at)],
    )?;
    Ok(())
}

pub fn get_pen(conn: &Connection, id: &str) -> GateResult<Option<Pen>> {
    let pen = conn
        .query_row(
            "SELECT pen_id, name, created_at FROM pens WHERE pen_id = ?1",
            params![id],
            Pen::from_row,
        )
        .optional()?;
    Ok(pen)
}

pub fn pen_exists(conn: &Connection, id: &str) -> GateResult<bool> {
    Ok(get_pen(conn, id)?.is_some())
}

pub fn list_pens(conn: &Connection) -> GateResult<Vec<Pen>> {
    let mut stmt = conn.prepare("SELECT pen_id, name, created_at FROM pens ORDER BY pen_id")?;
    let pens = stmt
        .query_map([], Pen::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(pens)
}

pub fn count_pens(conn: &Connection) -> GateResult<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM pens", [], |row| row.get(0))?)
}
