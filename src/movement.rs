// 🚪 Movement Model - Direction, ledger entries, derived location
//
// A movement event is a fact: "animal X passed the gate of pen P, going in/out,
// at time T". The animal's location is never stored as truth; it is always
// the fold of its events:
//
//   Outside --scan(pen)--> Inside(pen) --scan(any)--> Outside --> ...

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// DIRECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Entry,
    Exit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Entry => "Entry",
            Direction::Exit => "Exit",
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Entry => Direction::Exit,
            Direction::Exit => Direction::Entry,
        }
    }

    /// Direction the next scan takes after `last`.
    pub fn following(last: Option<&MovementEvent>) -> Direction {
        last.map_or(Direction::Entry, |event| event.direction.opposite())
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    /// Accepts the canonical names and the gate labels of the legacy
    /// bookkeeping screens ("Masuk" / "Keluar").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "entry" | "in" | "masuk" => Ok(Direction::Entry),
            "exit" | "out" | "keluar" => Ok(Direction::Exit),
            other => Err(format!("Unknown direction: {}", other)),
        }
    }
}

// ============================================================================
// MOVEMENT EVENT
// ============================================================================

/// One ledger entry. Owned by the ledger; immutable except for admin
/// direction corrections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementEvent {
    pub id: String,
    pub animal_id: String,
    pub pen_id: String,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,

    /// Position in the animal's ledger (1-based, increasing, gaps after removals)
    pub sequence: i64,
}

impl MovementEvent {
    pub fn new(
        animal_id: &str,
        pen_id: &str,
        direction: Direction,
        timestamp: DateTime<Utc>,
        sequence: i64,
    ) -> Self {
        MovementEvent {
            id: uuid::Uuid::new_v4().to_string(),
            animal_id: animal_id.to_string(),
            pen_id: pen_id.to_string(),
            direction,
            timestamp,
            sequence,
        }
    }

    /// Location of the animal right after this event.
    pub fn resulting_location(&self) -> Location {
        match self.direction {
            Direction::Entry => Location::Inside(self.pen_id.clone()),
            Direction::Exit => Location::Outside,
        }
    }
}

/// Storage form of a timestamp: fixed-width RFC3339 so text order == time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

// ============================================================================
// LOCATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "pen_id")]
pub enum Location {
    Outside,
    Inside(String),
}

impl Location {
    pub fn from_last(last: Option<&MovementEvent>) -> Location {
        last.map_or(Location::Outside, MovementEvent::resulting_location)
    }

    /// Rebuild the location by folding events in any order; they are
    /// applied oldest first.
    pub fn replay<'a, I>(events: I) -> Location
    where
        I: IntoIterator<Item = &'a MovementEvent>,
    {
        let mut ordered: Vec<&MovementEvent> = events.into_iter().collect();
        ordered.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then(a.sequence.cmp(&b.sequence))
        });

        ordered
            .into_iter()
            .fold(Location::Outside, |_, event| event.resulting_location())
    }

    pub fn pen_id(&self) -> Option<&str> {
        match self {
            Location::Inside(pen) => Some(pen),
            Location::Outside => None,
        }
    }

    pub fn is_inside(&self) -> bool {
        matches!(self, Location::Inside(_))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Outside => f.write_str("Outside"),
            Location::Inside(pen) => write!(f, "Inside({})", pen),
        }
    }
}

// ============================================================================
// ALTERNATION
// ============================================================================

/// Check that `directions` is a run the gate state machine can produce from
/// Outside: an Entry first, then strictly alternating.
///
/// `directions` must be ordered oldest first. On failure returns the index of
/// the first event that does not follow from its predecessor.
pub fn find_alternation_break(directions: &[Direction]) -> Option<usize> {
    let mut expected = Direction::Entry;
    for (idx, direction) in directions.iter().enumerate() {
        if *direction != expected {
            return Some(idx);
        }
        expected = direction.opposite();
    }
    None
}

// ============================================================================
// TIME RANGE
// ============================================================================

/// Half-open time window `[from, to)`; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        TimeRange::default()
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        TimeRange {
            from: Some(from),
            to: Some(to),
        }
    }

    /// Parse optional RFC3339 bounds; empty strings count as open.
    pub fn parse_bounds(from: Option<&str>, to: Option<&str>) -> Result<Self, chrono::ParseError> {
        let parse = |raw: Option<&str>| {
            raw.filter(|s| !s.trim().is_empty())
                .map(|s| parse_timestamp(s.trim()))
                .transpose()
        };
        Ok(TimeRange {
            from: parse(from)?,
            to: parse(to)?,
        })
    }

    /// Bounds in storage form, open ends widened to the full text range.
    pub(crate) fn sql_bounds(&self) -> (String, String) {
        let from = self
            .from
            .map(|ts| format_timestamp(&ts))
            .unwrap_or_default();
        let to = self
            .to
            .map(|ts| format_timestamp(&ts))
            .unwrap_or_else(|| "~".to_string());
        (from, to)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, minute, 0).unwrap()
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("Entry".parse::<Direction>().unwrap(), Direction::Entry);
        assert_eq!("exit".parse::<Direction>().unwrap(), Direction::Exit);
        assert_eq!("Masuk".parse::<Direction>().unwrap(), Direction::Entry);
        assert_eq!("Keluar".parse::<Direction>().unwrap(), Direction::Exit);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn test_following_direction() {
        assert_eq!(Direction::following(None), Direction::Entry);

        let entry = MovementEvent::new("A-1", "P-1", Direction::Entry, at(0), 1);
        assert_eq!(Direction::following(Some(&entry)), Direction::Exit);

        let exit = MovementEvent::new("A-1", "P-2", Direction::Exit, at(1), 2);
        assert_eq!(Direction::following(Some(&exit)), Direction::Entry);
    }

    #[test]
    fn test_replay_ignores_input_order() {
        let e1 = MovementEvent::new("A-1", "P-1", Direction::Entry, at(0), 1);
        let e2 = MovementEvent::new("A-1", "P-1", Direction::Exit, at(5), 2);
        let e3 = MovementEvent::new("A-1", "P-3", Direction::Entry, at(9), 3);

        // newest first, as history() returns it
        let newest_first = vec![e3.clone(), e2.clone(), e1.clone()];
        assert_eq!(
            Location::replay(&newest_first),
            Location::Inside("P-3".to_string())
        );
        assert_eq!(Location::replay(&[e1, e2]), Location::Outside);
        assert_eq!(Location::replay(Vec::<&MovementEvent>::new()), Location::Outside);
    }

    #[test]
    fn test_find_alternation_break() {
        use Direction::*;
        assert_eq!(find_alternation_break(&[]), None);
        assert_eq!(find_alternation_break(&[Entry, Exit, Entry]), None);
        assert_eq!(find_alternation_break(&[Entry, Entry, Exit]), Some(1));
        assert_eq!(find_alternation_break(&[Entry, Exit, Exit]), Some(2));
    }

    #[test]
    fn test_history_must_open_with_entry() {
        use Direction::*;
        assert_eq!(find_alternation_break(&[Exit]), Some(0));
        assert_eq!(find_alternation_break(&[Exit, Entry]), Some(0));
        assert_eq!(find_alternation_break(&[Entry]), None);
    }

    #[test]
    fn test_time_range_sql_bounds() {
        let (from, to) = TimeRange::between(at(0), at(10)).sql_bounds();
        assert_eq!(from, "2025-03-01T08:00:00.000000Z");
        assert_eq!(to, "2025-03-01T08:10:00.000000Z");

        let (from, to) = TimeRange::all().sql_bounds();
        assert_eq!(from, "");
        assert!(to > format_timestamp(&at(59)));
    }

    #[test]
    fn test_parse_bounds() {
        let range = TimeRange::parse_bounds(Some("2025-03-01T08:00:00Z"), None).unwrap();
        assert_eq!(range.from, Some(at(0)));
        assert!(range.to.is_none());

        assert_eq!(TimeRange::parse_bounds(Some(""), None).unwrap(), TimeRange::all());
        assert!(TimeRange::parse_bounds(Some("yesterday"), None).is_err());
    }

    #[test]
    fn test_timestamp_text_order_matches_time_order() {
        let a = at(1);
        let b = a + Duration::microseconds(1);
        assert!(format_timestamp(&a) < format_timestamp(&b));
        assert_eq!(parse_timestamp(&format_timestamp(&b)).unwrap(), b);
    }
}
