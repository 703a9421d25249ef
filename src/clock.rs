// ⏰ Clock - injectable ingestion time
//
// Scan timestamps are assigned at ingestion. Production uses the wall clock;
// tests drive a manual clock to reproduce skew deterministically.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use parking_lot::Mutex;

pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        ManualClock {
            current: Mutex::new(start),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.current.lock() = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

/// Largest step a clamped timestamp may take past the last event.
pub const MAX_CLOCK_EPSILON_MICROS: i64 = 1_000_000;

/// What the engine does when the clock reads earlier than the animal's
/// last event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockSkewPolicy {
    /// Stamp the event at `last + epsilon`.
    #[default]
    Clamp,
    /// Fail the scan with `GateError::ClockSkew`.
    Reject,
}

impl std::str::FromStr for ClockSkewPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "clamp" => Ok(ClockSkewPolicy::Clamp),
            "reject" => Ok(ClockSkewPolicy::Reject),
            other => Err(format!("Unknown clock skew policy: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now(), start + Duration::seconds(30));

        clock.set(start - Duration::hours(1));
        assert_eq!(clock.now(), start - Duration::hours(1));
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("clamp".parse::<ClockSkewPolicy>().unwrap(), ClockSkewPolicy::Clamp);
        assert_eq!("REJECT".parse::<ClockSkewPolicy>().unwrap(), ClockSkewPolicy::Reject);
        assert!("ignore".parse::<ClockSkewPolicy>().is_err());
        assert_eq!(ClockSkewPolicy::default(), ClockSkewPolicy::Clamp);
    }
}
