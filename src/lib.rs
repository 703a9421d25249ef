// Livestock Gate Tracker - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;     // Gate Movement Engine - the only ledger writer
pub mod entities;   // Animals, pens, vaccines, vaccinations
pub mod error;
pub mod ledger;     // Location Ledger - append-only source of truth
pub mod logging;
pub mod movement;
pub mod query;      // Movement Query Service - read side
pub mod resolver;   // Identity Resolver - QR payload → animal id
pub mod system;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use clock::{Clock, ClockSkewPolicy, ManualClock, SystemClock};
pub use config::GateConfig;
pub use db::{
    Database, Event, ImportSummary,
    setup_database, insert_event, get_events_for_entity,
    load_animals_csv, load_pens_csv, load_vaccines_csv, import_registry,
};
pub use engine::{GateEngine, ScanReceipt};
pub use entities::{Animal, Pen, VaccinationRecord, Vaccine};
pub use error::{GateError, GateResult};
pub use ledger::{AnimalLocks, AppendError, Ledger, SqliteLedger};
pub use movement::{Direction, Location, MovementEvent, TimeRange};
pub use query::{DashboardStats, MovementCounts, MovementQuery};
pub use resolver::IdentityResolver;
pub use system::GateSystem;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
