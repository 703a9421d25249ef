// Wiring: one database, one ledger, the engine that writes it and the
// query service that reads it. Registry chores that sit beside the gate
// (pens, vaccinations, the location cache) go through here too.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

use crate::config::GateConfig;
use crate::db::Database;
use crate::engine::GateEngine;
use crate::entities::{animal, pen, vaccine, Pen, VaccinationRecord};
use crate::error::{GateError, GateResult};
use crate::ledger::{Ledger, SqliteLedger};
use crate::query::MovementQuery;
use crate::resolver::IdentityResolver;

pub struct GateSystem {
    pub db: Database,
    pub ledger: Arc<SqliteLedger>,
    pub engine: GateEngine,
    pub query: MovementQuery,
}

impl GateSystem {
    pub fn open(config: &GateConfig) -> Result<Self> {
        let db = Database::open(&config.database_path)?;
        Ok(Self::from_database(db, config))
    }

    pub fn from_database(db: Database, config: &GateConfig) -> Self {
        let ledger = Arc::new(SqliteLedger::new(db.clone()));
        let shared: Arc<dyn Ledger> = ledger.clone();

        let engine = GateEngine::new(IdentityResolver::new(db.clone()), shared.clone())
            .with_skew_policy(config.clock_skew_policy, config.clock_epsilon());
        let query = MovementQuery::new(shared, db.clone());

        GateSystem {
            db,
            ledger,
            engine,
            query,
        }
    }

    pub fn pens(&self) -> GateResult<Vec<Pen>> {
        pen::list_pens(&self.db.lock())
    }

    /// Record a vaccination, located by the animal's current Entry if any.
    pub fn vaccinate(
        &self,
        animal_id: &str,
        vaccine_id: &str,
        dose: &str,
        vaccinated_at: DateTime<Utc>,
    ) -> GateResult<VaccinationRecord> {
        vaccine::record_vaccination(&self.db.lock(), animal_id, vaccine_id, dose, vaccinated_at)
    }

    /// Newest first.
    pub fn vaccinations(&self, animal_id: &str) -> GateResult<Vec<VaccinationRecord>> {
        let conn = self.db.lock();
        if !animal::animal_exists(&conn, animal_id)? {
            return Err(GateError::UnknownAnimal(animal_id.to_string()));
        }
        vaccine::vaccinations_for(&conn, animal_id)
    }

    pub fn rebuild_location_cache(&self) -> GateResult<usize> {
        let changed = animal::rebuild_location_cache(&self.db.lock())?;
        info!(changed, "location cache rebuilt");
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Animal, Vaccine};

    fn system() -> GateSystem {
        let db = Database::open_in_memory().unwrap();
        {
            let conn = db.lock();
            pen::insert_pen(&conn, &Pen::new("P-2", "South")).unwrap();
            pen::insert_pen(&conn, &Pen::new("P-1", "North")).unwrap();
            animal::insert_animal(&conn, &Animal::new("A-1", "Boer")).unwrap();
            vaccine::insert_vaccine(&conn, &Vaccine::new("VX-1", "Anthrax")).unwrap();
        }
        GateSystem::from_database(db, &GateConfig::default())
    }

    #[test]
    fn test_pens_sorted_by_id() {
        let ids: Vec<String> = system().pens().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["P-1", "P-2"]);
    }

    #[test]
    fn test_vaccinate_inside_pen_links_entry() {
        let system = system();
        let entry = system.engine.record_scan("A-1", "P-1").unwrap();

        let record = system.vaccinate("A-1", "VX-1", "2ml", Utc::now()).unwrap();
        assert_eq!(record.movement_event_id.as_deref(), Some(entry.id.as_str()));

        let records = system.vaccinations("A-1").unwrap();
        assert_eq!(records, vec![record]);
        assert!(matches!(
            system.vaccinations("A-9"),
            Err(GateError::UnknownAnimal(_))
        ));
    }

    #[test]
    fn test_rebuild_location_cache_repairs_drift() {
        let system = system();
        system.engine.record_scan("A-1", "P-1").unwrap();
        assert_eq!(system.rebuild_location_cache().unwrap(), 0);

        system
            .db
            .lock()
            .execute("UPDATE animals SET current_pen_id = 'P-2' WHERE animal_id = 'A-1'", [])
            .unwrap();
        assert_eq!(system.rebuild_location_cache().unwrap(), 1);

        let conn = system.db.lock();
        let cached = animal::get_animal(&conn, "A-1").unwrap().unwrap().current_pen_id;
        assert_eq!(cached.as_deref(), Some("P-1"));
    }
}
