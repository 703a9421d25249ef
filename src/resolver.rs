// 🔎 Identity Resolver - scanned QR payload → known animal id
//
// The payload IS the animal id, byte for byte. No trimming, no case folding,
// no alias table: a relabelled animal gets a freshly printed QR code.

use tracing::debug;

use crate::db::Database;
use crate::entities::{animal, pen};
use crate::error::{GateError, GateResult};

#[derive(Clone)]
pub struct IdentityResolver {
    db: Database,
}

impl IdentityResolver {
    pub fn new(db: Database) -> Self {
        IdentityResolver { db }
    }

    /// Canonical animal id for a raw QR payload.
    pub fn resolve(&self, raw_payload: &str) -> GateResult<String> {
        let conn = self.db.lock();
        if !raw_payload.is_empty() && animal::animal_exists(&conn, raw_payload)? {
            Ok(raw_payload.to_string())
        } else {
            debug!(payload = raw_payload, "scan payload matches no animal");
            Err(GateError::UnknownAnimal(raw_payload.to_string()))
        }
    }

    /// Validate the pen a gate reader reported.
    pub fn resolve_pen(&self, pen_id: &str) -> GateResult<String> {
        let conn = self.db.lock();
        if pen::pen_exists(&conn, pen_id)? {
            Ok(pen_id.to_string())
        } else {
            Err(GateError::UnknownPen(pen_id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Animal, Pen};

    fn resolver() -> IdentityResolver {
        let db = Database::open_in_memory().unwrap();
        {
            let conn = db.lock();
            animal::insert_animal(&conn, &Animal::new("KMB-007", "Kacang")).unwrap();
            pen::insert_pen(&conn, &Pen::new("KDG-1", "Kandang 1")).unwrap();
        }
        IdentityResolver::new(db)
    }

    #[test]
    fn test_exact_match_only() {
        let r = resolver();
        assert_eq!(r.resolve("KMB-007").unwrap(), "KMB-007");

        for payload in ["kmb-007", " KMB-007", "KMB-007\n", "KMB-00", ""] {
            assert!(
                matches!(r.resolve(payload), Err(GateError::UnknownAnimal(ref p)) if p == payload),
                "payload {:?} should not resolve",
                payload
            );
        }
    }

    #[test]
    fn test_resolve_pen() {
        let r = resolver();
        assert_eq!(r.resolve_pen("KDG-1").unwrap(), "KDG-1");
        assert!(matches!(r.resolve_pen("KDG-9"), Err(GateError::UnknownPen(_))));
    }
}
