// Entity Models - the bookkeeping registry around the gate ledger
//
// Each entity has:
// - Stable identity (the id printed on labels / QR codes)
// - Plain values that CRUD screens edit
// - SQLite persistence as free functions over a &Connection

pub mod animal;
pub mod pen;
pub mod vaccine;

pub use animal::Animal;
pub use pen::Pen;
pub use vaccine::{VaccinationRecord, Vaccine};
