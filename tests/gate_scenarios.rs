// End-to-end gate scenarios against a real SQLite file.

use std::sync::{Arc, Barrier};
use std::thread;

use livestock_gate::entities::{animal, pen};
use livestock_gate::{
    Animal, Database, Direction, GateConfig, GateError, GateSystem, Ledger, Location, Pen,
    TimeRange,
};

fn seed(db: &Database) {
    let conn = db.lock();
    for (id, name) in [("pen1", "Kandang Utara"), ("pen2", "Kandang Selatan")] {
        pen::insert_pen(&conn, &Pen::new(id, name)).unwrap();
    }
    for id in ["A", "B", "C"] {
        animal::insert_animal(&conn, &Animal::new(id, "Boer")).unwrap();
    }
}

fn system_on(path: &std::path::Path) -> GateSystem {
    let config = GateConfig {
        database_path: path.to_path_buf(),
        ..GateConfig::default()
    };
    GateSystem::open(&config).unwrap()
}

fn in_memory_system() -> GateSystem {
    let db = Database::open_in_memory().unwrap();
    seed(&db);
    GateSystem::from_database(db, &GateConfig::default())
}

fn assert_alternates(system: &GateSystem, animal_id: &str) {
    let mut events = system.query.history_for(animal_id, TimeRange::all()).unwrap();
    events.reverse();
    if let Some(first) = events.first() {
        assert_eq!(first.direction, Direction::Entry, "history must open with an Entry");
    }
    for pair in events.windows(2) {
        assert_ne!(
            pair[0].direction, pair[1].direction,
            "two consecutive {} events for {}",
            pair[0].direction, animal_id
        );
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[test]
fn scenario_a_first_scan_enters() {
    let system = in_memory_system();

    let event = system.engine.record_scan("A", "pen1").unwrap();
    assert_eq!(event.direction, Direction::Entry);
    assert_eq!(event.pen_id, "pen1");
    assert_eq!(
        system.query.current_location("A").unwrap(),
        Location::Inside("pen1".to_string())
    );
}

#[test]
fn scenario_b_second_scan_exits_at_scanning_pen() {
    let system = in_memory_system();
    system.engine.record_scan("A", "pen1").unwrap();

    let event = system.engine.record_scan("A", "pen2").unwrap();
    assert_eq!(event.direction, Direction::Exit);
    assert_eq!(event.pen_id, "pen2");
    assert_eq!(system.query.current_location("A").unwrap(), Location::Outside);
}

#[test]
fn scenario_c_unregistered_animal_is_rejected() {
    let system = in_memory_system();

    let err = system.engine.scan("pen1", "Z-UNKNOWN").unwrap_err();
    assert!(matches!(err, GateError::UnknownAnimal(ref id) if id == "Z-UNKNOWN"));
    assert!(system.query.gate_history(TimeRange::all(), None).unwrap().is_empty());
}

#[test]
fn scenario_d_concurrent_scans_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gate.db");

    // two independent connections, each with its own lock arena, as two
    // server processes on one database file would have
    let first = Arc::new(system_on(&path));
    seed(&first.db);
    let second = Arc::new(system_on(&path));

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [first.clone(), second.clone()]
        .into_iter()
        .map(|system| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                system.engine.record_scan("A", "pen1")
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let entries = results
        .iter()
        .filter(|r| matches!(r, Ok(e) if e.direction == Direction::Entry))
        .count();
    assert_eq!(entries, 1, "exactly one scan may enter from Outside");

    for result in &results {
        match result {
            Ok(_) | Err(GateError::ConcurrentScanConflict(_)) => {}
            Err(other) => panic!("unexpected scan failure: {}", other),
        }
    }

    let recorded = first.query.history_for("A", TimeRange::all()).unwrap();
    assert_eq!(recorded.len(), results.iter().filter(|r| r.is_ok()).count());
    assert_alternates(&first, "A");
}

#[test]
fn scenario_d_many_threads_one_process() {
    let system = Arc::new(in_memory_system());
    let scans_per_thread = 10;
    let threads = 4;

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let system = system.clone();
            thread::spawn(move || {
                let pen_id = if i % 2 == 0 { "pen1" } else { "pen2" };
                for _ in 0..scans_per_thread {
                    system.engine.record_scan("B", pen_id).unwrap();
                    system.engine.record_scan("C", pen_id).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    for animal_id in ["B", "C"] {
        let history = system.query.history_for(animal_id, TimeRange::all()).unwrap();
        assert_eq!(history.len(), threads * scans_per_thread);
        assert_alternates(&system, animal_id);
        // even number of scans leaves the animal outside
        assert_eq!(system.query.current_location(animal_id).unwrap(), Location::Outside);
    }
    assert!(system.query.verify_ledger().unwrap().is_empty());
}

#[test]
fn scenario_e_correction_between_entries_rejected() {
    let system = in_memory_system();
    let e1 = system.engine.record_scan("A", "pen1").unwrap();
    let x = system.engine.record_scan("A", "pen1").unwrap();
    let e2 = system.engine.record_scan("A", "pen2").unwrap();
    assert_eq!(
        (e1.direction, x.direction, e2.direction),
        (Direction::Entry, Direction::Exit, Direction::Entry)
    );

    let before = system.query.history_for("A", TimeRange::all()).unwrap();
    let err = system.ledger.correct(&x.id, Direction::Entry, "admin").unwrap_err();
    assert!(matches!(err, GateError::AlternationViolation { .. }));
    assert_eq!(system.query.history_for("A", TimeRange::all()).unwrap(), before);
}

#[test]
fn opening_entry_cannot_be_rewritten_as_exit() {
    let system = in_memory_system();
    let entry = system.engine.record_scan("A", "pen1").unwrap();
    let exit = system.engine.record_scan("A", "pen1").unwrap();

    let err = system.ledger.correct(&entry.id, Direction::Exit, "admin").unwrap_err();
    assert!(matches!(err, GateError::AlternationViolation { .. }));

    // dropping the opening Entry would leave the history starting with Exit
    let err = system.ledger.remove(&entry.id, "admin").unwrap_err();
    assert!(matches!(err, GateError::AlternationViolation { .. }));

    // tail first, then the lone Entry, is fine
    system.ledger.remove(&exit.id, "admin").unwrap();
    system.ledger.remove(&entry.id, "admin").unwrap();
    assert_eq!(system.query.current_location("A").unwrap(), Location::Outside);
    assert!(system.query.verify_ledger().unwrap().is_empty());
}

#[test]
fn toggling_and_replay_agree() {
    let system = in_memory_system();
    let mut expected = Location::Outside;

    for (i, pen_id) in ["pen1", "pen2", "pen2", "pen1", "pen1", "pen2", "pen1"].iter().enumerate() {
        let event = system.engine.record_scan("C", pen_id).unwrap();
        expected = match expected {
            Location::Outside => Location::Inside(pen_id.to_string()),
            Location::Inside(_) => Location::Outside,
        };
        assert_eq!(event.resulting_location(), expected, "scan #{}", i + 1);

        let live = system.query.current_location("C").unwrap();
        let history = system.query.history_for("C", TimeRange::all()).unwrap();
        assert_eq!(live, expected);
        assert_eq!(Location::replay(&history), live);
    }
}

#[test]
fn direction_ignores_other_animals() {
    let system = in_memory_system();
    system.engine.record_scan("A", "pen1").unwrap();

    // whatever B does, A's next direction only depends on A's ledger
    for _ in 0..3 {
        system.engine.record_scan("B", "pen2").unwrap();
    }
    assert_eq!(
        system.engine.record_scan("A", "pen1").unwrap().direction,
        Direction::Exit
    );
}

#[test]
fn cached_pen_follows_admin_edits() {
    let system = in_memory_system();
    system.engine.record_scan("A", "pen1").unwrap();
    let exit = system.engine.record_scan("A", "pen2").unwrap();

    system.ledger.remove(&exit.id, "admin").unwrap();

    let conn = system.db.lock();
    let cached = animal::get_animal(&conn, "A").unwrap().unwrap().current_pen_id;
    assert_eq!(cached.as_deref(), Some("pen1"));
}
