use anyhow::{bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};

use chrono::Utc;
use livestock_gate::{
    import_registry, load_animals_csv, load_pens_csv, load_vaccines_csv, logging, Direction,
    GateConfig, GateSystem, Ledger, Location, TimeRange, VERSION,
};

const USAGE: &str = "Usage: livestock-gate [--config PATH] [--verbose] [--version] <command>

Commands:
  import <animals.csv> <pens.csv> [vaccines.csv]
                                      Register pens, vaccines and animals
  pens                                List pens with their occupancy
  scan <pen_id> <qr_payload>          Record a gate scan
  location <animal_id>                Show where an animal is
  history <animal_id>                 Show an animal's movements, newest first
  counts [from] [to]                  Entry/exit totals (RFC3339 bounds)
  correct <event_id> <entry|exit> <actor>
  remove <event_id> <actor>
  vaccinate <animal_id> <vaccine_id> <dose>
  vaccinations <animal_id>            Show an animal's vaccinations, newest first
  rebuild-cache                       Recompute cached pens from the ledger
  verify                              Check every animal's history alternates";

fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().skip(1).collect();

    let mut config_path: Option<PathBuf> = None;
    let mut verbose = false;
    while let Some(flag) = args.first().cloned() {
        match flag.as_str() {
            "--config" => {
                if args.len() < 2 {
                    bail!("--config needs a path\n\n{}", USAGE);
                }
                config_path = Some(PathBuf::from(args.remove(1)));
                args.remove(0);
            }
            "--verbose" | "-v" => {
                verbose = true;
                args.remove(0);
            }
            "--version" | "-V" => {
                println!("livestock-gate {}", VERSION);
                return Ok(());
            }
            _ => break,
        }
    }

    let config = GateConfig::load(config_path.as_deref())?;
    logging::init_logging(&config.log_filter, verbose)?;

    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    let system = GateSystem::open(&config)?;

    match (command.as_str(), rest) {
        ("import", [animals, pens]) => run_import(&system, Path::new(animals), Path::new(pens), None),
        ("import", [animals, pens, vaccines]) => run_import(
            &system,
            Path::new(animals),
            Path::new(pens),
            Some(Path::new(vaccines)),
        ),
        ("pens", []) => {
            let pens = system.pens()?;
            println!("🏠 {} pen(s)", pens.len());
            for pen in pens {
                let inside = system.query.occupancy(&pen.id)?;
                println!("  {:<12}  {:<20}  {} inside", pen.id, pen.name, inside.len());
            }
            Ok(())
        }
        ("scan", [pen_id, payload]) => {
            let receipt = system.engine.scan(pen_id, payload)?;
            println!(
                "✓ {}: animal {} at pen {} ({})",
                receipt.message,
                receipt.animal_id,
                receipt.pen_id,
                receipt.timestamp.to_rfc3339()
            );
            Ok(())
        }
        ("location", [animal_id]) => {
            match system.query.current_location(animal_id)? {
                Location::Inside(pen) => println!("🐐 {} is inside pen {}", animal_id, pen),
                Location::Outside => println!("🐐 {} is outside all pens", animal_id),
            }
            Ok(())
        }
        ("history", [animal_id]) => {
            let events = system.query.history_for(animal_id, Default::default())?;
            println!("📜 {} movement(s) for {}", events.len(), animal_id);
            for e in events {
                println!(
                    "  {}  {:<5}  pen {:<12}  {}",
                    e.timestamp.to_rfc3339(),
                    e.direction,
                    e.pen_id,
                    e.id
                );
            }
            Ok(())
        }
        ("counts", bounds) if bounds.len() <= 2 => {
            let range = TimeRange::parse_bounds(
                bounds.first().map(String::as_str),
                bounds.get(1).map(String::as_str),
            )
            .context("Invalid RFC3339 bound")?;
            let counts = system.query.counts(range)?;
            println!("📊 Entries: {}  Exits: {}", counts.entries, counts.exits);
            Ok(())
        }
        ("correct", [event_id, direction, actor]) => {
            let direction: Direction = direction.parse().map_err(anyhow::Error::msg)?;
            let event = system.ledger.correct(event_id, direction, actor)?;
            println!("✓ Event {} is now {}", event.id, event.direction);
            Ok(())
        }
        ("remove", [event_id, actor]) => {
            let event = system.ledger.remove(event_id, actor)?;
            println!("✓ Removed {} {} at pen {}", event.direction, event.id, event.pen_id);
            Ok(())
        }
        ("vaccinate", [animal_id, vaccine_id, dose]) => {
            let record = system.vaccinate(animal_id, vaccine_id, dose, Utc::now())?;
            match &record.movement_event_id {
                Some(event_id) => println!("💉 {} vaccinated (located by entry {})", animal_id, event_id),
                None => println!("💉 {} vaccinated outside all pens", animal_id),
            }
            Ok(())
        }
        ("vaccinations", [animal_id]) => {
            let records = system.vaccinations(animal_id)?;
            println!("💉 {} vaccination(s) for {}", records.len(), animal_id);
            for r in records {
                println!(
                    "  {}  {:<10}  {:<8}  {}",
                    r.vaccinated_at.to_rfc3339(),
                    r.vaccine_id,
                    r.dose,
                    r.movement_event_id.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        ("rebuild-cache", []) => {
            let changed = system.rebuild_location_cache()?;
            println!("✓ Location cache rebuilt: {} animal(s) changed", changed);
            Ok(())
        }
        ("verify", []) => {
            let broken = system.query.verify_ledger()?;
            if broken.is_empty() {
                println!("✅ Ledger consistent: every history alternates");
                Ok(())
            } else {
                for animal_id in &broken {
                    eprintln!("❌ Alternation broken for {}", animal_id);
                }
                bail!("{} animal(s) with inconsistent history", broken.len())
            }
        }
        _ => bail!("Unrecognized command\n\n{}", USAGE),
    }
}

fn run_import(
    system: &GateSystem,
    animals_csv: &Path,
    pens_csv: &Path,
    vaccines_csv: Option<&Path>,
) -> Result<()> {
    println!("🗄️  Registry import - CSV → SQLite");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let pens = load_pens_csv(pens_csv)?;
    let animals = load_animals_csv(animals_csv)?;
    let vaccines = match vaccines_csv {
        Some(path) => load_vaccines_csv(path)?,
        None => Vec::new(),
    };
    println!(
        "✓ Loaded {} pens, {} vaccines and {} animals from CSV",
        pens.len(),
        vaccines.len(),
        animals.len()
    );

    let conn = system.db.lock();
    let summary = import_registry(&conn, &pens, &vaccines, &animals)
        .context("Registry import failed")?;

    println!(
        "✓ Inserted: {} pens, {} vaccines, {} animals",
        summary.pens_inserted, summary.vaccines_inserted, summary.animals_inserted
    );
    println!("✓ Skipped duplicates: {}", summary.duplicates);

    Ok(())
}
