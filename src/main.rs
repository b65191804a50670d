use boxorg_core::InMemoryRowStore;
use boxorg_rust::demo::{run_demo, DemoReport};
use boxorg_rust::CONFIG;

fn print_report(report: &DemoReport) {
    println!("Ubicaciones creadas:");
    for path in &report.paths {
        println!("  {path}");
    }
    println!("Escaneo de etiqueta: {}", report.scanned_short_id);
    println!("Cajas sin ubicación tras borrar el garaje: {}",
             report.unassigned_after_location_delete);
    println!("Cascada: {}",
             serde_json::to_string(&report.cascade).unwrap_or_default());
}

fn main() {
    // Cargar variables de entorno desde .env si existe (antes de leer DATABASE_URL)
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = &*CONFIG;

    let result = if cfg!(feature = "pg_demo") && config.database.is_some() {
        match boxorg_persistence::build_dev_store_from_env() {
            Ok(store) => run_demo(&store, &config.organizer),
            Err(e) => {
                eprintln!("[main-core] pool error: {e}");
                std::process::exit(5);
            }
        }
    } else {
        run_demo(&InMemoryRowStore::new(), &config.organizer)
    };

    match result {
        Ok(report) => print_report(&report),
        Err(e) => {
            eprintln!("[main-core] demo abortada: {e}");
            std::process::exit(if e.http_status() >= 500 { 5 } else { 4 });
        }
    }
}
