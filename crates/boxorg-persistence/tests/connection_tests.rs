//! Pruebas básicas de configuración y pool (requiere DATABASE_URL válido en entorno).

use boxorg_persistence::{config::DbConfig, pg::build_pool};

#[test]
fn create_pool_from_env() {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("DATABASE_URL no definido: omitiendo test");
        return;
    }
    let cfg = DbConfig::from_env().expect("config");
    let pool = build_pool(&cfg.url, cfg.min_connections, cfg.max_connections).expect("pool");
    let mut conn = pool.get().expect("conn");
    use diesel::connection::SimpleConnection;
    conn.batch_execute("SELECT 1;").expect("select 1");
}

#[test]
fn migrations_create_organizer_tables() {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("DATABASE_URL no definido: omitiendo test");
        return;
    }
    let cfg = DbConfig::from_env().expect("config");
    let pool = build_pool(&cfg.url, 1, 1).expect("pool");
    let mut conn = pool.get().expect("conn");
    use diesel::connection::SimpleConnection;
    for table in ["workspaces", "workspace_members", "locations", "boxes", "qr_codes"] {
        conn.batch_execute(&format!("SELECT 1 FROM {table} LIMIT 1;"))
            .unwrap_or_else(|e| panic!("tabla {table} ausente: {e}"));
    }
}
