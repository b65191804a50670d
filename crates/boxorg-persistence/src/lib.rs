//! boxorg-persistence
//!
//! Implementación Postgres (Diesel + r2d2) del almacén de filas que consumen
//! los servicios de `boxorg-core`, con la misma semántica que
//! `InMemoryRowStore`.
//!
//! Módulos:
//! - `pg`: pool, proveedor de conexiones, reintentos y `PgRowStore`.
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde .env.
//! - `schema`: tablas Diesel.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_dev_store_from_env, build_pool, ConnectionProvider, PgPool, PgRowStore, PoolProvider};
