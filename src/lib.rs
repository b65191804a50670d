//! boxorg-rust
//!
//! Punto de entrada de la aplicación:
//! - `config`: configuración global (`CONFIG`) leída de .env / entorno.
//! - `demo`: recorrido de ejemplo usado por el binario `main-core`.
//!
//! La lógica vive en los crates del workspace; aquí sólo se reexporta.

pub mod config;
pub mod demo;

pub use boxorg_core as core;
pub use boxorg_domain as domain;
pub use boxorg_persistence as persistence;
pub use config::{AppConfig, OrganizerConfig, CONFIG};
