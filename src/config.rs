//! Configuración central de la aplicación.
//! Carga variables de entorno (.env) y expone una estructura inmutable (`CONFIG`).
use std::env;

use boxorg_core::short_id::DEFAULT_SHORT_ID_LEN;
use boxorg_domain::dto::DEFAULT_QR_BATCH_MAX;
use boxorg_persistence::config::{DEFAULT_MAX_CONNECTIONS, DEFAULT_MIN_CONNECTIONS};
use once_cell::sync::Lazy;

/// Configuración global de la aplicación.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Ausente si no hay `DATABASE_URL`; en ese caso se trabaja en memoria.
    pub database: Option<DatabaseConfig>,
    pub organizer: OrganizerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

/// Límites de negocio ajustables por despliegue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrganizerConfig {
    /// Máximo de códigos QR por lote (`BOXORG_QR_BATCH_MAX`).
    pub qr_batch_max: u32,
    /// Longitud de los short ids (`BOXORG_SHORT_ID_LEN`).
    pub short_id_len: usize,
}

impl Default for OrganizerConfig {
    fn default() -> Self {
        Self { qr_batch_max: DEFAULT_QR_BATCH_MAX,
               short_id_len: DEFAULT_SHORT_ID_LEN }
    }
}

fn parsed_or<T: std::str::FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

impl AppConfig {
    /// Construye la configuración a partir de una función de consulta de
    /// variables. Valores no numéricos o nulos caen al valor por defecto.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let database = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()).map(|url| DatabaseConfig {
            url,
            min_connections: parsed_or(&lookup, "DATABASE_MIN_CONNECTIONS", DEFAULT_MIN_CONNECTIONS),
            max_connections: parsed_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS),
        });
        let defaults = OrganizerConfig::default();
        let qr_batch_max = parsed_or(&lookup, "BOXORG_QR_BATCH_MAX", defaults.qr_batch_max);
        let short_id_len = parsed_or(&lookup, "BOXORG_SHORT_ID_LEN", defaults.short_id_len);
        Self { database,
               organizer: OrganizerConfig { qr_batch_max: if qr_batch_max == 0 { defaults.qr_batch_max } else { qr_batch_max },
                                            short_id_len: if short_id_len == 0 { defaults.short_id_len } else { short_id_len } } }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }
}

/// Instancia global perezosa de configuración, evaluada una sola vez.
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    boxorg_persistence::init_dotenv();
    AppConfig::from_env()
});
