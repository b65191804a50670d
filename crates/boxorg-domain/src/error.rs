use thiserror::Error;

/// Errores de validación de peticiones (antes de tocar el almacenamiento).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DomainError {
    #[error("Validación fallida: {0}")]
    Validation(String),
    #[error("Campo requerido: {0}")]
    MissingField(&'static str),
}
