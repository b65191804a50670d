//! Taxonomía de errores de los servicios.
//!
//! Cada variante se mapea 1:1 a un código HTTP (`ErrorKind::http_status`).
//! Los errores del almacén se registran con `log` y se reemplazan por
//! mensajes genéricos: el texto crudo del backend nunca llega al cliente.

use boxorg_domain::DomainError;
use log::error;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Paso del borrado en cascada de un workspace, en orden de ejecución.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStep {
    ReleaseQrCodes,
    DeleteBoxes,
    DeleteLocations,
    DeleteQrCodes,
    DeleteMemberships,
    DeleteWorkspace,
}

impl CascadeStep {
    pub const ORDER: [CascadeStep; 6] = [CascadeStep::ReleaseQrCodes,
                                         CascadeStep::DeleteBoxes,
                                         CascadeStep::DeleteLocations,
                                         CascadeStep::DeleteQrCodes,
                                         CascadeStep::DeleteMemberships,
                                         CascadeStep::DeleteWorkspace];

    pub fn as_str(&self) -> &'static str {
        match self {
            CascadeStep::ReleaseQrCodes => "release_qr_codes",
            CascadeStep::DeleteBoxes => "delete_boxes",
            CascadeStep::DeleteLocations => "delete_locations",
            CascadeStep::DeleteQrCodes => "delete_qr_codes",
            CascadeStep::DeleteMemberships => "delete_memberships",
            CascadeStep::DeleteWorkspace => "delete_workspace",
        }
    }
}

impl fmt::Display for CascadeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clase de error estable, expuesta en el cuerpo de la respuesta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParentNotFound,
    MaxDepthExceeded,
    SiblingConflict,
    CircularHierarchy,
    QrCodeNotFound,
    WorkspaceMismatch,
    QrCodeAlreadyAssigned,
    InvalidName,
    Validation,
    LocationNotFound,
    BoxNotFound,
    WorkspaceNotFound,
    NotWorkspaceOwner,
    CascadeAborted,
    Storage,
}

impl ErrorKind {
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::ParentNotFound
            | ErrorKind::QrCodeNotFound
            | ErrorKind::LocationNotFound
            | ErrorKind::BoxNotFound
            | ErrorKind::WorkspaceNotFound => 404,
            ErrorKind::MaxDepthExceeded
            | ErrorKind::CircularHierarchy
            | ErrorKind::InvalidName
            | ErrorKind::Validation => 400,
            ErrorKind::SiblingConflict | ErrorKind::QrCodeAlreadyAssigned => 409,
            ErrorKind::WorkspaceMismatch | ErrorKind::NotWorkspaceOwner => 403,
            ErrorKind::CascadeAborted | ErrorKind::Storage => 500,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum OrganizerError {
    #[error("parent location {0} not found")]
    ParentNotFound(Uuid),
    #[error("location depth {depth} exceeds the maximum of {max}")]
    MaxDepthExceeded { depth: usize, max: usize },
    #[error("a sibling location with path '{path}' already exists")]
    SiblingConflict { path: String },
    #[error("path '{candidate}' cannot be placed under '{parent}' (circular hierarchy)")]
    CircularHierarchy { candidate: String, parent: String },
    #[error("qr code {0} not found")]
    QrCodeNotFound(Uuid),
    #[error("cross-workspace reference rejected")]
    WorkspaceMismatch,
    #[error("qr code {qr_code_id} is already assigned to another box")]
    QrCodeAlreadyAssigned { qr_code_id: Uuid },
    #[error("name '{0}' does not produce a usable path segment")]
    InvalidName(String),
    #[error("invalid request: {0}")]
    Validation(#[from] DomainError),
    #[error("location {0} not found")]
    LocationNotFound(Uuid),
    #[error("box {0} not found")]
    BoxNotFound(Uuid),
    #[error("workspace {0} not found")]
    WorkspaceNotFound(Uuid),
    #[error("only the workspace owner can delete it")]
    NotWorkspaceOwner,
    #[error("workspace deletion aborted at step '{step}'; the workspace may need manual recovery")]
    CascadeAborted { step: CascadeStep },
    #[error("storage failure")]
    Storage,
}

impl OrganizerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrganizerError::ParentNotFound(_) => ErrorKind::ParentNotFound,
            OrganizerError::MaxDepthExceeded { .. } => ErrorKind::MaxDepthExceeded,
            OrganizerError::SiblingConflict { .. } => ErrorKind::SiblingConflict,
            OrganizerError::CircularHierarchy { .. } => ErrorKind::CircularHierarchy,
            OrganizerError::QrCodeNotFound(_) => ErrorKind::QrCodeNotFound,
            OrganizerError::WorkspaceMismatch => ErrorKind::WorkspaceMismatch,
            OrganizerError::QrCodeAlreadyAssigned { .. } => ErrorKind::QrCodeAlreadyAssigned,
            OrganizerError::InvalidName(_) => ErrorKind::InvalidName,
            OrganizerError::Validation(_) => ErrorKind::Validation,
            OrganizerError::LocationNotFound(_) => ErrorKind::LocationNotFound,
            OrganizerError::BoxNotFound(_) => ErrorKind::BoxNotFound,
            OrganizerError::WorkspaceNotFound(_) => ErrorKind::WorkspaceNotFound,
            OrganizerError::NotWorkspaceOwner => ErrorKind::NotWorkspaceOwner,
            OrganizerError::CascadeAborted { .. } => ErrorKind::CascadeAborted,
            OrganizerError::Storage => ErrorKind::Storage,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }

    /// Cuerpo de respuesta para la capa HTTP.
    pub fn to_api_error(&self) -> ApiError {
        ApiError { kind: self.kind(),
                   status: self.http_status(),
                   message: self.to_string() }
    }
}

impl From<StoreError> for OrganizerError {
    fn from(err: StoreError) -> Self {
        // El detalle queda en el log; el cliente sólo ve el mensaje genérico.
        error!("store error: {err}");
        OrganizerError::Storage
    }
}

/// Cuerpo de error serializable (`{kind, status, message}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
}
