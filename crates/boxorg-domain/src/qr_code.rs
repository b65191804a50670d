// qr_code.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::DomainError;

/// Estado del ciclo de vida de un código QR.
///
/// Invariante: `Assigned` si y sólo si `box_id` no es `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QrStatus {
    Generated,
    Assigned,
}

impl QrStatus {
    /// Valor estable usado en la columna `status`.
    pub fn as_str(&self) -> &'static str {
        match self {
            QrStatus::Generated => "generated",
            QrStatus::Assigned => "assigned",
        }
    }
}

impl fmt::Display for QrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QrStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generated" => Ok(QrStatus::Generated),
            "assigned" => Ok(QrStatus::Assigned),
            other => Err(DomainError::Validation(format!("estado de QR desconocido: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrCode {
    pub id: Uuid,
    pub workspace_id: Uuid,
    /// Token público que se imprime en la etiqueta.
    pub short_id: String,
    pub box_id: Option<Uuid>,
    pub status: QrStatus,
    pub created_at: DateTime<Utc>,
}

impl QrCode {
    /// Comprueba el invariante estado/box_id.
    pub fn is_consistent(&self) -> bool {
        matches!((self.status, self.box_id),
                 (QrStatus::Generated, None) | (QrStatus::Assigned, Some(_)))
    }

    pub fn to_dto(&self) -> QrCodeDto {
        QrCodeDto { id: self.id,
                    short_id: self.short_id.clone(),
                    box_id: self.box_id,
                    status: self.status,
                    workspace_id: self.workspace_id }
    }
}

/// Representación pública (`GET qr-codes`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrCodeDto {
    pub id: Uuid,
    pub short_id: String,
    pub box_id: Option<Uuid>,
    pub status: QrStatus,
    pub workspace_id: Uuid,
}
