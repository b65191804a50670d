// storage_box.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caja física. La asociación con un código QR se guarda en la fila del
/// código (`qr_codes.box_id`), nunca aquí.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageBox {
    pub id: Uuid,
    pub workspace_id: Uuid,
    /// `None` significa "Sin asignar".
    pub location_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StorageBox {
    pub fn is_unassigned(&self) -> bool {
        self.location_id.is_none()
    }

    /// DTO con el `qr_code_id` resuelto desde la tabla de códigos.
    pub fn to_dto(&self, qr_code_id: Option<Uuid>) -> BoxDto {
        BoxDto { id: self.id,
                 workspace_id: self.workspace_id,
                 location_id: self.location_id,
                 qr_code_id,
                 name: self.name.clone(),
                 description: self.description.clone(),
                 tags: self.tags.clone(),
                 created_at: self.created_at,
                 updated_at: self.updated_at }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxDto {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub location_id: Option<Uuid>,
    pub qr_code_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
