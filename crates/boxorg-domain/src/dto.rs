//! Contratos de petición/respuesta expuestos a la capa HTTP.
//!
//! La capa HTTP (fuera de este workspace) deserializa estos tipos, llama a
//! `validate` y luego delega en los servicios de `boxorg-core`.
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::{DomainError, QrStatus};

/// Límite por defecto de códigos por lote.
pub const DEFAULT_QR_BATCH_MAX: u32 = 100;
const MAX_NAME_LEN: usize = 255;

/// Contexto de identidad resuelto por el middleware de sesión.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub user_id: Uuid,
    pub workspace_id: Uuid,
}

// Distingue "campo ausente" (None) de "campo en null" (Some(None)).
fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where T: Deserialize<'de>,
          D: Deserializer<'de>
{
    T::deserialize(deserializer).map(Some)
}

fn validate_name(name: &str) -> Result<(), DomainError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::MissingField("name"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::Validation(format!("el nombre supera {MAX_NAME_LEN} caracteres")));
    }
    Ok(())
}

fn clean_tags(tags: &[String]) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !cleaned.iter().any(|c| c == tag) {
            cleaned.push(tag.to_string());
        }
    }
    cleaned
}

/// `GET locations?workspace_id&parent_id?`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListLocationsQuery {
    pub workspace_id: Uuid,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

/// `POST locations`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLocationRequest {
    pub workspace_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

impl CreateLocationRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        validate_name(&self.name)
    }
}

/// `POST boxes`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBoxRequest {
    pub workspace_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub location_id: Option<Uuid>,
    #[serde(default)]
    pub qr_code_id: Option<Uuid>,
}

impl CreateBoxRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        validate_name(&self.name)
    }

    /// Tags sin espacios sobrantes, vacíos ni duplicados (orden estable).
    pub fn normalized_tags(&self) -> Vec<String> {
        clean_tags(&self.tags)
    }
}

/// `PATCH boxes/{id}`: todos los campos son opcionales.
///
/// `location_id`, `description` y `qr_code_id` son tri-estado: ausente deja
/// el valor como está, `null` lo limpia y un valor lo reemplaza.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBoxRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub location_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub qr_code_id: Option<Option<Uuid>>,
}

impl UpdateBoxRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        Ok(())
    }

    pub fn normalized_tags(&self) -> Option<Vec<String>> {
        self.tags.as_deref().map(clean_tags)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
        && self.description.is_none()
        && self.tags.is_none()
        && self.location_id.is_none()
        && self.qr_code_id.is_none()
    }
}

/// Petición de generación de un lote de códigos QR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateQrCodesRequest {
    pub workspace_id: Uuid,
    pub quantity: u32,
}

impl GenerateQrCodesRequest {
    /// Los límites se validan aquí; el gestor de ciclo de vida no los revisa.
    pub fn validate(&self, max: u32) -> Result<(), DomainError> {
        if self.quantity == 0 || self.quantity > max {
            return Err(DomainError::Validation(format!("quantity debe estar entre 1 y {max}")));
        }
        Ok(())
    }
}

/// `GET qr-codes?workspace_id&status?`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQrCodesQuery {
    pub workspace_id: Uuid,
    #[serde(default)]
    pub status: Option<QrStatus>,
}

/// Resultado de `DELETE locations/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationDeletion {
    pub location_id: Uuid,
    /// La ubicación pedida más sus descendientes (borrado lógico en cascada).
    pub deleted_location_ids: Vec<Uuid>,
    /// Cantidad de cajas que pasaron a "Sin asignar".
    pub unassigned_boxes: usize,
}

/// Resultado de `DELETE workspaces/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeSummary {
    pub workspace_id: Uuid,
    pub qr_codes_released: usize,
    pub boxes_deleted: usize,
    pub locations_deleted: usize,
    pub qr_codes_deleted: usize,
    pub memberships_deleted: usize,
}
