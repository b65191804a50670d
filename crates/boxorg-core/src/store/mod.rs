//! Contrato del almacén de filas.
//!
//! El almacén sólo ofrece lecturas/escrituras filtradas por igualdad y una
//! restricción de unicidad por tabla; no hay operadores de árbol ni de
//! prefijo. Por eso toda la lógica jerárquica vive en los servicios.
//!
//! Hay dos implementaciones con paridad de contrato:
//! - `InMemoryRowStore` (este crate): tests y demo.
//! - `PgRowStore` (`boxorg-persistence`): Postgres vía Diesel.
use boxorg_domain::{Location, Membership, QrCode, QrStatus, StorageBox, Workspace};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub use memory::InMemoryRowStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Violación de la restricción de unicidad de la tabla.
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    /// Una fila referenciada no existe o todavía es referenciada.
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("row not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store failure: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Datos para insertar una ubicación (`is_deleted = false`).
#[derive(Debug, Clone)]
pub struct NewLocation {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct NewBox {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub location_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// Cambios parciales de una caja; `None` deja el campo intacto.
#[derive(Debug, Clone, Default)]
pub struct BoxChanges {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub location_id: Option<Option<Uuid>>,
}

/// Código recién generado (siempre `generated`, sin caja).
#[derive(Debug, Clone)]
pub struct NewQrCode {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub short_id: String,
}

#[derive(Debug, Clone)]
pub struct NewWorkspace {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
}

pub trait WorkspaceStore {
    fn get_workspace(&self, id: Uuid) -> StoreResult<Option<Workspace>>;
    fn insert_workspace(&self, row: NewWorkspace) -> StoreResult<Workspace>;
    fn delete_workspace(&self, id: Uuid) -> StoreResult<usize>;
}

pub trait MembershipStore {
    fn list_members(&self, workspace_id: Uuid) -> StoreResult<Vec<Membership>>;
    fn list_memberships_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Membership>>;
    fn insert_member(&self, row: Membership) -> StoreResult<Membership>;
    fn delete_members_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize>;
}

pub trait LocationStore {
    /// Todas las ubicaciones del workspace en una sola consulta.
    fn list_locations(&self, workspace_id: Uuid, include_deleted: bool) -> StoreResult<Vec<Location>>;
    fn get_location(&self, id: Uuid) -> StoreResult<Option<Location>>;
    /// Falla con `UniqueViolation` si ya existe una fila no borrada con el
    /// mismo `(workspace_id, path)`.
    fn insert_location(&self, row: NewLocation) -> StoreResult<Location>;
    /// Borrado lógico; devuelve cuántas filas cambiaron.
    fn mark_locations_deleted(&self, workspace_id: Uuid, ids: &[Uuid]) -> StoreResult<usize>;
    /// Borrado físico de todas las filas (borradas o no) del workspace.
    fn delete_locations_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize>;
}

pub trait BoxStore {
    fn list_boxes(&self, workspace_id: Uuid) -> StoreResult<Vec<StorageBox>>;
    fn get_box(&self, id: Uuid) -> StoreResult<Option<StorageBox>>;
    fn insert_box(&self, row: NewBox) -> StoreResult<StorageBox>;
    fn update_box(&self, id: Uuid, changes: BoxChanges) -> StoreResult<StorageBox>;
    /// `location_id = NULL` para todas las cajas en esas ubicaciones.
    fn unassign_boxes(&self, workspace_id: Uuid, location_ids: &[Uuid]) -> StoreResult<usize>;
    fn delete_box(&self, id: Uuid) -> StoreResult<usize>;
    fn delete_boxes_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize>;
}

pub trait QrCodeStore {
    fn list_qr_codes(&self, workspace_id: Uuid, status: Option<QrStatus>) -> StoreResult<Vec<QrCode>>;
    fn get_qr_code(&self, id: Uuid) -> StoreResult<Option<QrCode>>;
    fn find_qr_code_by_short_id(&self, short_id: &str) -> StoreResult<Option<QrCode>>;
    fn find_qr_code_by_box(&self, box_id: Uuid) -> StoreResult<Option<QrCode>>;
    /// Inserta el lote completo o nada. `UniqueViolation` ante un `short_id`
    /// repetido.
    fn insert_qr_codes(&self, rows: &[NewQrCode]) -> StoreResult<Vec<QrCode>>;
    /// Fija `box_id` y deriva `status` (`assigned` si hay caja).
    fn set_qr_code_box(&self, id: Uuid, box_id: Option<Uuid>) -> StoreResult<QrCode>;
    /// Devuelve a `generated` todos los códigos asignados del workspace.
    fn release_qr_codes_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize>;
    fn delete_qr_codes_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize>;
}

/// Almacén completo consumido por los servicios.
pub trait RowStore: WorkspaceStore + MembershipStore + LocationStore + BoxStore + QrCodeStore {
    /// Ejecuta `f` de forma atómica: si devuelve `Err`, ninguna escritura hecha
    /// dentro de `f` queda visible. Las llamadas anidadas se aplanan en la
    /// transacción externa.
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
        where F: FnOnce() -> Result<T, E>,
              E: From<StoreError>;
}
