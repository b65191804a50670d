//! Filas Diesel y su conversión a entidades de dominio.
use boxorg_domain::{Location, MemberRole, Membership, QrCode, QrStatus, StorageBox, Workspace};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::schema::{boxes, locations, qr_codes, workspace_members, workspaces};

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = workspaces)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct WorkspaceRow {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WorkspaceRow> for Workspace {
    fn from(row: WorkspaceRow) -> Self {
        Workspace { id: row.id,
                    name: row.name,
                    owner_id: row.owner_id,
                    created_at: row.created_at,
                    updated_at: row.updated_at }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = workspaces)]
pub struct NewWorkspaceRow<'a> {
    pub id: Uuid,
    pub name: &'a str,
    pub owner_id: Uuid,
}

/// Fila de `workspace_members`; `role` se guarda como texto.
#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = workspace_members)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MemberRow {
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MemberRow> for Membership {
    type Error = PersistenceError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        let role: MemberRole = row.role.parse().map_err(|e| PersistenceError::InvalidRow(format!("{e}")))?;
        Ok(Membership { workspace_id: row.workspace_id,
                        user_id: row.user_id,
                        role,
                        created_at: row.created_at })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = workspace_members)]
pub struct NewMemberRow<'a> {
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub role: &'a str,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = locations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LocationRow {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub path: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<LocationRow> for Location {
    fn from(row: LocationRow) -> Self {
        Location { id: row.id,
                   workspace_id: row.workspace_id,
                   name: row.name,
                   path: row.path,
                   is_deleted: row.is_deleted,
                   created_at: row.created_at,
                   updated_at: row.updated_at }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = locations)]
pub struct NewLocationRow<'a> {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: &'a str,
    pub path: &'a str,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = boxes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BoxRow {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub location_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BoxRow> for StorageBox {
    fn from(row: BoxRow) -> Self {
        StorageBox { id: row.id,
                     workspace_id: row.workspace_id,
                     location_id: row.location_id,
                     name: row.name,
                     description: row.description,
                     tags: row.tags,
                     created_at: row.created_at,
                     updated_at: row.updated_at }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = boxes)]
pub struct NewBoxRow<'a> {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub location_id: Option<Uuid>,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub tags: Vec<String>,
}

/// Cambios parciales: `None` omite la columna, `Some(None)` la pone a NULL.
#[derive(AsChangeset, Debug)]
#[diesel(table_name = boxes)]
pub struct BoxChangeset {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub location_id: Option<Option<Uuid>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = qr_codes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct QrRow {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub short_id: String,
    pub box_id: Option<Uuid>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<QrRow> for QrCode {
    type Error = PersistenceError;

    fn try_from(row: QrRow) -> Result<Self, Self::Error> {
        let status: QrStatus = row.status.parse().map_err(|e| PersistenceError::InvalidRow(format!("{e}")))?;
        Ok(QrCode { id: row.id,
                    workspace_id: row.workspace_id,
                    short_id: row.short_id,
                    box_id: row.box_id,
                    status,
                    created_at: row.created_at })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = qr_codes)]
pub struct NewQrRow<'a> {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub short_id: &'a str,
    pub status: &'static str,
}
