//! Almacén en memoria con paridad de contrato respecto a Postgres.
//!
//! Reproduce las restricciones que el esquema SQL impone:
//! - unicidad de `(workspace_id, path)` entre ubicaciones no borradas,
//! - unicidad global de `short_id` y de `box_id` en `qr_codes`,
//! - claves foráneas sin acción (`NO ACTION`): no se puede borrar una fila
//!   que aún es referenciada.
//!
//! Las transacciones guardan una copia completa de las tablas, por hilo, y
//! la restauran si el cierre devuelve `Err` o entra en pánico. Mientras un
//! hilo tiene una transacción abierta, las operaciones de los demás hilos
//! esperan a que termine (bloqueo reentrante a nivel de almacén).
use std::collections::HashMap;
use std::sync::{Condvar, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, ThreadId};

use boxorg_domain::{Location, Membership, QrCode, QrStatus, StorageBox, Workspace};
use chrono::Utc;
use indexmap::IndexMap;
use log::debug;
use uuid::Uuid;

use super::{BoxChanges, BoxStore, LocationStore, MembershipStore, NewBox, NewLocation, NewQrCode, NewWorkspace,
            QrCodeStore, RowStore, StoreError, StoreResult, WorkspaceStore};

#[derive(Debug, Clone, Default)]
struct Tables {
    workspaces: IndexMap<Uuid, Workspace>,
    members: Vec<Membership>,
    locations: IndexMap<Uuid, Location>,
    boxes: IndexMap<Uuid, StorageBox>,
    qr_codes: IndexMap<Uuid, QrCode>,
}

#[derive(Debug, Default)]
struct GateState {
    owner: Option<ThreadId>,
    depth: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryRowStore {
    tables: RwLock<Tables>,
    // Copia tomada al abrir la transacción externa de cada hilo.
    snapshots: Mutex<HashMap<ThreadId, Tables>>,
    gate: Mutex<GateState>,
    gate_free: Condvar,
    fail_on: Mutex<Option<String>>,
}

/// Turno sobre el almacén; se libera al soltarlo.
struct Gate<'a> {
    store: &'a InMemoryRowStore,
}

impl Drop for Gate<'_> {
    fn drop(&mut self) {
        let mut state = self.store.gate.lock().unwrap_or_else(PoisonError::into_inner);
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            self.store.gate_free.notify_all();
        }
    }
}

/// Restaura la copia del hilo si el cierre de la transacción entra en pánico.
struct RollbackOnUnwind<'a> {
    store: &'a InMemoryRowStore,
    thread: ThreadId,
}

impl Drop for RollbackOnUnwind<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.store.restore(self.thread);
        }
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("in-memory store lock poisoned".into())
}

impl InMemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hace fallar la próxima llamada a la operación `op` (nombre del método
    /// del trait, p.ej. `"delete_locations_by_workspace"`). Pensado para
    /// ejercitar los caminos de rollback en tests.
    pub fn fail_on(&self, op: &str) {
        if let Ok(mut slot) = self.fail_on.lock() {
            *slot = Some(op.to_string());
        }
    }

    /// Espera hasta que ningún otro hilo tenga el almacén. Reentrante para
    /// el hilo que ya lo tiene.
    fn gate(&self) -> StoreResult<Gate<'_>> {
        let me = thread::current().id();
        let mut state = self.gate.lock().map_err(|_| poisoned())?;
        while matches!(state.owner, Some(owner) if owner != me) {
            state = self.gate_free.wait(state).map_err(|_| poisoned())?;
        }
        state.owner = Some(me);
        state.depth += 1;
        Ok(Gate { store: self })
    }

    /// Punto de entrada de cada operación: toma el turno y dispara el fallo
    /// inyectado para `op`, si lo hay.
    fn enter(&self, op: &str) -> StoreResult<Gate<'_>> {
        let gate = self.gate()?;
        let mut slot = self.fail_on.lock().map_err(|_| poisoned())?;
        if slot.as_deref() == Some(op) {
            *slot = None;
            return Err(StoreError::Backend(format!("injected failure on {op}")));
        }
        Ok(gate)
    }

    fn restore(&self, thread: ThreadId) {
        let saved = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner).remove(&thread);
        if let Some(saved) = saved {
            debug!("in-memory transaction rollback");
            *self.tables.write().unwrap_or_else(PoisonError::into_inner) = saved;
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| poisoned())
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| poisoned())
    }

    fn require_workspace(tables: &Tables, workspace_id: Uuid) -> StoreResult<()> {
        if tables.workspaces.contains_key(&workspace_id) {
            Ok(())
        } else {
            Err(StoreError::ForeignKeyViolation(format!("workspace {workspace_id} does not exist")))
        }
    }

    fn require_location(tables: &Tables, location_id: Option<Uuid>) -> StoreResult<()> {
        match location_id {
            Some(id) if !tables.locations.contains_key(&id) => {
                Err(StoreError::ForeignKeyViolation(format!("location {id} does not exist")))
            }
            _ => Ok(()),
        }
    }
}

impl WorkspaceStore for InMemoryRowStore {
    fn get_workspace(&self, id: Uuid) -> StoreResult<Option<Workspace>> {
        let _gate = self.enter("get_workspace")?;
        Ok(self.read()?.workspaces.get(&id).cloned())
    }

    fn insert_workspace(&self, row: NewWorkspace) -> StoreResult<Workspace> {
        let _gate = self.enter("insert_workspace")?;
        let mut tables = self.write()?;
        if tables.workspaces.contains_key(&row.id) {
            return Err(StoreError::UniqueViolation(format!("workspace {} already exists", row.id)));
        }
        let now = Utc::now();
        let workspace = Workspace { id: row.id,
                                    name: row.name,
                                    owner_id: row.owner_id,
                                    created_at: now,
                                    updated_at: now };
        tables.workspaces.insert(workspace.id, workspace.clone());
        Ok(workspace)
    }

    fn delete_workspace(&self, id: Uuid) -> StoreResult<usize> {
        let _gate = self.enter("delete_workspace")?;
        let mut tables = self.write()?;
        let referenced = tables.members.iter().any(|m| m.workspace_id == id)
                         || tables.locations.values().any(|l| l.workspace_id == id)
                         || tables.boxes.values().any(|b| b.workspace_id == id)
                         || tables.qr_codes.values().any(|q| q.workspace_id == id);
        if referenced {
            return Err(StoreError::ForeignKeyViolation(format!("workspace {id} still owns rows")));
        }
        Ok(tables.workspaces.shift_remove(&id).map_or(0, |_| 1))
    }
}

impl MembershipStore for InMemoryRowStore {
    fn list_members(&self, workspace_id: Uuid) -> StoreResult<Vec<Membership>> {
        let _gate = self.enter("list_members")?;
        Ok(self.read()?.members.iter().filter(|m| m.workspace_id == workspace_id).cloned().collect())
    }

    fn list_memberships_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Membership>> {
        let _gate = self.enter("list_memberships_for_user")?;
        Ok(self.read()?.members.iter().filter(|m| m.user_id == user_id).cloned().collect())
    }

    fn insert_member(&self, row: Membership) -> StoreResult<Membership> {
        let _gate = self.enter("insert_member")?;
        let mut tables = self.write()?;
        Self::require_workspace(&tables, row.workspace_id)?;
        if tables.members.iter().any(|m| m.workspace_id == row.workspace_id && m.user_id == row.user_id) {
            return Err(StoreError::UniqueViolation(format!("user {} is already a member", row.user_id)));
        }
        tables.members.push(row.clone());
        Ok(row)
    }

    fn delete_members_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize> {
        let _gate = self.enter("delete_members_by_workspace")?;
        let mut tables = self.write()?;
        let before = tables.members.len();
        tables.members.retain(|m| m.workspace_id != workspace_id);
        Ok(before - tables.members.len())
    }
}

impl LocationStore for InMemoryRowStore {
    fn list_locations(&self, workspace_id: Uuid, include_deleted: bool) -> StoreResult<Vec<Location>> {
        let _gate = self.enter("list_locations")?;
        Ok(self.read()?
               .locations
               .values()
               .filter(|l| l.workspace_id == workspace_id && (include_deleted || !l.is_deleted))
               .cloned()
               .collect())
    }

    fn get_location(&self, id: Uuid) -> StoreResult<Option<Location>> {
        let _gate = self.enter("get_location")?;
        Ok(self.read()?.locations.get(&id).cloned())
    }

    fn insert_location(&self, row: NewLocation) -> StoreResult<Location> {
        let _gate = self.enter("insert_location")?;
        let mut tables = self.write()?;
        Self::require_workspace(&tables, row.workspace_id)?;
        let taken = tables.locations
                          .values()
                          .any(|l| l.workspace_id == row.workspace_id && !l.is_deleted && l.path == row.path);
        if taken {
            return Err(StoreError::UniqueViolation(format!("locations(workspace_id, path)=({}, {})",
                                                           row.workspace_id, row.path)));
        }
        let now = Utc::now();
        let location = Location { id: row.id,
                                  workspace_id: row.workspace_id,
                                  name: row.name,
                                  path: row.path,
                                  is_deleted: false,
                                  created_at: now,
                                  updated_at: now };
        tables.locations.insert(location.id, location.clone());
        Ok(location)
    }

    fn mark_locations_deleted(&self, workspace_id: Uuid, ids: &[Uuid]) -> StoreResult<usize> {
        let _gate = self.enter("mark_locations_deleted")?;
        let mut tables = self.write()?;
        let now = Utc::now();
        let mut changed = 0;
        for location in tables.locations.values_mut() {
            if location.workspace_id == workspace_id && !location.is_deleted && ids.contains(&location.id) {
                location.is_deleted = true;
                location.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn delete_locations_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize> {
        let _gate = self.enter("delete_locations_by_workspace")?;
        let mut tables = self.write()?;
        let referenced = tables.boxes.values().any(|b| {
                                                   b.location_id
                                                    .and_then(|id| tables.locations.get(&id))
                                                    .is_some_and(|l| l.workspace_id == workspace_id)
                                               });
        if referenced {
            return Err(StoreError::ForeignKeyViolation("boxes still reference locations".into()));
        }
        let before = tables.locations.len();
        tables.locations.retain(|_, l| l.workspace_id != workspace_id);
        Ok(before - tables.locations.len())
    }
}

impl BoxStore for InMemoryRowStore {
    fn list_boxes(&self, workspace_id: Uuid) -> StoreResult<Vec<StorageBox>> {
        let _gate = self.enter("list_boxes")?;
        Ok(self.read()?.boxes.values().filter(|b| b.workspace_id == workspace_id).cloned().collect())
    }

    fn get_box(&self, id: Uuid) -> StoreResult<Option<StorageBox>> {
        let _gate = self.enter("get_box")?;
        Ok(self.read()?.boxes.get(&id).cloned())
    }

    fn insert_box(&self, row: NewBox) -> StoreResult<StorageBox> {
        let _gate = self.enter("insert_box")?;
        let mut tables = self.write()?;
        Self::require_workspace(&tables, row.workspace_id)?;
        Self::require_location(&tables, row.location_id)?;
        let now = Utc::now();
        let storage_box = StorageBox { id: row.id,
                                       workspace_id: row.workspace_id,
                                       location_id: row.location_id,
                                       name: row.name,
                                       description: row.description,
                                       tags: row.tags,
                                       created_at: now,
                                       updated_at: now };
        tables.boxes.insert(storage_box.id, storage_box.clone());
        Ok(storage_box)
    }

    fn update_box(&self, id: Uuid, changes: BoxChanges) -> StoreResult<StorageBox> {
        let _gate = self.enter("update_box")?;
        let mut tables = self.write()?;
        if let Some(location_id) = changes.location_id {
            Self::require_location(&tables, location_id)?;
        }
        let storage_box = tables.boxes.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(name) = changes.name {
            storage_box.name = name;
        }
        if let Some(description) = changes.description {
            storage_box.description = description;
        }
        if let Some(tags) = changes.tags {
            storage_box.tags = tags;
        }
        if let Some(location_id) = changes.location_id {
            storage_box.location_id = location_id;
        }
        storage_box.updated_at = Utc::now();
        Ok(storage_box.clone())
    }

    fn unassign_boxes(&self, workspace_id: Uuid, location_ids: &[Uuid]) -> StoreResult<usize> {
        let _gate = self.enter("unassign_boxes")?;
        let mut tables = self.write()?;
        let now = Utc::now();
        let mut changed = 0;
        for storage_box in tables.boxes.values_mut() {
            let hit = storage_box.location_id.is_some_and(|id| location_ids.contains(&id));
            if storage_box.workspace_id == workspace_id && hit {
                storage_box.location_id = None;
                storage_box.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn delete_box(&self, id: Uuid) -> StoreResult<usize> {
        let _gate = self.enter("delete_box")?;
        let mut tables = self.write()?;
        if tables.qr_codes.values().any(|q| q.box_id == Some(id)) {
            return Err(StoreError::ForeignKeyViolation(format!("box {id} is referenced by a qr code")));
        }
        Ok(tables.boxes.shift_remove(&id).map_or(0, |_| 1))
    }

    fn delete_boxes_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize> {
        let _gate = self.enter("delete_boxes_by_workspace")?;
        let mut tables = self.write()?;
        let referenced = tables.qr_codes.values().any(|q| {
                                                      q.box_id
                                                       .and_then(|id| tables.boxes.get(&id))
                                                       .is_some_and(|b| b.workspace_id == workspace_id)
                                                  });
        if referenced {
            return Err(StoreError::ForeignKeyViolation("qr codes still reference boxes".into()));
        }
        let before = tables.boxes.len();
        tables.boxes.retain(|_, b| b.workspace_id != workspace_id);
        Ok(before - tables.boxes.len())
    }
}

impl QrCodeStore for InMemoryRowStore {
    fn list_qr_codes(&self, workspace_id: Uuid, status: Option<QrStatus>) -> StoreResult<Vec<QrCode>> {
        let _gate = self.enter("list_qr_codes")?;
        Ok(self.read()?
               .qr_codes
               .values()
               .filter(|q| q.workspace_id == workspace_id && status.map_or(true, |s| q.status == s))
               .cloned()
               .collect())
    }

    fn get_qr_code(&self, id: Uuid) -> StoreResult<Option<QrCode>> {
        let _gate = self.enter("get_qr_code")?;
        Ok(self.read()?.qr_codes.get(&id).cloned())
    }

    fn find_qr_code_by_short_id(&self, short_id: &str) -> StoreResult<Option<QrCode>> {
        let _gate = self.enter("find_qr_code_by_short_id")?;
        Ok(self.read()?.qr_codes.values().find(|q| q.short_id == short_id).cloned())
    }

    fn find_qr_code_by_box(&self, box_id: Uuid) -> StoreResult<Option<QrCode>> {
        let _gate = self.enter("find_qr_code_by_box")?;
        Ok(self.read()?.qr_codes.values().find(|q| q.box_id == Some(box_id)).cloned())
    }

    fn insert_qr_codes(&self, rows: &[NewQrCode]) -> StoreResult<Vec<QrCode>> {
        let _gate = self.enter("insert_qr_codes")?;
        let mut tables = self.write()?;
        for (idx, row) in rows.iter().enumerate() {
            Self::require_workspace(&tables, row.workspace_id)?;
            let duplicated = tables.qr_codes.values().any(|q| q.short_id == row.short_id)
                             || rows[..idx].iter().any(|r| r.short_id == row.short_id);
            if duplicated {
                return Err(StoreError::UniqueViolation(format!("qr_codes(short_id)=({})", row.short_id)));
            }
        }
        let now = Utc::now();
        let inserted: Vec<QrCode> = rows.iter()
                                        .map(|row| QrCode { id: row.id,
                                                            workspace_id: row.workspace_id,
                                                            short_id: row.short_id.clone(),
                                                            box_id: None,
                                                            status: QrStatus::Generated,
                                                            created_at: now })
                                        .collect();
        for code in &inserted {
            tables.qr_codes.insert(code.id, code.clone());
        }
        debug!("in-memory insert_qr_codes count={}", inserted.len());
        Ok(inserted)
    }

    fn set_qr_code_box(&self, id: Uuid, box_id: Option<Uuid>) -> StoreResult<QrCode> {
        let _gate = self.enter("set_qr_code_box")?;
        let mut tables = self.write()?;
        if let Some(box_id) = box_id {
            if !tables.boxes.contains_key(&box_id) {
                return Err(StoreError::ForeignKeyViolation(format!("box {box_id} does not exist")));
            }
            if tables.qr_codes.values().any(|q| q.id != id && q.box_id == Some(box_id)) {
                return Err(StoreError::UniqueViolation(format!("qr_codes(box_id)=({box_id})")));
            }
        }
        let code = tables.qr_codes.get_mut(&id).ok_or(StoreError::NotFound)?;
        code.box_id = box_id;
        code.status = if box_id.is_some() { QrStatus::Assigned } else { QrStatus::Generated };
        Ok(code.clone())
    }

    fn release_qr_codes_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize> {
        let _gate = self.enter("release_qr_codes_by_workspace")?;
        let mut tables = self.write()?;
        let mut changed = 0;
        for code in tables.qr_codes.values_mut() {
            if code.workspace_id == workspace_id && code.box_id.is_some() {
                code.box_id = None;
                code.status = QrStatus::Generated;
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn delete_qr_codes_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize> {
        let _gate = self.enter("delete_qr_codes_by_workspace")?;
        let mut tables = self.write()?;
        let before = tables.qr_codes.len();
        tables.qr_codes.retain(|_, q| q.workspace_id != workspace_id);
        Ok(before - tables.qr_codes.len())
    }
}

impl RowStore for InMemoryRowStore {
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
        where F: FnOnce() -> Result<T, E>,
              E: From<StoreError>
    {
        // El turno se mantiene durante todo `f`: nadie más escribe entre la
        // copia y un posible rollback.
        let _gate = self.gate()?;
        let me = thread::current().id();
        {
            let mut snapshots = self.snapshots.lock().map_err(|_| poisoned())?;
            if snapshots.contains_key(&me) {
                drop(snapshots);
                return f();
            }
            let copy = self.read()?.clone();
            snapshots.insert(me, copy);
        }
        let _unwind = RollbackOnUnwind { store: self, thread: me };
        let result = f();
        if result.is_err() {
            self.restore(me);
        } else {
            self.snapshots.lock().map_err(|_| poisoned())?.remove(&me);
        }
        result
    }
}
