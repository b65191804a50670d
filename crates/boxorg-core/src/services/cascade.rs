//! Borrado en cascada de un workspace.
//!
//! El orden es fijo (`CascadeStep::ORDER`) y cada paso se verifica vacío
//! antes de pasar al siguiente: las claves foráneas del esquema son `NO
//! ACTION`, así que un paso adelantado fallaría igualmente en la base de
//! datos. Todo corre en una transacción del almacén; un fallo en cualquier
//! paso se devuelve como `CascadeAborted { step }` y no se reintenta.
use boxorg_domain::dto::{CascadeSummary, LocationDeletion, RequestContext};
use boxorg_domain::QrStatus;
use log::{debug, error, info};
use uuid::Uuid;

use super::locations::LocationTreeService;
use crate::errors::{CascadeStep, OrganizerError};
use crate::store::{RowStore, StoreError, StoreResult};

pub struct CascadeDeletionOrchestrator<'a, S: RowStore> {
    store: &'a S,
}

fn abort(step: CascadeStep, workspace_id: Uuid, err: StoreError) -> OrganizerError {
    error!("cascade:{step} failed workspace_id={workspace_id}: {err}");
    OrganizerError::CascadeAborted { step }
}

impl<'a, S: RowStore> CascadeDeletionOrchestrator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Ejecuta un paso y comprueba con `remaining` que no queda nada.
    fn run_step<A, R>(&self,
                      workspace_id: Uuid,
                      step: CascadeStep,
                      action: A,
                      remaining: R)
                      -> Result<usize, OrganizerError>
        where A: FnOnce() -> StoreResult<usize>,
              R: FnOnce() -> StoreResult<usize>
    {
        let affected = action().map_err(|e| abort(step, workspace_id, e))?;
        let left = remaining().map_err(|e| abort(step, workspace_id, e))?;
        if left > 0 {
            error!("cascade:{step} left {left} rows workspace_id={workspace_id}");
            return Err(OrganizerError::CascadeAborted { step });
        }
        debug!("cascade:{step} workspace_id={workspace_id} affected={affected}");
        Ok(affected)
    }

    /// Borra el workspace y todo lo que cuelga de él. Sólo el propietario.
    pub fn delete_workspace(&self, caller_id: Uuid, workspace_id: Uuid) -> Result<CascadeSummary, OrganizerError> {
        let workspace = self.store
                            .get_workspace(workspace_id)?
                            .ok_or(OrganizerError::WorkspaceNotFound(workspace_id))?;
        if !workspace.is_owned_by(caller_id) {
            return Err(OrganizerError::NotWorkspaceOwner);
        }
        info!("cascade:start workspace_id={workspace_id}");
        let store = self.store;
        let summary = store.transaction::<_, OrganizerError, _>(|| {
            let qr_codes_released = self.run_step(workspace_id,
                                                  CascadeStep::ReleaseQrCodes,
                                                  || store.release_qr_codes_by_workspace(workspace_id),
                                                  || {
                                                      store.list_qr_codes(workspace_id, Some(QrStatus::Assigned))
                                                           .map(|rows| rows.len())
                                                  })?;
            let boxes_deleted = self.run_step(workspace_id,
                                              CascadeStep::DeleteBoxes,
                                              || store.delete_boxes_by_workspace(workspace_id),
                                              || store.list_boxes(workspace_id).map(|rows| rows.len()))?;
            let locations_deleted = self.run_step(workspace_id,
                                                  CascadeStep::DeleteLocations,
                                                  || store.delete_locations_by_workspace(workspace_id),
                                                  || store.list_locations(workspace_id, true).map(|rows| rows.len()))?;
            let qr_codes_deleted = self.run_step(workspace_id,
                                                 CascadeStep::DeleteQrCodes,
                                                 || store.delete_qr_codes_by_workspace(workspace_id),
                                                 || store.list_qr_codes(workspace_id, None).map(|rows| rows.len()))?;
            let memberships_deleted = self.run_step(workspace_id,
                                                    CascadeStep::DeleteMemberships,
                                                    || store.delete_members_by_workspace(workspace_id),
                                                    || store.list_members(workspace_id).map(|rows| rows.len()))?;
            self.run_step(workspace_id,
                          CascadeStep::DeleteWorkspace,
                          || store.delete_workspace(workspace_id),
                          || store.get_workspace(workspace_id).map(|row| usize::from(row.is_some())))?;
            Ok(CascadeSummary { workspace_id,
                                qr_codes_released,
                                boxes_deleted,
                                locations_deleted,
                                qr_codes_deleted,
                                memberships_deleted })
        })?;
        info!("cascade:done workspace_id={workspace_id} boxes={} locations={} qr_codes={}",
              summary.boxes_deleted, summary.locations_deleted, summary.qr_codes_deleted);
        Ok(summary)
    }

    /// Variante para la capa HTTP: el llamante y el workspace salen del
    /// contexto de sesión.
    pub fn delete_workspace_in_context(&self, ctx: &RequestContext) -> Result<CascadeSummary, OrganizerError> {
        self.delete_workspace(ctx.user_id, ctx.workspace_id)
    }

    /// Borrado lógico de una ubicación con reasignación de sus cajas.
    pub fn delete_location_with_reassignment(&self,
                                             workspace_id: Uuid,
                                             location_id: Uuid)
                                             -> Result<LocationDeletion, OrganizerError> {
        LocationTreeService::new(self.store).delete(workspace_id, location_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::boxes::BoxService;
    use crate::services::qr_codes::QrCodeLifecycleManager;
    use crate::services::workspaces::WorkspaceService;
    use crate::store::{BoxStore, InMemoryRowStore, LocationStore, MembershipStore, QrCodeStore, WorkspaceStore};
    use boxorg_domain::dto::CreateBoxRequest;

    struct Fixture {
        store: InMemoryRowStore,
        owner: Uuid,
        ws: Uuid,
    }

    fn populated() -> Fixture {
        let store = InMemoryRowStore::new();
        let owner = Uuid::new_v4();
        let ws = WorkspaceService::new(&store).create(owner, "Dom").unwrap().id;
        let locations = LocationTreeService::new(&store);
        let garaz = locations.create(ws, None, "Garaż").unwrap();
        let polka = locations.create(ws, Some(garaz.id), "Półka A").unwrap();
        locations.create(ws, None, "Strych").unwrap();
        let codes = QrCodeLifecycleManager::new(&store).generate_batch(ws, 3).unwrap();
        let boxes = BoxService::new(&store);
        for (idx, location_id) in [Some(polka.id), None].into_iter().enumerate() {
            boxes.create(ws,
                         &CreateBoxRequest { workspace_id: ws,
                                             name: format!("box {idx}"),
                                             description: None,
                                             tags: vec![],
                                             location_id,
                                             qr_code_id: Some(codes[idx].id) })
                 .unwrap();
        }
        // Una ubicación ya borrada también debe desaparecer físicamente.
        locations.delete(ws, garaz.id).unwrap();
        Fixture { store, owner, ws }
    }

    fn remaining_rows(store: &InMemoryRowStore, ws: Uuid) -> usize {
        store.list_locations(ws, true).unwrap().len()
        + store.list_boxes(ws).unwrap().len()
        + store.list_qr_codes(ws, None).unwrap().len()
        + store.list_members(ws).unwrap().len()
        + usize::from(store.get_workspace(ws).unwrap().is_some())
    }

    #[test]
    fn owner_delete_leaves_nothing_behind() {
        let f = populated();
        let summary = CascadeDeletionOrchestrator::new(&f.store).delete_workspace(f.owner, f.ws).unwrap();
        assert_eq!(summary.qr_codes_released, 2);
        assert_eq!(summary.boxes_deleted, 2);
        assert_eq!(summary.locations_deleted, 3);
        assert_eq!(summary.qr_codes_deleted, 3);
        assert_eq!(summary.memberships_deleted, 1);
        assert_eq!(remaining_rows(&f.store, f.ws), 0);
    }

    #[test]
    fn non_owner_and_unknown_workspace_are_rejected() {
        let f = populated();
        let orchestrator = CascadeDeletionOrchestrator::new(&f.store);
        let err = orchestrator.delete_workspace(Uuid::new_v4(), f.ws).unwrap_err();
        assert_eq!(err, OrganizerError::NotWorkspaceOwner);
        assert_eq!(err.http_status(), 403);
        let missing = Uuid::new_v4();
        assert_eq!(orchestrator.delete_workspace(f.owner, missing).unwrap_err(),
                   OrganizerError::WorkspaceNotFound(missing));
        assert!(remaining_rows(&f.store, f.ws) > 0);
    }

    #[test]
    fn session_context_supplies_caller_and_workspace() {
        let f = populated();
        let orchestrator = CascadeDeletionOrchestrator::new(&f.store);
        let intruder = RequestContext { user_id: Uuid::new_v4(),
                                        workspace_id: f.ws };
        assert_eq!(orchestrator.delete_workspace_in_context(&intruder).unwrap_err(),
                   OrganizerError::NotWorkspaceOwner);
        let owner = RequestContext { user_id: f.owner,
                                     workspace_id: f.ws };
        assert_eq!(orchestrator.delete_workspace_in_context(&owner).unwrap().workspace_id, f.ws);
        assert_eq!(remaining_rows(&f.store, f.ws), 0);
    }

    #[test]
    fn failure_mid_cascade_rolls_everything_back() {
        let f = populated();
        let before = remaining_rows(&f.store, f.ws);
        f.store.fail_on("delete_locations_by_workspace");
        let err = CascadeDeletionOrchestrator::new(&f.store).delete_workspace(f.owner, f.ws).unwrap_err();
        assert_eq!(err, OrganizerError::CascadeAborted { step: CascadeStep::DeleteLocations });
        assert_eq!(err.http_status(), 500);
        assert_eq!(remaining_rows(&f.store, f.ws), before);
        assert_eq!(f.store.list_qr_codes(f.ws, Some(QrStatus::Assigned)).unwrap().len(), 2);
    }

    #[test]
    fn each_step_reports_itself_on_failure() {
        let ops = [(CascadeStep::ReleaseQrCodes, "release_qr_codes_by_workspace"),
                   (CascadeStep::DeleteBoxes, "delete_boxes_by_workspace"),
                   (CascadeStep::DeleteQrCodes, "delete_qr_codes_by_workspace"),
                   (CascadeStep::DeleteMemberships, "delete_members_by_workspace"),
                   (CascadeStep::DeleteWorkspace, "delete_workspace")];
        for (step, op) in ops {
            let f = populated();
            f.store.fail_on(op);
            let err = CascadeDeletionOrchestrator::new(&f.store).delete_workspace(f.owner, f.ws).unwrap_err();
            assert_eq!(err, OrganizerError::CascadeAborted { step }, "op {op}");
        }
    }

    #[test]
    fn other_workspaces_are_untouched() {
        let f = populated();
        let other_owner = Uuid::new_v4();
        let other = WorkspaceService::new(&f.store).create(other_owner, "Biuro").unwrap().id;
        LocationTreeService::new(&f.store).create(other, None, "Szafa").unwrap();
        CascadeDeletionOrchestrator::new(&f.store).delete_workspace(f.owner, f.ws).unwrap();
        assert_eq!(f.store.list_locations(other, false).unwrap().len(), 1);
        assert_eq!(f.store.list_members(other).unwrap().len(), 1);
    }
}
