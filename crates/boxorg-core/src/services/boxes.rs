//! Cajas: CRUD con los efectos laterales sobre códigos QR.
use std::collections::HashMap;

use boxorg_domain::dto::{CreateBoxRequest, UpdateBoxRequest};
use boxorg_domain::{BoxDto, QrCodeDto, QrStatus, StorageBox};
use log::debug;
use uuid::Uuid;

use super::qr_codes::QrCodeLifecycleManager;
use crate::errors::OrganizerError;
use crate::store::{BoxChanges, NewBox, RowStore};

/// Filtro de ubicación para `BoxService::list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocationFilter {
    #[default]
    Any,
    /// Sólo cajas "Sin asignar".
    Unassigned,
    Id(Uuid),
}

impl LocationFilter {
    fn matches(&self, storage_box: &StorageBox) -> bool {
        match self {
            LocationFilter::Any => true,
            LocationFilter::Unassigned => storage_box.location_id.is_none(),
            LocationFilter::Id(id) => storage_box.location_id == Some(*id),
        }
    }
}

fn clean_description(description: Option<&str>) -> Option<String> {
    description.map(str::trim).filter(|d| !d.is_empty()).map(str::to_string)
}

pub struct BoxService<'a, S: RowStore> {
    store: &'a S,
}

impl<'a, S: RowStore> BoxService<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    fn qr(&self) -> QrCodeLifecycleManager<'a, S> {
        QrCodeLifecycleManager::new(self.store)
    }

    fn load(&self, workspace_id: Uuid, box_id: Uuid) -> Result<StorageBox, OrganizerError> {
        self.store
            .get_box(box_id)?
            .filter(|b| b.workspace_id == workspace_id)
            .ok_or(OrganizerError::BoxNotFound(box_id))
    }

    /// La ubicación debe existir, no estar borrada y ser del mismo workspace.
    fn require_location(&self, workspace_id: Uuid, location_id: Uuid) -> Result<(), OrganizerError> {
        match self.store.get_location(location_id)? {
            Some(l) if l.workspace_id == workspace_id && !l.is_deleted => Ok(()),
            _ => Err(OrganizerError::LocationNotFound(location_id)),
        }
    }

    pub fn create(&self, workspace_id: Uuid, request: &CreateBoxRequest) -> Result<BoxDto, OrganizerError> {
        request.validate()?;
        if request.workspace_id != workspace_id {
            return Err(OrganizerError::WorkspaceMismatch);
        }
        self.store.transaction(|| {
                      if let Some(location_id) = request.location_id {
                          self.require_location(workspace_id, location_id)?;
                      }
                      let row = NewBox { id: Uuid::new_v4(),
                                         workspace_id,
                                         location_id: request.location_id,
                                         name: request.name.trim().to_string(),
                                         description: clean_description(request.description.as_deref()),
                                         tags: request.normalized_tags() };
                      let storage_box = self.store.insert_box(row)?;
                      let qr_code_id = match request.qr_code_id {
                          Some(qr_code_id) => Some(self.qr().assign(qr_code_id, storage_box.id, workspace_id)?.id),
                          None => None,
                      };
                      debug!("box create:done workspace_id={workspace_id} id={} qr={qr_code_id:?}",
                             storage_box.id);
                      Ok(storage_box.to_dto(qr_code_id))
                  })
    }

    /// Actualización parcial. `qr_code_id`: ausente no toca el código,
    /// `null` libera el actual y un valor libera el actual y asigna el nuevo.
    pub fn update(&self,
                  workspace_id: Uuid,
                  box_id: Uuid,
                  request: &UpdateBoxRequest)
                  -> Result<BoxDto, OrganizerError> {
        request.validate()?;
        self.store.transaction(|| {
                      let mut storage_box = self.load(workspace_id, box_id)?;
                      if let Some(Some(location_id)) = request.location_id {
                          self.require_location(workspace_id, location_id)?;
                      }

                      let changes = BoxChanges { name: request.name.as_deref().map(|n| n.trim().to_string()),
                                                 description: request.description
                                                                     .as_ref()
                                                                     .map(|d| clean_description(d.as_deref())),
                                                 tags: request.normalized_tags(),
                                                 location_id: request.location_id };
                      let touches_row = changes.name.is_some()
                                        || changes.description.is_some()
                                        || changes.tags.is_some()
                                        || changes.location_id.is_some();
                      if touches_row {
                          storage_box = self.store.update_box(box_id, changes)?;
                      }

                      let qr = self.qr();
                      match request.qr_code_id {
                          None => {}
                          Some(None) => {
                              qr.release_for_box(box_id)?;
                          }
                          Some(Some(qr_code_id)) => {
                              let current = qr.find_for_box(box_id)?;
                              if current.as_ref().map(|c| c.id) != Some(qr_code_id) {
                                  if current.is_some() {
                                      qr.release_for_box(box_id)?;
                                  }
                                  qr.assign(qr_code_id, box_id, workspace_id)?;
                              }
                          }
                      }

                      let qr_code_id = qr.find_for_box(box_id)?.map(|c| c.id);
                      debug!("box update:done id={box_id} qr={qr_code_id:?}");
                      Ok(storage_box.to_dto(qr_code_id))
                  })
    }

    /// Libera el código de la caja y borra la fila. Devuelve el código
    /// liberado, si lo había.
    pub fn delete(&self, workspace_id: Uuid, box_id: Uuid) -> Result<Option<QrCodeDto>, OrganizerError> {
        self.store.transaction(|| {
                      self.load(workspace_id, box_id)?;
                      let released = self.qr().release_for_box(box_id)?;
                      self.store.delete_box(box_id)?;
                      debug!("box delete:done id={box_id} released={:?}", released.as_ref().map(|c| c.id));
                      Ok(released)
                  })
    }

    pub fn get(&self, workspace_id: Uuid, box_id: Uuid) -> Result<BoxDto, OrganizerError> {
        let storage_box = self.load(workspace_id, box_id)?;
        let qr_code_id = self.qr().find_for_box(box_id)?.map(|c| c.id);
        Ok(storage_box.to_dto(qr_code_id))
    }

    /// Cajas del workspace ordenadas por nombre, con su `qr_code_id`
    /// resuelto en una sola lectura de códigos asignados.
    pub fn list(&self, workspace_id: Uuid, filter: LocationFilter) -> Result<Vec<BoxDto>, OrganizerError> {
        let codes: HashMap<Uuid, Uuid> = self.store
                                             .list_qr_codes(workspace_id, Some(QrStatus::Assigned))?
                                             .into_iter()
                                             .filter_map(|c| c.box_id.map(|b| (b, c.id)))
                                             .collect();
        let mut boxes: Vec<StorageBox> = self.store
                                             .list_boxes(workspace_id)?
                                             .into_iter()
                                             .filter(|b| filter.matches(b))
                                             .collect();
        boxes.sort_by(|a, b| a.name.cmp(&b.name).then(a.created_at.cmp(&b.created_at)));
        Ok(boxes.iter().map(|b| b.to_dto(codes.get(&b.id).copied())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::locations::LocationTreeService;
    use crate::store::{InMemoryRowStore, NewWorkspace, QrCodeStore, WorkspaceStore};

    fn setup() -> (InMemoryRowStore, Uuid) {
        let store = InMemoryRowStore::new();
        let ws = store.insert_workspace(NewWorkspace { id: Uuid::new_v4(),
                                                       name: "W".into(),
                                                       owner_id: Uuid::new_v4() })
                      .unwrap()
                      .id;
        (store, ws)
    }

    fn request(ws: Uuid, name: &str) -> CreateBoxRequest {
        CreateBoxRequest { workspace_id: ws,
                           name: name.into(),
                           description: None,
                           tags: vec![],
                           location_id: None,
                           qr_code_id: None }
    }

    #[test]
    fn create_with_qr_assigns_the_code() {
        let (store, ws) = setup();
        let code = QrCodeLifecycleManager::new(&store).generate_batch(ws, 1).unwrap().remove(0);
        let svc = BoxService::new(&store);
        let mut req = request(ws, " Elektronika ");
        req.qr_code_id = Some(code.id);
        req.tags = vec!["kable".into(), " kable ".into(), "".into()];
        req.description = Some("   ".into());

        let created = svc.create(ws, &req).unwrap();
        assert_eq!(created.name, "Elektronika");
        assert_eq!(created.tags, vec!["kable".to_string()]);
        assert_eq!(created.description, None);
        assert_eq!(created.qr_code_id, Some(code.id));
        assert_eq!(store.get_qr_code(code.id).unwrap().unwrap().status, QrStatus::Assigned);
    }

    #[test]
    fn failed_qr_assignment_rolls_back_box_creation() {
        let (store, ws) = setup();
        let svc = BoxService::new(&store);
        let mut req = request(ws, "Elektronika");
        req.qr_code_id = Some(Uuid::new_v4());
        assert!(matches!(svc.create(ws, &req), Err(OrganizerError::QrCodeNotFound(_))));
        assert!(svc.list(ws, LocationFilter::Any).unwrap().is_empty());
    }

    #[test]
    fn deleted_or_foreign_location_is_rejected() {
        let (store, ws) = setup();
        let locations = LocationTreeService::new(&store);
        let garaz = locations.create(ws, None, "Garaż").unwrap();
        locations.delete(ws, garaz.id).unwrap();
        let svc = BoxService::new(&store);
        let mut req = request(ws, "b");
        req.location_id = Some(garaz.id);
        assert_eq!(svc.create(ws, &req).unwrap_err(), OrganizerError::LocationNotFound(garaz.id));
        assert_eq!(svc.create(Uuid::new_v4(), &req).unwrap_err(), OrganizerError::WorkspaceMismatch);
    }

    #[test]
    fn update_qr_is_tri_state() {
        let (store, ws) = setup();
        let codes = QrCodeLifecycleManager::new(&store).generate_batch(ws, 2).unwrap();
        let svc = BoxService::new(&store);
        let b = svc.create(ws, &request(ws, "b")).unwrap();

        let assign = UpdateBoxRequest { qr_code_id: Some(Some(codes[0].id)),
                                        ..Default::default() };
        assert_eq!(svc.update(ws, b.id, &assign).unwrap().qr_code_id, Some(codes[0].id));

        let rename = UpdateBoxRequest { name: Some("renamed".into()),
                                        ..Default::default() };
        let renamed = svc.update(ws, b.id, &rename).unwrap();
        assert_eq!(renamed.name, "renamed");
        assert_eq!(renamed.qr_code_id, Some(codes[0].id));

        let swap = UpdateBoxRequest { qr_code_id: Some(Some(codes[1].id)),
                                      ..Default::default() };
        assert_eq!(svc.update(ws, b.id, &swap).unwrap().qr_code_id, Some(codes[1].id));
        assert_eq!(store.get_qr_code(codes[0].id).unwrap().unwrap().status, QrStatus::Generated);

        let detach = UpdateBoxRequest { qr_code_id: Some(None),
                                        ..Default::default() };
        assert_eq!(svc.update(ws, b.id, &detach).unwrap().qr_code_id, None);
        assert!(store.list_qr_codes(ws, Some(QrStatus::Assigned)).unwrap().is_empty());
    }

    #[test]
    fn update_can_unassign_location() {
        let (store, ws) = setup();
        let garaz = LocationTreeService::new(&store).create(ws, None, "Garaż").unwrap();
        let svc = BoxService::new(&store);
        let mut req = request(ws, "b");
        req.location_id = Some(garaz.id);
        let b = svc.create(ws, &req).unwrap();
        assert_eq!(svc.list(ws, LocationFilter::Id(garaz.id)).unwrap().len(), 1);

        let clear = UpdateBoxRequest { location_id: Some(None),
                                       ..Default::default() };
        assert_eq!(svc.update(ws, b.id, &clear).unwrap().location_id, None);
        assert_eq!(svc.list(ws, LocationFilter::Unassigned).unwrap().len(), 1);
    }

    #[test]
    fn delete_releases_the_code() {
        let (store, ws) = setup();
        let code = QrCodeLifecycleManager::new(&store).generate_batch(ws, 1).unwrap().remove(0);
        let svc = BoxService::new(&store);
        let mut req = request(ws, "b");
        req.qr_code_id = Some(code.id);
        let b = svc.create(ws, &req).unwrap();

        let released = svc.delete(ws, b.id).unwrap();
        assert_eq!(released.map(|c| c.id), Some(code.id));
        let stored = store.get_qr_code(code.id).unwrap().unwrap();
        assert_eq!(stored.status, QrStatus::Generated);
        assert!(stored.box_id.is_none());
        assert_eq!(svc.get(ws, b.id).unwrap_err(), OrganizerError::BoxNotFound(b.id));
    }

    #[test]
    fn boxes_of_other_workspaces_are_not_found() {
        let (store, ws) = setup();
        let svc = BoxService::new(&store);
        let b = svc.create(ws, &request(ws, "b")).unwrap();
        let other = Uuid::new_v4();
        assert_eq!(svc.get(other, b.id).unwrap_err(), OrganizerError::BoxNotFound(b.id));
        assert_eq!(svc.delete(other, b.id).unwrap_err(), OrganizerError::BoxNotFound(b.id));
    }
}
