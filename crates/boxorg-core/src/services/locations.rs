//! Servicio de ubicaciones jerárquicas.
//!
//! Invariantes que mantiene (sin ayuda del almacén salvo la unicidad final
//! de `(workspace_id, path)`):
//! - profundidad (segmentos del path) <= `MAX_DEPTH`,
//! - sin paths duplicados entre ubicaciones no borradas del workspace,
//! - el path de una ubicación es el de su padre más un segmento,
//! - sin ciclos.
//!
//! Política de borrado: en cascada. Borrar una ubicación marca como borrados
//! también todos sus descendientes y deja "Sin asignar" todas las cajas que
//! apuntaban a cualquiera de ellos. Así ninguna fila viva queda colgando de
//! un padre borrado ni se re-engancha a una ubicación nueva con el mismo path.
use boxorg_domain::dto::{CreateLocationRequest, ListLocationsQuery, LocationDeletion};
use boxorg_domain::path::{build_path, is_descendant_path, normalize_name, path_depth, MAX_DEPTH, ROOT_SEGMENT};
use boxorg_domain::{Location, LocationDto, LocationNode};
use log::{debug, warn};
use uuid::Uuid;

use crate::errors::OrganizerError;
use crate::store::{NewLocation, RowStore, StoreError};
use crate::tree::LocationTree;

pub struct LocationTreeService<'a, S: RowStore> {
    store: &'a S,
}

impl<'a, S: RowStore> LocationTreeService<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Única lectura del workspace; todo lo demás se filtra en memoria.
    pub fn load_tree(&self, workspace_id: Uuid) -> Result<LocationTree, OrganizerError> {
        let rows = self.store.list_locations(workspace_id, false)?;
        Ok(LocationTree::from_rows(rows))
    }

    /// Lista hijos directos de `parent_id`, o las ubicaciones de primer nivel
    /// si no se indica padre. Cada DTO lleva su `parent_id` derivado.
    pub fn list(&self, workspace_id: Uuid, parent_id: Option<Uuid>) -> Result<Vec<LocationDto>, OrganizerError> {
        debug!("list:start workspace_id={workspace_id} parent_id={parent_id:?}");
        let tree = self.load_tree(workspace_id)?;
        let selected: Vec<&Location> = match parent_id {
            Some(pid) => tree.iter().filter(|l| tree.parent_id_of(l) == Some(pid)).collect(),
            None => tree.roots(),
        };
        let dtos: Vec<LocationDto> = selected.into_iter().map(|l| tree.to_dto(l)).collect();
        debug!("list:done workspace_id={workspace_id} count={}", dtos.len());
        Ok(dtos)
    }

    pub fn list_from_query(&self, query: &ListLocationsQuery) -> Result<Vec<LocationDto>, OrganizerError> {
        self.list(query.workspace_id, query.parent_id)
    }

    pub fn get(&self, workspace_id: Uuid, location_id: Uuid) -> Result<LocationDto, OrganizerError> {
        let tree = self.load_tree(workspace_id)?;
        tree.get_by_id(location_id)
            .map(|l| tree.to_dto(l))
            .ok_or(OrganizerError::LocationNotFound(location_id))
    }

    /// Árbol anidado completo del workspace.
    pub fn tree(&self, workspace_id: Uuid) -> Result<Vec<LocationNode>, OrganizerError> {
        Ok(self.load_tree(workspace_id)?.nodes())
    }

    pub fn create_from_request(&self, request: &CreateLocationRequest) -> Result<LocationDto, OrganizerError> {
        request.validate()?;
        self.create(request.workspace_id, request.parent_id, &request.name)
    }

    /// Crea una ubicación bajo `parent_id` (o en el primer nivel).
    ///
    /// # Errores
    /// - `ParentNotFound` si el padre no existe, está borrado o es de otro
    ///   workspace.
    /// - `InvalidName` si el nombre no deja ningún carácter útil tras
    ///   normalizarlo.
    /// - `MaxDepthExceeded` si el path resultante supera `MAX_DEPTH`.
    /// - `CircularHierarchy` si el path candidato sería ancestro del padre.
    /// - `SiblingConflict` si ya existe el path, también cuando lo detecta la
    ///   restricción de unicidad del almacén.
    pub fn create(&self, workspace_id: Uuid, parent_id: Option<Uuid>, name: &str) -> Result<LocationDto, OrganizerError> {
        debug!("create:start workspace_id={workspace_id} parent_id={parent_id:?}");
        let tree = self.load_tree(workspace_id)?;
        let parent = match parent_id {
            Some(pid) => Some(tree.get_by_id(pid).ok_or(OrganizerError::ParentNotFound(pid))?),
            None => None,
        };

        let slug = normalize_name(name);
        if slug.is_empty() {
            return Err(OrganizerError::InvalidName(name.trim().to_string()));
        }

        let parent_path = parent.map_or(ROOT_SEGMENT, |p| p.path.as_str());
        let depth = path_depth(parent_path) + 1;
        if depth > MAX_DEPTH {
            return Err(OrganizerError::MaxDepthExceeded { depth, max: MAX_DEPTH });
        }

        let candidate = build_path(parent.map(|p| p.path.as_str()), &slug);
        if candidate == parent_path || is_descendant_path(parent_path, &candidate) {
            return Err(OrganizerError::CircularHierarchy { candidate,
                                                           parent: parent_path.to_string() });
        }
        if tree.contains_path(&candidate) {
            return Err(OrganizerError::SiblingConflict { path: candidate });
        }

        let row = NewLocation { id: Uuid::new_v4(),
                                workspace_id,
                                name: name.trim().to_string(),
                                path: candidate.clone() };
        let location = match self.store.insert_location(row) {
            Ok(location) => location,
            // Otra petición insertó el mismo path entre la lectura y la escritura.
            Err(StoreError::UniqueViolation(detail)) => {
                warn!("create:race workspace_id={workspace_id} path={candidate} detail={detail}");
                return Err(OrganizerError::SiblingConflict { path: candidate });
            }
            Err(other) => return Err(other.into()),
        };
        debug!("create:done workspace_id={workspace_id} id={} path={}", location.id, location.path);
        Ok(location.to_dto(parent.map(|p| p.id)))
    }

    /// Borrado lógico en cascada con reasignación de cajas, atómico.
    ///
    /// Borrar una ubicación ya borrada es un no-op; un id desconocido (o de
    /// otro workspace) es `LocationNotFound`.
    pub fn delete(&self, workspace_id: Uuid, location_id: Uuid) -> Result<LocationDeletion, OrganizerError> {
        debug!("delete:start workspace_id={workspace_id} location_id={location_id}");
        self.store.transaction(|| {
            let rows = self.store.list_locations(workspace_id, true)?;
            let target = rows.iter()
                             .find(|l| l.id == location_id)
                             .cloned()
                             .ok_or(OrganizerError::LocationNotFound(location_id))?;
            if target.is_deleted {
                debug!("delete:noop location_id={location_id} already deleted");
                return Ok(LocationDeletion { location_id,
                                             ..LocationDeletion::default() });
            }

            let tree = LocationTree::from_rows(rows);
            let mut ids = vec![target.id];
            ids.extend(tree.descendants_of(&target.path).iter().map(|l| l.id));

            let unassigned_boxes = self.store.unassign_boxes(workspace_id, &ids)?;
            let deleted = self.store.mark_locations_deleted(workspace_id, &ids)?;
            if deleted != ids.len() {
                warn!("delete:partial expected={} deleted={deleted}", ids.len());
            }
            debug!("delete:done location_id={location_id} locations={} boxes={unassigned_boxes}",
                   ids.len());
            Ok(LocationDeletion { location_id,
                                  deleted_location_ids: ids,
                                  unassigned_boxes })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BoxStore, InMemoryRowStore, LocationStore, NewBox, NewWorkspace, WorkspaceStore};

    fn setup() -> (InMemoryRowStore, Uuid) {
        let store = InMemoryRowStore::new();
        let ws = store.insert_workspace(NewWorkspace { id: Uuid::new_v4(),
                                                       name: "W".into(),
                                                       owner_id: Uuid::new_v4() })
                      .unwrap();
        (store, ws.id)
    }

    #[test]
    fn create_builds_paths_from_normalized_names() {
        let (store, ws) = setup();
        let svc = LocationTreeService::new(&store);
        let garaz = svc.create(ws, None, "Garaż").unwrap();
        assert_eq!(garaz.path, "root.garaz");
        assert_eq!(garaz.name, "Garaż");
        assert_eq!(garaz.parent_id, None);

        let polka = svc.create(ws, Some(garaz.id), "Półka A").unwrap();
        assert_eq!(polka.path, "root.garaz.polka_a");
        assert_eq!(polka.parent_id, Some(garaz.id));
        assert_eq!(path_depth(&polka.path), 3);
    }

    #[test]
    fn list_query_selects_children_or_roots() {
        let (store, ws) = setup();
        let svc = LocationTreeService::new(&store);
        let garaz = svc.create(ws, None, "Garaż").unwrap();
        let polka = svc.create(ws, Some(garaz.id), "Półka A").unwrap();
        svc.create(ws, None, "Strych").unwrap();

        let children = svc.list_from_query(&ListLocationsQuery { workspace_id: ws,
                                                                 parent_id: Some(garaz.id) })
                          .unwrap();
        assert_eq!(children, vec![polka]);
        let roots = svc.list_from_query(&ListLocationsQuery { workspace_id: ws, parent_id: None }).unwrap();
        assert_eq!(roots.len(), 2);
    }

    #[test]
    fn depth_six_is_rejected() {
        let (store, ws) = setup();
        let svc = LocationTreeService::new(&store);
        let mut parent = None;
        for name in ["a", "b", "c", "d"] {
            parent = Some(svc.create(ws, parent, name).unwrap().id);
        }
        let err = svc.create(ws, parent, "e").unwrap_err();
        assert_eq!(err, OrganizerError::MaxDepthExceeded { depth: 6, max: 5 });
    }

    #[test]
    fn siblings_with_same_slug_conflict() {
        let (store, ws) = setup();
        let svc = LocationTreeService::new(&store);
        svc.create(ws, None, "Garaż").unwrap();
        let err = svc.create(ws, None, "  GARAZ ").unwrap_err();
        assert_eq!(err, OrganizerError::SiblingConflict { path: "root.garaz".into() });
    }

    #[test]
    fn same_name_under_different_parents_is_allowed() {
        let (store, ws) = setup();
        let svc = LocationTreeService::new(&store);
        let a = svc.create(ws, None, "A").unwrap();
        let b = svc.create(ws, None, "B").unwrap();
        assert!(svc.create(ws, Some(a.id), "Półka").is_ok());
        assert!(svc.create(ws, Some(b.id), "Półka").is_ok());
    }

    #[test]
    fn unknown_or_foreign_parent_is_not_found() {
        let (store, ws) = setup();
        let other = store.insert_workspace(NewWorkspace { id: Uuid::new_v4(),
                                                          name: "other".into(),
                                                          owner_id: Uuid::new_v4() })
                         .unwrap();
        let svc = LocationTreeService::new(&store);
        let foreign = svc.create(other.id, None, "Strych").unwrap();
        let err = svc.create(ws, Some(foreign.id), "x").unwrap_err();
        assert_eq!(err, OrganizerError::ParentNotFound(foreign.id));
    }

    #[test]
    fn empty_slug_is_invalid() {
        let (store, ws) = setup();
        let svc = LocationTreeService::new(&store);
        assert!(matches!(svc.create(ws, None, "???"), Err(OrganizerError::InvalidName(_))));
    }

    #[test]
    fn store_failures_surface_as_generic_storage_error() {
        let (store, ws) = setup();
        let svc = LocationTreeService::new(&store);
        store.fail_on("insert_location");
        let err = svc.create(ws, None, "x").unwrap_err();
        assert_eq!(err, OrganizerError::Storage);
        assert_eq!(err.http_status(), 500);
        assert!(svc.create(ws, None, "x").is_ok());
    }

    #[test]
    fn list_filters_by_derived_parent() {
        let (store, ws) = setup();
        let svc = LocationTreeService::new(&store);
        let garaz = svc.create(ws, None, "Garaż").unwrap();
        svc.create(ws, None, "Piwnica").unwrap();
        let polka = svc.create(ws, Some(garaz.id), "Półka A").unwrap();
        svc.create(ws, Some(polka.id), "Pudło").unwrap();

        let roots = svc.list(ws, None).unwrap();
        assert_eq!(roots.iter().map(|l| l.path.as_str()).collect::<Vec<_>>(),
                   vec!["root.garaz", "root.piwnica"]);

        let children = svc.list(ws, Some(garaz.id)).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, polka.id);
        assert_eq!(children[0].parent_id, Some(garaz.id));
    }

    #[test]
    fn delete_cascades_to_descendants_and_unassigns_boxes() {
        let (store, ws) = setup();
        let svc = LocationTreeService::new(&store);
        let garaz = svc.create(ws, None, "Garaż").unwrap();
        let polka = svc.create(ws, Some(garaz.id), "Półka A").unwrap();
        let piwnica = svc.create(ws, None, "Piwnica").unwrap();
        let mut box_ids = Vec::new();
        for location_id in [garaz.id, polka.id, piwnica.id] {
            let b = store.insert_box(NewBox { id: Uuid::new_v4(),
                                              workspace_id: ws,
                                              location_id: Some(location_id),
                                              name: "b".into(),
                                              description: None,
                                              tags: vec![] })
                         .unwrap();
            box_ids.push(b.id);
        }

        let outcome = svc.delete(ws, garaz.id).unwrap();
        assert_eq!(outcome.deleted_location_ids.len(), 2);
        assert_eq!(outcome.unassigned_boxes, 2);

        let boxes = store.list_boxes(ws).unwrap();
        let location_of = |id: Uuid| boxes.iter().find(|b| b.id == id).and_then(|b| b.location_id);
        assert_eq!(location_of(box_ids[0]), None);
        assert_eq!(location_of(box_ids[1]), None);
        assert_eq!(location_of(box_ids[2]), Some(piwnica.id));

        let rows = store.list_locations(ws, true).unwrap();
        assert!(rows.iter().filter(|l| l.id != piwnica.id).all(|l| l.is_deleted));
        assert_eq!(svc.list(ws, None).unwrap().len(), 1);
        assert!(matches!(svc.get(ws, polka.id), Err(OrganizerError::LocationNotFound(_))));
    }

    #[test]
    fn delete_is_idempotent_and_scoped() {
        let (store, ws) = setup();
        let svc = LocationTreeService::new(&store);
        let garaz = svc.create(ws, None, "Garaż").unwrap();
        svc.delete(ws, garaz.id).unwrap();
        let again = svc.delete(ws, garaz.id).unwrap();
        assert!(again.deleted_location_ids.is_empty());

        let err = svc.delete(Uuid::new_v4(), garaz.id).unwrap_err();
        assert_eq!(err, OrganizerError::LocationNotFound(garaz.id));
    }

    #[test]
    fn path_is_reusable_after_delete() {
        let (store, ws) = setup();
        let svc = LocationTreeService::new(&store);
        let first = svc.create(ws, None, "Garaż").unwrap();
        svc.delete(ws, first.id).unwrap();
        let second = svc.create(ws, None, "Garaż").unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.path, "root.garaz");
    }

    #[test]
    fn failed_delete_leaves_no_partial_state() {
        let (store, ws) = setup();
        let svc = LocationTreeService::new(&store);
        let garaz = svc.create(ws, None, "Garaż").unwrap();
        store.insert_box(NewBox { id: Uuid::new_v4(),
                                  workspace_id: ws,
                                  location_id: Some(garaz.id),
                                  name: "b".into(),
                                  description: None,
                                  tags: vec![] })
             .unwrap();
        store.fail_on("mark_locations_deleted");
        assert_eq!(svc.delete(ws, garaz.id).unwrap_err(), OrganizerError::Storage);
        assert!(store.list_boxes(ws).unwrap()[0].location_id.is_some());
        assert_eq!(svc.list(ws, None).unwrap().len(), 1);
    }

    mod racing {
        use boxorg_domain::{Membership, QrCode, QrStatus, StorageBox, Workspace};

        use super::*;
        use crate::store::{BoxChanges, MembershipStore, NewQrCode, QrCodeStore, StoreResult};

        macro_rules! delegate {
            ($($name:ident(&self $(, $arg:ident: $ty:ty)*) -> $ret:ty;)*) => {
                $(fn $name(&self $(, $arg: $ty)*) -> $ret { self.inner.$name($($arg),*) })*
            };
        }

        /// Almacén en el que otra petición inserta el mismo path justo antes
        /// de cada `insert_location`, después de que el servicio haya leído.
        pub struct RacingStore {
            pub inner: InMemoryRowStore,
        }

        impl WorkspaceStore for RacingStore {
            delegate! {
                get_workspace(&self, id: Uuid) -> StoreResult<Option<Workspace>>;
                insert_workspace(&self, row: NewWorkspace) -> StoreResult<Workspace>;
                delete_workspace(&self, id: Uuid) -> StoreResult<usize>;
            }
        }

        impl MembershipStore for RacingStore {
            delegate! {
                list_members(&self, workspace_id: Uuid) -> StoreResult<Vec<Membership>>;
                list_memberships_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Membership>>;
                insert_member(&self, row: Membership) -> StoreResult<Membership>;
                delete_members_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize>;
            }
        }

        impl LocationStore for RacingStore {
            delegate! {
                list_locations(&self, workspace_id: Uuid, include_deleted: bool) -> StoreResult<Vec<Location>>;
                get_location(&self, id: Uuid) -> StoreResult<Option<Location>>;
                mark_locations_deleted(&self, workspace_id: Uuid, ids: &[Uuid]) -> StoreResult<usize>;
                delete_locations_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize>;
            }

            fn insert_location(&self, row: NewLocation) -> StoreResult<Location> {
                self.inner.insert_location(NewLocation { id: Uuid::new_v4(),
                                                         ..row.clone() })?;
                self.inner.insert_location(row)
            }
        }

        impl BoxStore for RacingStore {
            delegate! {
                list_boxes(&self, workspace_id: Uuid) -> StoreResult<Vec<StorageBox>>;
                get_box(&self, id: Uuid) -> StoreResult<Option<StorageBox>>;
                insert_box(&self, row: NewBox) -> StoreResult<StorageBox>;
                update_box(&self, id: Uuid, changes: BoxChanges) -> StoreResult<StorageBox>;
                unassign_boxes(&self, workspace_id: Uuid, location_ids: &[Uuid]) -> StoreResult<usize>;
                delete_box(&self, id: Uuid) -> StoreResult<usize>;
                delete_boxes_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize>;
            }
        }

        impl QrCodeStore for RacingStore {
            delegate! {
                list_qr_codes(&self, workspace_id: Uuid, status: Option<QrStatus>) -> StoreResult<Vec<QrCode>>;
                get_qr_code(&self, id: Uuid) -> StoreResult<Option<QrCode>>;
                find_qr_code_by_short_id(&self, short_id: &str) -> StoreResult<Option<QrCode>>;
                find_qr_code_by_box(&self, box_id: Uuid) -> StoreResult<Option<QrCode>>;
                insert_qr_codes(&self, rows: &[NewQrCode]) -> StoreResult<Vec<QrCode>>;
                set_qr_code_box(&self, id: Uuid, box_id: Option<Uuid>) -> StoreResult<QrCode>;
                release_qr_codes_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize>;
                delete_qr_codes_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize>;
            }
        }

        impl RowStore for RacingStore {
            fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
                where F: FnOnce() -> Result<T, E>,
                      E: From<StoreError>
            {
                self.inner.transaction(f)
            }
        }
    }

    #[test]
    fn concurrent_insert_of_same_path_is_a_sibling_conflict() {
        let (inner, ws) = setup();
        let store = racing::RacingStore { inner };
        let svc = LocationTreeService::new(&store);

        let err = svc.create(ws, None, "Garaż").unwrap_err();
        assert_eq!(err, OrganizerError::SiblingConflict { path: "root.garaz".into() });
        assert_eq!(err.http_status(), 409);
        let body = err.to_api_error();
        assert!(!body.message.contains("locations(workspace_id"), "store detail leaked: {}", body.message);
        // Sólo queda la fila de la petición que ganó.
        assert_eq!(svc.list(ws, None).unwrap().len(), 1);
    }
}
