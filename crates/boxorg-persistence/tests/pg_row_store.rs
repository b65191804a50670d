//! Paridad de `PgRowStore` con el almacén en memoria, ejercida a través de
//! los servicios. Se omiten sin `DATABASE_URL`.


use boxorg_core::store::{BoxStore, LocationStore, NewLocation, NewWorkspace, QrCodeStore, WorkspaceStore};
use boxorg_core::{BoxService, CascadeDeletionOrchestrator, LocationFilter, LocationTreeService, OrganizerError,
                  QrCodeLifecycleManager, RowStore, StoreError, WorkspaceService};
use boxorg_domain::dto::CreateBoxRequest;
use boxorg_domain::QrStatus;
use diesel::connection::SimpleConnection;
use test_support::{pg_store, TEST_POOL};
use uuid::Uuid;

macro_rules! store_or_skip {
    () => {
        match pg_store() {
            Some(store) => store,
            None => {
                eprintln!("skip (no DATABASE_URL)");
                return;
            }
        }
    };
}

fn box_request(ws: Uuid, name: &str, location_id: Option<Uuid>, qr_code_id: Option<Uuid>) -> CreateBoxRequest {
    CreateBoxRequest { workspace_id: ws,
                       name: name.into(),
                       description: None,
                       tags: vec!["pg".into()],
                       location_id,
                       qr_code_id }
}

#[test]
fn scenario_roundtrip_on_postgres() {
    let store = store_or_skip!();
    let owner = Uuid::new_v4();
    let ws = WorkspaceService::new(&store).create(owner, "Dom PG").expect("workspace").id;
    let locations = LocationTreeService::new(&store);
    let garaz = locations.create(ws, None, "Garaż").expect("garaż");
    let polka = locations.create(ws, Some(garaz.id), "Półka A").expect("półka");
    assert_eq!(polka.path, "root.garaz.polka_a");
    assert_eq!(polka.parent_id, Some(garaz.id));

    let code = QrCodeLifecycleManager::new(&store).generate_batch(ws, 2).expect("batch").remove(0);
    let boxes = BoxService::new(&store);
    let b = boxes.create(ws, &box_request(ws, "Elektronika", Some(polka.id), Some(code.id)))
                 .expect("box");
    assert_eq!(b.tags, vec!["pg".to_string()]);
    assert_eq!(store.get_qr_code(code.id).unwrap().unwrap().status, QrStatus::Assigned);

    let outcome = locations.delete(ws, garaz.id).expect("delete garaż");
    assert_eq!(outcome.deleted_location_ids.len(), 2);
    assert_eq!(boxes.list(ws, LocationFilter::Unassigned).unwrap().len(), 1);

    boxes.delete(ws, b.id).expect("delete box");
    assert_eq!(store.get_qr_code(code.id).unwrap().unwrap().status, QrStatus::Generated);

    let summary = CascadeDeletionOrchestrator::new(&store).delete_workspace(owner, ws).expect("cascade");
    assert_eq!(summary.locations_deleted, 2);
    assert_eq!(summary.qr_codes_deleted, 2);
    assert!(store.get_workspace(ws).unwrap().is_none());
    assert!(store.list_locations(ws, true).unwrap().is_empty());
}

#[test]
fn partial_unique_index_rejects_live_duplicates_only() {
    let store = store_or_skip!();
    let owner = Uuid::new_v4();
    let ws = WorkspaceService::new(&store).create(owner, "Índice").unwrap().id;
    let row = |path: &str| NewLocation { id: Uuid::new_v4(),
                                         workspace_id: ws,
                                         name: path.into(),
                                         path: path.into() };
    let first = store.insert_location(row("root.garaz")).unwrap();
    assert!(matches!(store.insert_location(row("root.garaz")), Err(StoreError::UniqueViolation(_))));
    store.mark_locations_deleted(ws, &[first.id]).unwrap();
    assert!(store.insert_location(row("root.garaz")).is_ok());

    CascadeDeletionOrchestrator::new(&store).delete_workspace(owner, ws).unwrap();
}

#[test]
fn rolled_back_transaction_leaves_no_rows() {
    let store = store_or_skip!();
    let owner = Uuid::new_v4();
    let ws = WorkspaceService::new(&store).create(owner, "Rollback").unwrap().id;
    let result: Result<(), OrganizerError> = store.transaction(|| {
        LocationTreeService::new(&store).create(ws, None, "Tymczasowa")?;
        Err(OrganizerError::Storage)
    });
    assert!(result.is_err());
    assert!(store.list_locations(ws, true).unwrap().is_empty());

    CascadeDeletionOrchestrator::new(&store).delete_workspace(owner, ws).unwrap();
}

#[test]
fn foreign_keys_refuse_out_of_order_cascade() {
    let store = store_or_skip!();
    let owner = Uuid::new_v4();
    let ws = WorkspaceService::new(&store).create(owner, "FK").unwrap().id;
    let garaz = LocationTreeService::new(&store).create(ws, None, "Garaż").unwrap();
    BoxService::new(&store).create(ws, &box_request(ws, "b", Some(garaz.id), None)).unwrap();

    // Las ubicaciones siguen referenciadas por la caja.
    assert!(matches!(store.delete_locations_by_workspace(ws), Err(StoreError::ForeignKeyViolation(_))));
    assert_eq!(store.list_boxes(ws).unwrap().len(), 1);

    CascadeDeletionOrchestrator::new(&store).delete_workspace(owner, ws).unwrap();
}

#[test]
fn check_constraint_keeps_status_and_box_in_sync() {
    let store = store_or_skip!();
    let Some(pool) = TEST_POOL.as_ref() else { return };
    let owner = Uuid::new_v4();
    let ws = WorkspaceService::new(&store).create(owner, "Check").unwrap().id;
    let code = QrCodeLifecycleManager::new(&store).generate_batch(ws, 1).unwrap().remove(0);

    let mut conn = pool.get().expect("conn");
    let forged = conn.batch_execute(&format!("UPDATE qr_codes SET status = 'assigned' WHERE id = '{}';", code.id));
    assert!(forged.is_err(), "assigned sin box_id debe violar el CHECK");
    drop(conn);

    CascadeDeletionOrchestrator::new(&store).delete_workspace(owner, ws).unwrap();
}

#[test]
fn non_owner_cannot_cascade() {
    let store = store_or_skip!();
    let owner = Uuid::new_v4();
    let ws = WorkspaceService::new(&store).create(owner, "Ajeno").unwrap().id;
    let err = CascadeDeletionOrchestrator::new(&store).delete_workspace(Uuid::new_v4(), ws).unwrap_err();
    assert_eq!(err, OrganizerError::NotWorkspaceOwner);
    assert!(store.get_workspace(ws).unwrap().is_some());

    CascadeDeletionOrchestrator::new(&store).delete_workspace(owner, ws).unwrap();
}

#[test]
fn panicking_transaction_is_rolled_back_and_releases_the_connection() {
    let store = store_or_skip!();
    let lost = Uuid::new_v4();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                      let _: Result<(), StoreError> = store.transaction(|| {
                                                               store.insert_workspace(NewWorkspace { id: lost,
                                                                                                     name: "pánico".into(),
                                                                                                     owner_id: Uuid::new_v4() })?;
                                                               panic!("boom");
                                                           });
                  }));
    assert!(outcome.is_err());
    assert!(store.get_workspace(lost).unwrap().is_none());

    // La siguiente transacción del hilo confirma y es visible desde otra conexión.
    let owner = Uuid::new_v4();
    let ws = WorkspaceService::new(&store).create(owner, "después del pánico").expect("workspace").id;
    let seen = std::thread::scope(|s| s.spawn(|| store.get_workspace(ws)).join().expect("reader thread"));
    assert!(seen.unwrap().is_some());
    CascadeDeletionOrchestrator::new(&store).delete_workspace(owner, ws).expect("cleanup");
}
