//! Recorrido de demostración: workspace, árbol de ubicaciones, lote de QR,
//! caja etiquetada, borrado de ubicación y borrado en cascada.
use boxorg_core::{BoxService, CascadeDeletionOrchestrator, LocationTreeService, OrganizerError, QrCodeLifecycleManager,
                  RowStore, WorkspaceService};
use boxorg_domain::dto::{CascadeSummary, CreateBoxRequest, GenerateQrCodesRequest};
use log::info;
use uuid::Uuid;

use crate::config::OrganizerConfig;

/// Lo que la demo deja visto por pantalla, para poder comprobarlo.
#[derive(Debug, Clone, Default)]
pub struct DemoReport {
    pub paths: Vec<String>,
    pub scanned_short_id: String,
    pub unassigned_after_location_delete: usize,
    pub cascade: CascadeSummary,
}

pub fn run_demo<S: RowStore>(store: &S, cfg: &OrganizerConfig) -> Result<DemoReport, OrganizerError> {
    let owner = Uuid::new_v4();
    let ws = WorkspaceService::new(store).create(owner, "Casa")?.id;
    info!("demo workspace={ws}");

    let locations = LocationTreeService::new(store);
    let garage = locations.create(ws, None, "Garaż")?;
    let shelf = locations.create(ws, Some(garage.id), "Półka A")?;
    let attic = locations.create(ws, None, "Ático")?;

    let qr = QrCodeLifecycleManager::new(store).with_short_id_len(cfg.short_id_len);
    let codes = qr.generate_from_request(&GenerateQrCodesRequest { workspace_id: ws, quantity: 3 },
                                         cfg.qr_batch_max)?;

    let boxes = BoxService::new(store);
    let labelled = boxes.create(ws,
                                &CreateBoxRequest { workspace_id: ws,
                                                    name: "Elektronika".into(),
                                                    description: Some("cables y cargadores".into()),
                                                    tags: vec!["usb".into(), "hdmi".into()],
                                                    location_id: Some(shelf.id),
                                                    qr_code_id: codes.first().map(|c| c.id) })?;
    boxes.create(ws,
                 &CreateBoxRequest { workspace_id: ws,
                                     name: "Adornos".into(),
                                     description: None,
                                     tags: vec![],
                                     location_id: Some(attic.id),
                                     qr_code_id: None })?;

    let scanned = labelled.qr_code_id
                          .and_then(|id| codes.iter().find(|c| c.id == id))
                          .map(|c| c.short_id.clone())
                          .unwrap_or_default();
    if let Some(found) = qr.get_by_short_id(&scanned)? {
        info!("scan {} -> box {:?}", found.short_id, found.box_id);
    }

    let paths = locations.load_tree(ws)?.iter().map(|l| l.path.clone()).collect();
    let deletion = locations.delete(ws, garage.id)?;
    info!("location delete removed={} unassigned_boxes={}",
          deletion.deleted_location_ids.len(),
          deletion.unassigned_boxes);

    let cascade = CascadeDeletionOrchestrator::new(store).delete_workspace(owner, ws)?;
    Ok(DemoReport { paths,
                    scanned_short_id: scanned,
                    unassigned_after_location_delete: deletion.unassigned_boxes,
                    cascade })
}
