//! Ciclo de vida de los códigos QR: `generated -> assigned -> generated`.
//!
//! La asociación caja <-> código vive sólo en la fila del código
//! (`box_id`), de modo que el invariante `assigned <=> box_id` se mantiene
//! con una única escritura.
use boxorg_domain::dto::{GenerateQrCodesRequest, ListQrCodesQuery};
use boxorg_domain::{DomainError, QrCodeDto, QrStatus};
use log::{debug, warn};
use uuid::Uuid;

use crate::errors::OrganizerError;
use crate::short_id::{generate_short_id, is_valid_short_id, DEFAULT_SHORT_ID_LEN};
use crate::store::{NewQrCode, RowStore, StoreError};

/// Reintentos del lote completo ante una colisión de `short_id`.
const MAX_BATCH_ATTEMPTS: usize = 3;

pub struct QrCodeLifecycleManager<'a, S: RowStore> {
    store: &'a S,
    short_id_len: usize,
}

impl<'a, S: RowStore> QrCodeLifecycleManager<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store,
               short_id_len: DEFAULT_SHORT_ID_LEN }
    }

    pub fn with_short_id_len(mut self, len: usize) -> Self {
        self.short_id_len = len.max(1);
        self
    }

    pub fn generate_from_request(&self,
                                 request: &GenerateQrCodesRequest,
                                 max: u32)
                                 -> Result<Vec<QrCodeDto>, OrganizerError> {
        request.validate(max)?;
        self.generate_batch(request.workspace_id, request.quantity)
    }

    /// Inserta `quantity` códigos nuevos (`generated`, sin caja).
    ///
    /// El lote entra completo o no entra. Si el índice único de `short_id`
    /// rechaza el lote se regenera entero, hasta `MAX_BATCH_ATTEMPTS` veces.
    pub fn generate_batch(&self, workspace_id: Uuid, quantity: u32) -> Result<Vec<QrCodeDto>, OrganizerError> {
        if quantity == 0 {
            return Err(DomainError::Validation("quantity must be at least 1".into()).into());
        }
        if self.store.get_workspace(workspace_id)?.is_none() {
            return Err(OrganizerError::WorkspaceNotFound(workspace_id));
        }
        let mut attempt = 1;
        loop {
            let rows: Vec<NewQrCode> = (0..quantity).map(|_| NewQrCode { id: Uuid::new_v4(),
                                                                         workspace_id,
                                                                         short_id: generate_short_id(self.short_id_len) })
                                                    .collect();
            match self.store.insert_qr_codes(&rows) {
                Ok(codes) => {
                    debug!("generate_batch:done workspace_id={workspace_id} count={} attempt={attempt}",
                           codes.len());
                    return Ok(codes.iter().map(|c| c.to_dto()).collect());
                }
                Err(StoreError::UniqueViolation(detail)) if attempt < MAX_BATCH_ATTEMPTS => {
                    warn!("generate_batch:short_id collision attempt={attempt} detail={detail}");
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Vincula el código a la caja.
    ///
    /// Reasignar a la misma caja es un no-op. Ningún error deja cambios.
    pub fn assign(&self, qr_code_id: Uuid, box_id: Uuid, workspace_id: Uuid) -> Result<QrCodeDto, OrganizerError> {
        self.store.transaction(|| {
            let code = self.store
                           .get_qr_code(qr_code_id)?
                           .ok_or(OrganizerError::QrCodeNotFound(qr_code_id))?;
            let storage_box = self.store.get_box(box_id)?.ok_or(OrganizerError::BoxNotFound(box_id))?;
            if code.workspace_id != storage_box.workspace_id || code.workspace_id != workspace_id {
                warn!("assign:workspace mismatch qr_code_id={qr_code_id} box_id={box_id} workspace_id={workspace_id}");
                return Err(OrganizerError::WorkspaceMismatch);
            }
            match code.box_id {
                Some(current) if current == box_id => return Ok(code.to_dto()),
                Some(_) => return Err(OrganizerError::QrCodeAlreadyAssigned { qr_code_id }),
                None => {}
            }
            // Una caja lleva como mucho un código.
            if let Some(other) = self.store.find_qr_code_by_box(box_id)? {
                return Err(OrganizerError::QrCodeAlreadyAssigned { qr_code_id: other.id });
            }
            let updated = match self.store.set_qr_code_box(qr_code_id, Some(box_id)) {
                Ok(updated) => updated,
                Err(StoreError::UniqueViolation(_)) => {
                    return Err(OrganizerError::QrCodeAlreadyAssigned { qr_code_id });
                }
                Err(err) => return Err(err.into()),
            };
            debug!("assign:done qr_code_id={qr_code_id} box_id={box_id}");
            Ok(updated.to_dto())
        })
    }

    /// Devuelve el código a `generated`. Idempotente.
    pub fn release(&self, workspace_id: Uuid, qr_code_id: Uuid) -> Result<QrCodeDto, OrganizerError> {
        let code = self.store
                       .get_qr_code(qr_code_id)?
                       .filter(|c| c.workspace_id == workspace_id)
                       .ok_or(OrganizerError::QrCodeNotFound(qr_code_id))?;
        if code.box_id.is_none() {
            return Ok(code.to_dto());
        }
        let released = self.store.set_qr_code_box(qr_code_id, None)?;
        debug!("release:done qr_code_id={qr_code_id}");
        Ok(released.to_dto())
    }

    /// Libera el código vinculado a la caja, si lo hay.
    pub fn release_for_box(&self, box_id: Uuid) -> Result<Option<QrCodeDto>, OrganizerError> {
        match self.store.find_qr_code_by_box(box_id)? {
            Some(code) => {
                let released = self.store.set_qr_code_box(code.id, None)?;
                debug!("release_for_box:done box_id={box_id} qr_code_id={}", code.id);
                Ok(Some(released.to_dto()))
            }
            None => Ok(None),
        }
    }

    pub fn list(&self, workspace_id: Uuid, status: Option<QrStatus>) -> Result<Vec<QrCodeDto>, OrganizerError> {
        let mut codes = self.store.list_qr_codes(workspace_id, status)?;
        codes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.short_id.cmp(&b.short_id)));
        Ok(codes.iter().map(|c| c.to_dto()).collect())
    }

    pub fn list_from_query(&self, query: &ListQrCodesQuery) -> Result<Vec<QrCodeDto>, OrganizerError> {
        self.list(query.workspace_id, query.status)
    }

    /// Búsqueda por el token escaneado. Tolera minúsculas y espacios.
    pub fn get_by_short_id(&self, short_id: &str) -> Result<Option<QrCodeDto>, OrganizerError> {
        let token = short_id.trim().to_ascii_uppercase();
        if !is_valid_short_id(&token) {
            return Ok(None);
        }
        Ok(self.store.find_qr_code_by_short_id(&token)?.map(|c| c.to_dto()))
    }

    pub fn find_for_box(&self, box_id: Uuid) -> Result<Option<QrCodeDto>, OrganizerError> {
        Ok(self.store.find_qr_code_by_box(box_id)?.map(|c| c.to_dto()))
    }
}
