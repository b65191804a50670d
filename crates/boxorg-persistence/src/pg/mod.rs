//! Implementación Postgres (Diesel) del almacén de filas.
//!
//! - Paridad 1:1 con `InMemoryRowStore`: mismas restricciones (índice único
//!   parcial de paths vivos, `short_id` y `box_id` únicos, claves foráneas
//!   `NO ACTION`) y mismo mapeo a `StoreError`.
//! - Las consultas fuera de transacción se reintentan ante errores
//!   transitorios (`with_retry`).
//! - `transaction` fija una conexión del pool al hilo llamante: todas las
//!   operaciones del almacén que ese hilo haga dentro del cierre usan esa
//!   conexión y, por tanto, la misma transacción de Postgres.
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::thread::{self, ThreadId};

use boxorg_core::store::{BoxChanges, BoxStore, LocationStore, MembershipStore, NewBox, NewLocation, NewQrCode,
                         NewWorkspace, QrCodeStore, RowStore, StoreError, StoreResult, WorkspaceStore};
use boxorg_domain::{Location, Membership, QrCode, QrStatus, StorageBox, Workspace};
use chrono::Utc;
use diesel::connection::{AnsiTransactionManager, TransactionManager};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use log::{debug, error, warn};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{boxes, locations, qr_codes, workspace_members, workspaces};

pub mod rows;

use rows::{BoxChangeset, BoxRow, LocationRow, MemberRow, NewBoxRow, NewLocationRow, NewMemberRow, NewQrRow,
           NewWorkspaceRow, QrRow, WorkspaceRow};

/// Alias de tipo para el pool r2d2 de conexiones Postgres.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones.
///
/// Contrato: devuelve una conexión válida o `PersistenceError::TransientIo`.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError>;
}

/// Implementación concreta de `ConnectionProvider` respaldada por un `PgPool`.
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Determina si un error es transitorio (recomendado reintentar con backoff).
///
/// Cubre conflictos de serialización, errores de IO del pool y mensajes
/// comunes de desconexión/timeout detectados por texto.
pub(crate) fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::TransientIo(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
            || m.contains("could not serialize access due to concurrent update")
            || m.contains("terminating connection due to administrator command")
            || m.contains("connection closed")
            || m.contains("connection refused")
            || m.contains("timeout")
        }
        _ => false,
    }
}

/// Retry simple con backoff lineal muy pequeño (hasta 3 reintentos:
/// 15ms, 30ms, 45ms), con un `warn!` por intento.
pub(crate) fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms",
                      attempts + 1,
                      e,
                      delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

fn poisoned() -> PersistenceError {
    PersistenceError::Unknown("pinned connection registry poisoned".into())
}

/// Almacén de filas sobre Postgres.
pub struct PgRowStore<P: ConnectionProvider> {
    provider: P,
    // Conexiones con una transacción abierta, por hilo.
    pinned: Mutex<HashMap<ThreadId, PgPooledConnection>>,
}

impl<P: ConnectionProvider> PgRowStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider,
               pinned: Mutex::new(HashMap::new()) }
    }

    fn take_pinned(&self, tid: ThreadId) -> Result<Option<PgPooledConnection>, PersistenceError> {
        Ok(self.pinned.lock().map_err(|_| poisoned())?.remove(&tid))
    }

    fn pin(&self, tid: ThreadId, conn: PgPooledConnection) -> Result<(), PersistenceError> {
        self.pinned.lock().map_err(|_| poisoned())?.insert(tid, conn);
        Ok(())
    }

    fn is_pinned(&self, tid: ThreadId) -> Result<bool, PersistenceError> {
        Ok(self.pinned.lock().map_err(|_| poisoned())?.contains_key(&tid))
    }

    /// Ejecuta `f` con la conexión de la transacción en curso del hilo, o con
    /// una conexión nueva del pool (con reintentos) si no hay transacción.
    fn with_conn<T, F>(&self, mut f: F) -> Result<T, PersistenceError>
        where F: FnMut(&mut PgConnection) -> QueryResult<T>
    {
        let tid = thread::current().id();
        if let Some(mut conn) = self.take_pinned(tid)? {
            // Dentro de una transacción no se reintenta: el error ya la abortó.
            let result = f(&mut *conn).map_err(PersistenceError::from);
            self.pin(tid, conn)?;
            return result;
        }
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            f(&mut *conn).map_err(PersistenceError::from)
        })
    }

    fn run<T, F>(&self, op: &str, f: F) -> StoreResult<T>
        where F: FnMut(&mut PgConnection) -> QueryResult<T>
    {
        self.with_conn(f).map_err(|e| {
                             debug!("{op}:error {e}");
                             StoreError::from(e)
                         })
    }
}

/// Si el cierre de una transacción entra en pánico, desancla la conexión del
/// hilo y hace rollback; si no, el hilo quedaría atado a una transacción que
/// nadie confirma.
struct RollbackOnUnwind<'a, P: ConnectionProvider> {
    store: &'a PgRowStore<P>,
    tid: ThreadId,
}

impl<P: ConnectionProvider> Drop for RollbackOnUnwind<'_, P> {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }
        let conn = self.store.pinned.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.tid);
        if let Some(mut conn) = conn {
            match <AnsiTransactionManager as TransactionManager<PgConnection>>::rollback_transaction(&mut *conn) {
                Ok(()) => warn!("transaction:rollback after panic thread={:?}", self.tid),
                Err(e) => error!("transaction:rollback after panic failed {e}"),
            }
        }
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
    where T: TryFrom<R, Error = PersistenceError>
{
    rows.into_iter()
        .map(|row| T::try_from(row).map_err(StoreError::from))
        .collect()
}

impl<P: ConnectionProvider> WorkspaceStore for PgRowStore<P> {
    fn get_workspace(&self, id: Uuid) -> StoreResult<Option<Workspace>> {
        let row = self.run("get_workspace", |conn| {
                          workspaces::table.find(id)
                                           .select(WorkspaceRow::as_select())
                                           .first(conn)
                                           .optional()
                      })?;
        Ok(row.map(Workspace::from))
    }

    fn insert_workspace(&self, row: NewWorkspace) -> StoreResult<Workspace> {
        let new_row = NewWorkspaceRow { id: row.id,
                                        name: &row.name,
                                        owner_id: row.owner_id };
        let inserted = self.run("insert_workspace", |conn| {
                               diesel::insert_into(workspaces::table).values(&new_row)
                                                                     .returning(WorkspaceRow::as_returning())
                                                                     .get_result(conn)
                           })?;
        Ok(inserted.into())
    }

    fn delete_workspace(&self, id: Uuid) -> StoreResult<usize> {
        self.run("delete_workspace", |conn| diesel::delete(workspaces::table.find(id)).execute(conn))
    }
}

impl<P: ConnectionProvider> MembershipStore for PgRowStore<P> {
    fn list_members(&self, workspace_id: Uuid) -> StoreResult<Vec<Membership>> {
        let rows = self.run("list_members", |conn| {
                           workspace_members::table.filter(workspace_members::workspace_id.eq(workspace_id))
                                                   .order(workspace_members::created_at.asc())
                                                   .select(MemberRow::as_select())
                                                   .load(conn)
                       })?;
        convert_all(rows)
    }

    fn list_memberships_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Membership>> {
        let rows = self.run("list_memberships_for_user", |conn| {
                           workspace_members::table.filter(workspace_members::user_id.eq(user_id))
                                                   .order(workspace_members::created_at.asc())
                                                   .select(MemberRow::as_select())
                                                   .load(conn)
                       })?;
        convert_all(rows)
    }

    fn insert_member(&self, row: Membership) -> StoreResult<Membership> {
        let new_row = NewMemberRow { workspace_id: row.workspace_id,
                                     user_id: row.user_id,
                                     role: row.role.as_str(),
                                     created_at: row.created_at };
        let inserted = self.run("insert_member", |conn| {
                               diesel::insert_into(workspace_members::table).values(&new_row)
                                                                            .returning(MemberRow::as_returning())
                                                                            .get_result(conn)
                           })?;
        Ok(Membership::try_from(inserted)?)
    }

    fn delete_members_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize> {
        self.run("delete_members_by_workspace", |conn| {
                diesel::delete(workspace_members::table.filter(workspace_members::workspace_id.eq(workspace_id)))
                    .execute(conn)
            })
    }
}

impl<P: ConnectionProvider> LocationStore for PgRowStore<P> {
    fn list_locations(&self, workspace_id: Uuid, include_deleted: bool) -> StoreResult<Vec<Location>> {
        let rows = self.run("list_locations", |conn| {
                           let mut query = locations::table.filter(locations::workspace_id.eq(workspace_id))
                                                           .into_boxed();
                           if !include_deleted {
                               query = query.filter(locations::is_deleted.eq(false));
                           }
                           query.order(locations::path.asc())
                                .select(LocationRow::as_select())
                                .load(conn)
                       })?;
        Ok(rows.into_iter().map(Location::from).collect())
    }

    fn get_location(&self, id: Uuid) -> StoreResult<Option<Location>> {
        let row = self.run("get_location", |conn| {
                          locations::table.find(id)
                                          .select(LocationRow::as_select())
                                          .first(conn)
                                          .optional()
                      })?;
        Ok(row.map(Location::from))
    }

    fn insert_location(&self, row: NewLocation) -> StoreResult<Location> {
        let new_row = NewLocationRow { id: row.id,
                                       workspace_id: row.workspace_id,
                                       name: &row.name,
                                       path: &row.path };
        let inserted = self.run("insert_location", |conn| {
                               diesel::insert_into(locations::table).values(&new_row)
                                                                    .returning(LocationRow::as_returning())
                                                                    .get_result(conn)
                           })?;
        Ok(inserted.into())
    }

    fn mark_locations_deleted(&self, workspace_id: Uuid, ids: &[Uuid]) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids = ids.to_vec();
        self.run("mark_locations_deleted", |conn| {
                diesel::update(locations::table.filter(locations::workspace_id.eq(workspace_id))
                                               .filter(locations::id.eq_any(ids.clone()))
                                               .filter(locations::is_deleted.eq(false)))
                    .set((locations::is_deleted.eq(true), locations::updated_at.eq(Utc::now())))
                    .execute(conn)
            })
    }

    fn delete_locations_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize> {
        self.run("delete_locations_by_workspace", |conn| {
                diesel::delete(locations::table.filter(locations::workspace_id.eq(workspace_id))).execute(conn)
            })
    }
}

impl<P: ConnectionProvider> BoxStore for PgRowStore<P> {
    fn list_boxes(&self, workspace_id: Uuid) -> StoreResult<Vec<StorageBox>> {
        let rows = self.run("list_boxes", |conn| {
                           boxes::table.filter(boxes::workspace_id.eq(workspace_id))
                                       .order(boxes::created_at.asc())
                                       .select(BoxRow::as_select())
                                       .load(conn)
                       })?;
        Ok(rows.into_iter().map(StorageBox::from).collect())
    }

    fn get_box(&self, id: Uuid) -> StoreResult<Option<StorageBox>> {
        let row = self.run("get_box", |conn| {
                          boxes::table.find(id)
                                      .select(BoxRow::as_select())
                                      .first(conn)
                                      .optional()
                      })?;
        Ok(row.map(StorageBox::from))
    }

    fn insert_box(&self, row: NewBox) -> StoreResult<StorageBox> {
        let new_row = NewBoxRow { id: row.id,
                                  workspace_id: row.workspace_id,
                                  location_id: row.location_id,
                                  name: &row.name,
                                  description: row.description.as_deref(),
                                  tags: row.tags.clone() };
        let inserted = self.run("insert_box", |conn| {
                               diesel::insert_into(boxes::table).values(&new_row)
                                                                .returning(BoxRow::as_returning())
                                                                .get_result(conn)
                           })?;
        Ok(inserted.into())
    }

    fn update_box(&self, id: Uuid, changes: BoxChanges) -> StoreResult<StorageBox> {
        let changeset = BoxChangeset { name: changes.name,
                                       description: changes.description,
                                       tags: changes.tags,
                                       location_id: changes.location_id,
                                       updated_at: Utc::now() };
        let updated = self.run("update_box", |conn| {
                              diesel::update(boxes::table.find(id)).set(&changeset)
                                                                   .returning(BoxRow::as_returning())
                                                                   .get_result(conn)
                          })?;
        Ok(updated.into())
    }

    fn unassign_boxes(&self, workspace_id: Uuid, location_ids: &[Uuid]) -> StoreResult<usize> {
        if location_ids.is_empty() {
            return Ok(0);
        }
        let ids = location_ids.to_vec();
        self.run("unassign_boxes", |conn| {
                diesel::update(boxes::table.filter(boxes::workspace_id.eq(workspace_id))
                                           .filter(boxes::location_id.eq_any(ids.clone())))
                    .set((boxes::location_id.eq(None::<Uuid>), boxes::updated_at.eq(Utc::now())))
                    .execute(conn)
            })
    }

    fn delete_box(&self, id: Uuid) -> StoreResult<usize> {
        self.run("delete_box", |conn| diesel::delete(boxes::table.find(id)).execute(conn))
    }

    fn delete_boxes_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize> {
        self.run("delete_boxes_by_workspace", |conn| {
                diesel::delete(boxes::table.filter(boxes::workspace_id.eq(workspace_id))).execute(conn)
            })
    }
}

impl<P: ConnectionProvider> QrCodeStore for PgRowStore<P> {
    fn list_qr_codes(&self, workspace_id: Uuid, status: Option<QrStatus>) -> StoreResult<Vec<QrCode>> {
        let rows = self.run("list_qr_codes", |conn| {
                           let mut query = qr_codes::table.filter(qr_codes::workspace_id.eq(workspace_id))
                                                          .into_boxed();
                           if let Some(status) = status {
                               query = query.filter(qr_codes::status.eq(status.as_str()));
                           }
                           query.order((qr_codes::created_at.asc(), qr_codes::short_id.asc()))
                                .select(QrRow::as_select())
                                .load(conn)
                       })?;
        convert_all(rows)
    }

    fn get_qr_code(&self, id: Uuid) -> StoreResult<Option<QrCode>> {
        let row = self.run("get_qr_code", |conn| {
                          qr_codes::table.find(id)
                                         .select(QrRow::as_select())
                                         .first(conn)
                                         .optional()
                      })?;
        Ok(row.map(QrCode::try_from).transpose()?)
    }

    fn find_qr_code_by_short_id(&self, short_id: &str) -> StoreResult<Option<QrCode>> {
        let row = self.run("find_qr_code_by_short_id", |conn| {
                          qr_codes::table.filter(qr_codes::short_id.eq(short_id))
                                         .select(QrRow::as_select())
                                         .first(conn)
                                         .optional()
                      })?;
        Ok(row.map(QrCode::try_from).transpose()?)
    }

    fn find_qr_code_by_box(&self, box_id: Uuid) -> StoreResult<Option<QrCode>> {
        let row = self.run("find_qr_code_by_box", |conn| {
                          qr_codes::table.filter(qr_codes::box_id.eq(box_id))
                                         .select(QrRow::as_select())
                                         .first(conn)
                                         .optional()
                      })?;
        Ok(row.map(QrCode::try_from).transpose()?)
    }

    fn insert_qr_codes(&self, rows: &[NewQrCode]) -> StoreResult<Vec<QrCode>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let new_rows: Vec<NewQrRow<'_>> = rows.iter()
                                              .map(|r| NewQrRow { id: r.id,
                                                                  workspace_id: r.workspace_id,
                                                                  short_id: &r.short_id,
                                                                  status: QrStatus::Generated.as_str() })
                                              .collect();
        // Un único INSERT multi-fila: entra el lote completo o nada.
        let inserted = self.run("insert_qr_codes", |conn| {
                               diesel::insert_into(qr_codes::table).values(&new_rows)
                                                                   .returning(QrRow::as_returning())
                                                                   .get_results(conn)
                           })?;
        debug!("insert_qr_codes:done count={}", inserted.len());
        convert_all(inserted)
    }

    fn set_qr_code_box(&self, id: Uuid, box_id: Option<Uuid>) -> StoreResult<QrCode> {
        let status = if box_id.is_some() { QrStatus::Assigned } else { QrStatus::Generated };
        let updated = self.run("set_qr_code_box", |conn| {
                              diesel::update(qr_codes::table.find(id))
                                  .set((qr_codes::box_id.eq(box_id), qr_codes::status.eq(status.as_str())))
                                  .returning(QrRow::as_returning())
                                  .get_result(conn)
                          })?;
        Ok(QrCode::try_from(updated)?)
    }

    fn release_qr_codes_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize> {
        self.run("release_qr_codes_by_workspace", |conn| {
                diesel::update(qr_codes::table.filter(qr_codes::workspace_id.eq(workspace_id))
                                              .filter(qr_codes::box_id.is_not_null()))
                    .set((qr_codes::box_id.eq(None::<Uuid>), qr_codes::status.eq(QrStatus::Generated.as_str())))
                    .execute(conn)
            })
    }

    fn delete_qr_codes_by_workspace(&self, workspace_id: Uuid) -> StoreResult<usize> {
        self.run("delete_qr_codes_by_workspace", |conn| {
                diesel::delete(qr_codes::table.filter(qr_codes::workspace_id.eq(workspace_id))).execute(conn)
            })
    }
}

impl<P: ConnectionProvider> RowStore for PgRowStore<P> {
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
        where F: FnOnce() -> Result<T, E>,
              E: From<StoreError>
    {
        let tid = thread::current().id();
        if self.is_pinned(tid).map_err(StoreError::from)? {
            // Anidada: se aplana en la transacción del hilo.
            return f();
        }
        let mut conn = self.provider.connection().map_err(StoreError::from)?;
        <AnsiTransactionManager as TransactionManager<PgConnection>>::begin_transaction(&mut *conn)
            .map_err(|e| StoreError::from(PersistenceError::from(e)))?;
        self.pin(tid, conn).map_err(StoreError::from)?;
        let _unwind = RollbackOnUnwind { store: self, tid };

        let result = f();

        let Some(mut conn) = self.take_pinned(tid).map_err(StoreError::from)? else {
            error!("transaction:connection lost thread={tid:?}");
            return Err(StoreError::Backend("transaction connection lost".into()).into());
        };
        match &result {
            Ok(_) => {
                <AnsiTransactionManager as TransactionManager<PgConnection>>::commit_transaction(&mut *conn)
                    .map_err(|e| StoreError::from(PersistenceError::from(e)))?;
                debug!("transaction:commit");
            }
            Err(_) => {
                if let Err(e) = <AnsiTransactionManager as TransactionManager<PgConnection>>::rollback_transaction(&mut *conn) {
                    error!("transaction:rollback failed {e}");
                } else {
                    debug!("transaction:rollback");
                }
            }
        }
        result
    }
}

/// Construye un pool r2d2 y corre las migraciones pendientes una vez.
///
/// Si `min_size > max_size` se usa `min_size = max_size`.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = if min_size == 0 { 1 } else { min_size };
    let validated_max = if max_size == 0 { 1 } else { max_size };
    if validated_min > validated_max {
        warn!("min_size > max_size ({} > {}), ajustando min=max",
              validated_min, validated_max);
    }
    let final_min = validated_min.min(validated_max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(final_min))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Helper de desarrollo: carga `.env`, lee configuración (DATABASE_URL,
/// tamaños) y construye un pool ya migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env()?;
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}

/// `PgRowStore` listo para usar a partir del entorno.
pub fn build_dev_store_from_env() -> Result<PgRowStore<PoolProvider>, PersistenceError> {
    let pool = build_dev_pool_from_env()?;
    Ok(PgRowStore::new(PoolProvider { pool }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(is_retryable(&PersistenceError::SerializationConflict));
        assert!(is_retryable(&PersistenceError::TransientIo("pool timed out".into())));
        assert!(is_retryable(&PersistenceError::Unknown("deadlock detected".into())));
        assert!(!is_retryable(&PersistenceError::UniqueViolation("locations_live_path_uniq".into())));
    }

    #[test]
    fn with_retry_gives_up_after_three_retries() {
        let mut calls = 0;
        let result: Result<(), PersistenceError> = with_retry(|| {
            calls += 1;
            Err(PersistenceError::TransientIo("down".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 4);
    }

    #[test]
    fn with_retry_does_not_repeat_permanent_errors() {
        let mut calls = 0;
        let result: Result<(), PersistenceError> = with_retry(|| {
            calls += 1;
            Err(PersistenceError::ForeignKeyViolation("boxes_location_id_fkey".into()))
        });
        assert!(matches!(result, Err(PersistenceError::ForeignKeyViolation(_))));
        assert_eq!(calls, 1);
    }
}
