//! boxorg-core: árbol de ubicaciones, ciclo de vida de códigos QR y borrado
//! en cascada sobre un almacén de filas intercambiable.
pub mod errors;
pub mod services;
pub mod short_id;
pub mod store;
pub mod tree;

pub use errors::{ApiError, CascadeStep, ErrorKind, OrganizerError};
pub use services::{BoxService, CascadeDeletionOrchestrator, LocationFilter, LocationTreeService, QrCodeLifecycleManager,
                   WorkspaceService};
pub use store::{InMemoryRowStore, RowStore, StoreError, StoreResult};
pub use tree::LocationTree;
