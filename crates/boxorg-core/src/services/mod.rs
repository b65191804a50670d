//! Servicios de aplicación. Todos son genéricos sobre el almacén
//! (`S: RowStore`), sólo guardan una referencia compartida y reciben el
//! `workspace_id` de forma explícita en cada llamada.
pub mod boxes;
pub mod cascade;
pub mod locations;
pub mod qr_codes;
pub mod workspaces;

pub use boxes::{BoxService, LocationFilter};
pub use cascade::CascadeDeletionOrchestrator;
pub use locations::LocationTreeService;
pub use qr_codes::QrCodeLifecycleManager;
pub use workspaces::WorkspaceService;
