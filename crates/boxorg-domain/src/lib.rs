// boxorg-domain library entry point
pub mod dto;
pub mod error;
pub mod location;
pub mod path;
pub mod qr_code;
pub mod storage_box;
pub mod workspace;
pub use error::DomainError;
pub use location::{Location, LocationDto, LocationNode};
pub use qr_code::{QrCode, QrCodeDto, QrStatus};
pub use storage_box::{BoxDto, StorageBox};
pub use workspace::{MemberRole, Membership, Workspace};
