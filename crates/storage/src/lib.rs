mod report;
mod repository;
mod service;
pub mod sidecar_store;
pub mod store;

pub use report::{PruneReport, ReconcileReport, RestoreReport, VerifyReport};
pub use repository::{ArchiveRepository, ArchiveScan};
pub use service::BackupService;
pub use sidecar_store::SidecarStore;
pub use store::MetadataStore;
