pub mod archive;
pub mod backup;
pub mod clock;
pub mod config;
pub mod document;
pub mod error;
pub mod guard;
pub mod hash;
pub mod transform;

pub use archive::{Archive, ArchiveHeader, CollectionData, ARCHIVE_FORMAT_VERSION};
pub use backup::{BackupRun, BackupStats, BackupStatus, CollectionError, RunOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BackupConfig;
pub use document::Document;
pub use error::{backup_error, BackupError};
pub use guard::{GuardPermit, Operation, OperationGuard};
pub use hash::content_hash;
pub use transform::EncryptionKey;
