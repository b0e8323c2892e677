use thiserror::Error;
use uuid::Uuid;

use crate::backup::BackupStatus;

/// Failures raised by the backup subsystem.
///
/// Operations return `anyhow::Result`; callers that need to branch on the kind
/// of failure use `err.downcast_ref::<BackupError>()`.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("a backup is already in progress")]
    BackupInProgress,
    #[error("a restore is already in progress")]
    RestoreInProgress,
    #[error("failed to read collection {collection}: {message}")]
    CollectionRead { collection: String, message: String },
    #[error("failed to serialize archive: {0}")]
    Serialization(String),
    #[error("archive could not be parsed: {0}")]
    CorruptArchive(String),
    #[error("failed to compress archive: {0}")]
    Compression(String),
    #[error("failed to decompress archive: {0}")]
    Decompression(String),
    #[error("failed to encrypt archive: {0}")]
    Encryption(String),
    #[error("failed to decrypt archive: {0}")]
    Decryption(String),
    #[error("encryption is enabled but no encryption key is configured")]
    EncryptionKeyMissing,
    #[error("invalid encryption key: {0}")]
    InvalidEncryptionKey(String),
    #[error("backup {0} not found")]
    BackupNotFound(Uuid),
    #[error("backup {id} cannot be restored while {status}")]
    NotRestorable { id: Uuid, status: BackupStatus },
    #[error("checksum mismatch for backup {id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        id: Uuid,
        expected: String,
        actual: String,
    },
    #[error("failed to restore document {collection}/{document_id}: {message}")]
    DocumentRestore {
        collection: String,
        document_id: String,
        message: String,
    },
    #[error("failed to persist metadata for backup {id}: {message}")]
    MetadataPersist { id: Uuid, message: String },
    #[error("backup status cannot move from {from} to {to}")]
    InvalidStatusTransition { from: BackupStatus, to: BackupStatus },
    #[error("invalid schedule expression {expression:?}: {message}")]
    InvalidSchedule { expression: String, message: String },
}

impl BackupError {
    /// True for errors that mean "another operation holds the guard, try later".
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::BackupInProgress | Self::RestoreInProgress)
    }
}

/// Returns the typed backup error carried by `err`, if any.
pub fn backup_error(err: &anyhow::Error) -> Option<&BackupError> {
    err.downcast_ref::<BackupError>()
}
