use std::path::PathBuf;

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RestoreReport {
    pub backup_id: Uuid,
    pub collections: Vec<String>,
    pub restored: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PruneReport {
    pub deleted: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VerifyReport {
    pub backup_id: Uuid,
    pub expected: String,
    pub actual: String,
    pub valid: bool,
}

/// Outcome of the orphan sweep.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Runs left `in_progress` by a previous process, now marked failed.
    pub interrupted: Vec<Uuid>,
    /// Archive files with no metadata record. Reported, never deleted.
    pub orphaned_archives: Vec<PathBuf>,
    pub trash_removed: usize,
}
