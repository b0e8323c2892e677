use anyhow::Result;
use placement_backup_core::BackupRun;
use uuid::Uuid;

/// Persistence for backup run records, one record per run keyed by run id.
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert the record, or replace the one with the same id.
    async fn put_run(&self, run: &BackupRun) -> Result<()>;

    /// Get a single run by id.
    async fn get_run(&self, id: Uuid) -> Result<Option<BackupRun>>;

    /// List all runs ordered by created_at DESC.
    async fn list_runs(&self) -> Result<Vec<BackupRun>>;

    /// Delete the record; returns false if there was nothing to delete.
    async fn delete_run(&self, id: Uuid) -> Result<bool>;
}
