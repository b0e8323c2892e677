use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use placement_backup_core::transform::{self, EncryptionKey};
use placement_backup_core::{
    content_hash, Archive, BackupConfig, BackupError, BackupRun, BackupStats, BackupStatus, Clock,
    CollectionError, Operation, OperationGuard, RunOutcome, SystemClock,
};
use placement_backup_docstore::DocumentStore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::report::{PruneReport, ReconcileReport, RestoreReport, VerifyReport};
use crate::repository::{ArchiveRepository, COMPRESSED_SUFFIX, ENCRYPTED_SUFFIX};
use crate::store::MetadataStore;

/// Creates, restores, lists and prunes full snapshots of the document store.
///
/// Backup creation and restore share one [`OperationGuard`]; a call made
/// while the guard is held fails immediately instead of waiting.
pub struct BackupService {
    config: BackupConfig,
    documents: Arc<dyn DocumentStore>,
    metadata: Arc<dyn MetadataStore>,
    archives: ArchiveRepository,
    guard: Arc<OperationGuard>,
    clock: Arc<dyn Clock>,
}

impl BackupService {
    pub fn new(
        config: BackupConfig,
        documents: Arc<dyn DocumentStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Result<Self> {
        let archives = ArchiveRepository::new(config.storage_path.clone())?;
        Ok(Self {
            config,
            documents,
            metadata,
            archives,
            guard: OperationGuard::new(),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_guard(mut self, guard: Arc<OperationGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn guard(&self) -> &Arc<OperationGuard> {
        &self.guard
    }

    pub fn archive_path(&self, run: &BackupRun) -> PathBuf {
        self.archives.path_for(run)
    }

    pub async fn create_backup(&self) -> Result<BackupRun> {
        let _permit = self.guard.try_acquire(Operation::Backup)?;
        let key = self.configured_key()?;

        let mut run = BackupRun::started(
            self.clock.now(),
            self.config.collections.clone(),
            self.config.compression,
            key.is_some(),
        );
        self.metadata
            .put_run(&run)
            .await
            .map_err(|e| BackupError::MetadataPersist {
                id: run.id,
                message: format!("{e:#}"),
            })?;
        info!(
            backup_id = %run.id,
            compressed = run.compressed,
            encrypted = run.encrypted,
            "backup started"
        );

        let mut collection_errors = Vec::new();
        match self
            .write_archive(&mut run, key.as_ref(), &mut collection_errors)
            .await
        {
            Ok(outcome) => {
                run.mark_success(outcome, self.clock.now())?;
                self.persist_final(&run).await?;
                info!(
                    backup_id = %run.id,
                    collections = ?run.collections,
                    skipped = run.collection_errors.len(),
                    documents = run.document_count,
                    size_bytes = run.size_bytes,
                    "backup completed"
                );
                Ok(run)
            }
            Err(e) => {
                error!(backup_id = %run.id, error = %e, "backup failed");
                let id = run.id;
                if let Err(cleanup) = self.on_archives(move |repo| repo.remove_all(id)).await {
                    warn!(backup_id = %run.id, error = %cleanup, "failed to remove partial archive");
                }
                run.mark_failed(format!("{e:#}"), collection_errors, self.clock.now())?;
                if let Err(persist) = self.persist_final(&run).await {
                    return Err(e.context(format!("{persist:#}")));
                }
                Err(e)
            }
        }
    }

    async fn write_archive(
        &self,
        run: &mut BackupRun,
        key: Option<&EncryptionKey>,
        collection_errors: &mut Vec<CollectionError>,
    ) -> Result<RunOutcome> {
        run.requested_collections = self.resolve_collections().await?;

        let mut archive = Archive::new(run.created_at, run.requested_collections.clone());
        for collection in &run.requested_collections {
            match self.documents.read_all_documents(collection).await {
                Ok(documents) => {
                    debug!(
                        backup_id = %run.id,
                        collection = %collection,
                        documents = documents.len(),
                        "collection captured"
                    );
                    archive.push_collection(collection.clone(), documents);
                }
                Err(e) => {
                    let err = BackupError::CollectionRead {
                        collection: collection.clone(),
                        message: format!("{e:#}"),
                    };
                    warn!(backup_id = %run.id, error = %err, "skipping unreadable collection");
                    collection_errors.push(CollectionError {
                        collection: collection.clone(),
                        message: format!("{e:#}"),
                    });
                }
            }
        }

        let collections = archive.data.names();
        let document_count = archive.document_count();
        let id = run.id;
        let compressed = run.compressed;
        let key = key.cloned();
        let (checksum, size_bytes) = self
            .on_archives(move |repo| {
                let bytes = archive.to_bytes()?;
                let checksum = content_hash(&bytes);

                let mut path = repo.write_plain(id, &bytes)?;
                if compressed {
                    path = repo.apply_stage(&path, COMPRESSED_SUFFIX, transform::compress)?;
                }
                if let Some(key) = key {
                    path = repo.apply_stage(&path, ENCRYPTED_SUFFIX, |b| transform::encrypt(b, &key))?;
                }
                Ok((checksum, repo.file_size(&path)?))
            })
            .await?;

        Ok(RunOutcome {
            collections,
            collection_errors: std::mem::take(collection_errors),
            document_count,
            size_bytes,
            checksum,
        })
    }

    /// Runs archive file work on the blocking pool.
    async fn on_archives<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ArchiveRepository) -> Result<T> + Send + 'static,
    {
        let archives = self.archives.clone();
        tokio::task::spawn_blocking(move || work(&archives)).await?
    }

    /// True while `run` belongs to the backup that currently holds the guard.
    fn in_flight(&self, run: &BackupRun) -> bool {
        run.status == BackupStatus::InProgress && self.guard.active() == Some(Operation::Backup)
    }

    async fn resolve_collections(&self) -> Result<Vec<String>> {
        if !self.config.collections.is_empty() {
            return Ok(self.config.collections.clone());
        }
        self.documents
            .list_collections()
            .await
            .context("list collections")
    }

    async fn persist_final(&self, run: &BackupRun) -> Result<()> {
        self.metadata.put_run(run).await.map_err(|e| {
            error!(backup_id = %run.id, error = %e, "failed to persist backup metadata");
            BackupError::MetadataPersist {
                id: run.id,
                message: format!("{e:#}"),
            }
            .into()
        })
    }

    fn configured_key(&self) -> Result<Option<EncryptionKey>, BackupError> {
        if !self.config.encryption {
            return Ok(None);
        }
        EncryptionKey::from_secret(self.config.encryption_key.as_deref()).map(Some)
    }

    /// Upserts every archived document back into the live store.
    ///
    /// Never deletes documents missing from the archive. A document that fails
    /// to upsert is logged and counted, and the restore carries on.
    pub async fn restore_backup(&self, id: Uuid) -> Result<RestoreReport> {
        let _permit = self.guard.try_acquire(Operation::Restore)?;
        let run = self.restorable_run(id).await?;

        let payload = self.decode_archive(&run).await?;
        let actual = content_hash(&payload);
        if actual != run.checksum {
            return Err(BackupError::ChecksumMismatch {
                id,
                expected: run.checksum,
                actual,
            }
            .into());
        }
        let archive = Archive::from_bytes(&payload)?;

        let mut report = RestoreReport {
            backup_id: id,
            collections: archive.data.names(),
            restored: 0,
            failed: 0,
        };
        info!(backup_id = %id, documents = archive.document_count(), "restore started");

        for (collection, documents) in archive.data.iter() {
            for document in documents {
                match self
                    .documents
                    .upsert_document(collection, &document.id, &document.fields)
                    .await
                {
                    Ok(()) => report.restored += 1,
                    Err(e) => {
                        let err = BackupError::DocumentRestore {
                            collection: collection.to_owned(),
                            document_id: document.id.clone(),
                            message: format!("{e:#}"),
                        };
                        warn!(backup_id = %id, error = %err, "skipping document");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            backup_id = %id,
            restored = report.restored,
            failed = report.failed,
            "restore completed"
        );
        Ok(report)
    }

    /// Recomputes the checksum of a stored archive without touching the live store.
    pub async fn verify_backup(&self, id: Uuid) -> Result<VerifyReport> {
        let run = self.restorable_run(id).await?;
        let payload = self.decode_archive(&run).await?;
        let actual = content_hash(&payload);
        let valid = actual == run.checksum;
        if !valid {
            warn!(backup_id = %id, expected = %run.checksum, actual = %actual, "checksum mismatch");
        }
        Ok(VerifyReport {
            backup_id: id,
            expected: run.checksum,
            actual,
            valid,
        })
    }

    async fn restorable_run(&self, id: Uuid) -> Result<BackupRun> {
        let run = self
            .metadata
            .get_run(id)
            .await?
            .ok_or(BackupError::BackupNotFound(id))?;
        if run.status != BackupStatus::Success {
            return Err(BackupError::NotRestorable {
                id,
                status: run.status,
            }
            .into());
        }
        Ok(run)
    }

    /// Reads the stored archive and undoes its transforms: decrypt, then decompress.
    async fn decode_archive(&self, run: &BackupRun) -> Result<Vec<u8>> {
        let path = self.archives.path_for(run);
        let key = if run.encrypted {
            Some(EncryptionKey::from_secret(self.config.encryption_key.as_deref())?)
        } else {
            None
        };
        let compressed = run.compressed;
        self.on_archives(move |repo| {
            let mut bytes = repo.read(&path)?;
            if let Some(key) = key {
                bytes = transform::decrypt(&bytes, &key)?;
            }
            if compressed {
                bytes = transform::decompress(&bytes)?;
            }
            Ok(bytes)
        })
        .await
    }

    /// All runs, newest first.
    pub async fn list_backups(&self) -> Result<Vec<BackupRun>> {
        self.metadata.list_runs().await
    }

    pub async fn get_backup(&self, id: Uuid) -> Result<Option<BackupRun>> {
        self.metadata.get_run(id).await
    }

    pub async fn get_stats(&self) -> Result<BackupStats> {
        let runs = self.metadata.list_runs().await?;
        Ok(BackupStats::from_runs(&runs))
    }

    /// Deletes a run's archive and metadata together. A run still being
    /// written by the active backup is refused with `BackupInProgress`.
    pub async fn delete_backup(&self, id: Uuid) -> Result<()> {
        let run = self.metadata.get_run(id).await?;
        if run.as_ref().is_some_and(|r| self.in_flight(r)) {
            return Err(BackupError::BackupInProgress.into());
        }
        let has_metadata = run.is_some();
        let archives = self.on_archives(move |repo| Ok(repo.find_archives(id))).await?;
        if !has_metadata && archives.is_empty() {
            return Err(BackupError::BackupNotFound(id).into());
        }
        self.delete_pair(id, has_metadata, archives).await?;
        info!(backup_id = %id, "backup deleted");
        Ok(())
    }

    /// Deletes every run created at or before `now - retention_days`.
    pub async fn prune_expired(&self, retention_days: u32) -> Result<PruneReport> {
        let mut report = PruneReport::default();
        let now = self.clock.now();
        let Some(cutoff) = Duration::try_days(i64::from(retention_days))
            .and_then(|age| now.checked_sub_signed(age))
        else {
            debug!(retention_days, "retention window reaches past the calendar; nothing to prune");
            return Ok(report);
        };

        let runs = self.metadata.list_runs().await?;
        for run in runs.into_iter().filter(|r| r.created_at <= cutoff) {
            if self.in_flight(&run) {
                continue;
            }
            let id = run.id;
            let pruned = match self.on_archives(move |repo| Ok(repo.find_archives(id))).await {
                Ok(archives) => self.delete_pair(id, true, archives).await,
                Err(e) => Err(e),
            };
            match pruned {
                Ok(()) => report.deleted.push(id),
                Err(e) => {
                    error!(backup_id = %id, error = %e, "failed to prune backup");
                    report.failed.push(id);
                }
            }
        }

        if !report.deleted.is_empty() {
            info!(
                removed = report.deleted.len(),
                retention_days, "retention pruning removed old backups"
            );
        }
        Ok(report)
    }

    /// Removes archive and metadata as one unit. The archive is moved aside
    /// first so a failed metadata delete can put it back.
    async fn delete_pair(&self, id: Uuid, has_metadata: bool, archives: Vec<PathBuf>) -> Result<()> {
        let trashed = self.on_archives(move |repo| trash_all(repo, id, archives)).await?;

        if has_metadata {
            if let Err(e) = self.metadata.delete_run(id).await {
                self.untrash_all(id, trashed).await;
                return Err(e.context(format!("delete metadata for backup {id}")));
            }
        }

        self.on_archives(move |repo| {
            for (_, t) in &trashed {
                if let Err(e) = repo.purge(t) {
                    warn!(backup_id = %id, error = %e, "trashed archive left for reconcile");
                }
            }
            Ok(())
        })
        .await
    }

    async fn untrash_all(&self, id: Uuid, trashed: Vec<(PathBuf, PathBuf)>) {
        let rollback = self
            .on_archives(move |repo| {
                untrash_each(repo, id, &trashed);
                Ok(())
            })
            .await;
        if let Err(e) = rollback {
            error!(backup_id = %id, error = %e, "archive rollback did not run");
        }
    }

    /// Sweeps the storage directory for leftovers of crashed or partial runs.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let _permit = self.guard.try_acquire(Operation::Backup)?;
        let mut report = ReconcileReport::default();

        let runs = self.metadata.list_runs().await?;
        for mut run in runs
            .iter()
            .filter(|r| r.status == BackupStatus::InProgress)
            .cloned()
        {
            let id = run.id;
            if let Err(e) = self.on_archives(move |repo| repo.remove_all(id)).await {
                warn!(backup_id = %run.id, error = %e, "failed to remove partial archive");
            }
            let errors = run.collection_errors.clone();
            run.mark_failed("interrupted before completion", errors, self.clock.now())?;
            self.metadata.put_run(&run).await?;
            warn!(backup_id = %run.id, "marked interrupted backup as failed");
            report.interrupted.push(run.id);
        }

        let known: HashSet<Uuid> = runs.iter().map(|r| r.id).collect();
        let (trash_removed, archives) = self
            .on_archives(|repo| {
                let scan = repo.scan()?;
                let mut removed = 0;
                for t in &scan.trash {
                    match repo.purge(t) {
                        Ok(()) => removed += 1,
                        Err(e) => {
                            warn!(path = %t.display(), error = %e, "failed to remove trashed archive")
                        }
                    }
                }
                Ok((removed, scan.archives))
            })
            .await?;
        report.trash_removed = trash_removed;
        for (id, path) in archives {
            if !known.contains(&id) {
                warn!(backup_id = %id, path = %path.display(), "archive has no metadata record");
                report.orphaned_archives.push(path);
            }
        }

        Ok(report)
    }
}

fn trash_all(
    repo: &ArchiveRepository,
    id: Uuid,
    archives: Vec<PathBuf>,
) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut trashed = Vec::with_capacity(archives.len());
    for path in archives {
        match repo.trash(&path) {
            Ok(t) => trashed.push((path, t)),
            Err(e) => {
                untrash_each(repo, id, &trashed);
                return Err(e);
            }
        }
    }
    Ok(trashed)
}

fn untrash_each(repo: &ArchiveRepository, id: Uuid, trashed: &[(PathBuf, PathBuf)]) {
    for (original, t) in trashed {
        if let Err(e) = repo.untrash(t, original) {
            error!(backup_id = %id, error = %e, "failed to put archive back after aborted delete");
        }
    }
}
