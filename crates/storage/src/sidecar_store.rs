use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use placement_backup_core::BackupRun;
use tracing::warn;
use uuid::Uuid;

use crate::store::MetadataStore;

pub const METADATA_SUFFIX: &str = ".metadata";

/// Metadata store that keeps each run as `<root>/<id>.metadata` next to its archive.
#[derive(Debug, Clone)]
pub struct SidecarStore {
    root: PathBuf,
}

impl SidecarStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create metadata directory: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn sidecar_path(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}{METADATA_SUFFIX}"))
    }
}

fn read_sidecar(path: &Path) -> Result<BackupRun> {
    let raw = fs::read(path).with_context(|| format!("read metadata: {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parse metadata: {}", path.display()))
}

fn write_sidecar(path: &Path, serialized: &[u8]) -> Result<()> {
    let tmp = path.with_extension("metadata.tmp");
    fs::write(&tmp, serialized)
        .with_context(|| format!("write backup metadata: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("replace backup metadata: {}", path.display()))
}

fn list_sidecars(root: &Path) -> Result<Vec<BackupRun>> {
    let mut runs = Vec::new();
    let entries = fs::read_dir(root)
        .with_context(|| format!("list metadata directory: {}", root.display()))?;
    for entry in entries {
        let path = entry?.path();
        let is_sidecar = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(METADATA_SUFFIX));
        if !is_sidecar {
            continue;
        }
        match read_sidecar(&path) {
            Ok(run) => runs.push(run),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable metadata"),
        }
    }
    runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(runs)
}

#[async_trait::async_trait]
impl MetadataStore for SidecarStore {
    async fn put_run(&self, run: &BackupRun) -> Result<()> {
        let path = self.sidecar_path(run.id);
        let serialized = serde_json::to_vec_pretty(run).context("serialize backup metadata")?;
        tokio::task::spawn_blocking(move || write_sidecar(&path, &serialized)).await?
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<BackupRun>> {
        let path = self.sidecar_path(id);
        tokio::task::spawn_blocking(move || {
            if !path.exists() {
                return Ok(None);
            }
            read_sidecar(&path).map(Some)
        })
        .await?
    }

    async fn list_runs(&self) -> Result<Vec<BackupRun>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || list_sidecars(&root)).await?
    }

    async fn delete_run(&self, id: Uuid) -> Result<bool> {
        let path = self.sidecar_path(id);
        tokio::task::spawn_blocking(move || match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("delete metadata: {}", path.display())),
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn put_get_replace_and_delete() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = SidecarStore::new(tmp.path()).expect("store");

        let mut run = BackupRun::started(Utc::now(), vec!["users".into()], false, false);
        store.put_run(&run).await.expect("insert");
        assert!(tmp.path().join(format!("{}.metadata", run.id)).exists());

        run.mark_failed("boom", vec![], Utc::now()).expect("fail");
        store.put_run(&run).await.expect("replace");
        let loaded = store.get_run(run.id).await.expect("get").expect("present");
        assert_eq!(loaded, run);

        assert!(store.delete_run(run.id).await.expect("delete"));
        assert!(!store.delete_run(run.id).await.expect("delete again"));
        assert!(store.get_run(run.id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_skips_junk() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = SidecarStore::new(tmp.path()).expect("store");

        let base = Utc::now();
        let older = BackupRun::started(base - Duration::hours(1), vec![], false, false);
        let newer = BackupRun::started(base, vec![], false, false);
        store.put_run(&older).await.expect("older");
        store.put_run(&newer).await.expect("newer");
        fs::write(tmp.path().join("garbage.metadata"), b"not json").expect("junk");
        fs::write(tmp.path().join("notes.txt"), b"ignored").expect("junk");

        let ids: Vec<_> = store
            .list_runs()
            .await
            .expect("list")
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }
}
