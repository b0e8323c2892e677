use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use placement_backup_core::{BackupError, BackupRun};
use uuid::Uuid;

pub const PLAIN_SUFFIX: &str = ".json";
pub const COMPRESSED_SUFFIX: &str = ".zst";
pub const ENCRYPTED_SUFFIX: &str = ".enc";
pub const TRASH_SUFFIX: &str = ".trash";

/// Archive files on durable storage, one per run, named after the run id with
/// one suffix per applied transform.
#[derive(Debug, Clone)]
pub struct ArchiveRepository {
    root: PathBuf,
}

/// What a directory sweep found.
#[derive(Debug, Default)]
pub struct ArchiveScan {
    pub archives: Vec<(Uuid, PathBuf)>,
    pub trash: Vec<PathBuf>,
}

impl ArchiveRepository {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create storage directory: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive_path(&self, id: Uuid, compressed: bool, encrypted: bool) -> PathBuf {
        let mut name = format!("{id}{PLAIN_SUFFIX}");
        if compressed {
            name.push_str(COMPRESSED_SUFFIX);
        }
        if encrypted {
            name.push_str(ENCRYPTED_SUFFIX);
        }
        self.root.join(name)
    }

    pub fn path_for(&self, run: &BackupRun) -> PathBuf {
        self.archive_path(run.id, run.compressed, run.encrypted)
    }

    /// Writes the serialized archive body and returns its path.
    pub fn write_plain(&self, id: Uuid, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.archive_path(id, false, false);
        fs::write(&path, bytes).with_context(|| format!("write archive: {}", path.display()))?;
        Ok(path)
    }

    /// Rewrites the file at `from` through `stage` into `from` + `suffix`, then
    /// removes `from`. Returns the new path.
    pub fn apply_stage<F>(&self, from: &Path, suffix: &str, stage: F) -> Result<PathBuf>
    where
        F: FnOnce(&[u8]) -> Result<Vec<u8>, BackupError>,
    {
        let input = fs::read(from).with_context(|| format!("read archive: {}", from.display()))?;
        let output = stage(&input)?;

        let mut to = from.as_os_str().to_owned();
        to.push(suffix);
        let to = PathBuf::from(to);
        fs::write(&to, output).with_context(|| format!("write archive: {}", to.display()))?;
        fs::remove_file(from)
            .with_context(|| format!("remove previous stage: {}", from.display()))?;
        Ok(to)
    }

    pub fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("read archive: {}", path.display()))
    }

    pub fn file_size(&self, path: &Path) -> Result<u64> {
        let meta =
            fs::metadata(path).with_context(|| format!("stat archive: {}", path.display()))?;
        Ok(meta.len())
    }

    /// Every existing archive file for `id`, whatever transforms it carries.
    pub fn find_archives(&self, id: Uuid) -> Vec<PathBuf> {
        [(false, false), (true, false), (false, true), (true, true)]
            .into_iter()
            .map(|(compressed, encrypted)| self.archive_path(id, compressed, encrypted))
            .filter(|p| p.exists())
            .collect()
    }

    /// Removes every archive stage for `id`. Missing files are not an error.
    pub fn remove_all(&self, id: Uuid) -> Result<usize> {
        let mut removed = 0;
        for path in self.find_archives(id) {
            remove_if_exists(&path)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// First step of a paired delete: move the archive aside so it can be put back.
    pub fn trash(&self, path: &Path) -> Result<PathBuf> {
        let mut trashed = path.as_os_str().to_owned();
        trashed.push(TRASH_SUFFIX);
        let trashed = PathBuf::from(trashed);
        fs::rename(path, &trashed)
            .with_context(|| format!("move archive to trash: {}", path.display()))?;
        Ok(trashed)
    }

    pub fn untrash(&self, trashed: &Path, original: &Path) -> Result<()> {
        fs::rename(trashed, original)
            .with_context(|| format!("restore archive from trash: {}", original.display()))
    }

    pub fn purge(&self, trashed: &Path) -> Result<()> {
        remove_if_exists(trashed)
    }

    pub fn scan(&self) -> Result<ArchiveScan> {
        let mut scan = ArchiveScan::default();
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("list storage directory: {}", self.root.display()))?;
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(TRASH_SUFFIX) {
                scan.trash.push(path);
                continue;
            }
            let is_archive = [PLAIN_SUFFIX, COMPRESSED_SUFFIX, ENCRYPTED_SUFFIX]
                .iter()
                .any(|s| name.ends_with(s));
            if !is_archive {
                continue;
            }
            let id = name
                .split_once('.')
                .and_then(|(stem, _)| Uuid::parse_str(stem).ok());
            if let Some(id) = id {
                scan.archives.push((id, path));
            }
        }
        Ok(scan)
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("remove archive: {}", path.display())),
    }
}
