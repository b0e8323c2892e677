use std::path::PathBuf;

/// Resolved options for one backup service instance.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub storage_path: PathBuf,
    /// Collections to capture; empty means every collection the store reports.
    pub collections: Vec<String>,
    pub compression: bool,
    pub encryption: bool,
    pub encryption_key: Option<String>,
    pub retention_days: u32,
}

impl BackupConfig {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            collections: Vec::new(),
            compression: true,
            encryption: false,
            encryption_key: None,
            retention_days: 30,
        }
    }
}
