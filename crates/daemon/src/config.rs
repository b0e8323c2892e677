use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use placement_backup_core::BackupConfig;
use serde::Deserialize;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8089";
pub const DEFAULT_SCHEDULE: &str = "0 0 2 * * *";
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_STORAGE_PATH: &str = "./backups";
pub const DEFAULT_DOCUMENTS_ROOT: &str = "./data";

const ENV_PREFIX: &str = "PLACEMENT_BACKUP_";

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backup: BackupSection,
    pub documents: DocumentsConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: Option<String>,
    pub api_token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct BackupSection {
    pub enabled: Option<bool>,
    pub schedule: Option<String>,
    pub retention_days: Option<u32>,
    pub storage_path: Option<String>,
    pub collections: Option<Vec<String>>,
    pub compression: Option<bool>,
    pub encryption: Option<bool>,
    pub encryption_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct DocumentsConfig {
    pub root: Option<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
}

/// Effective settings after applying environment overrides and defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: String,
    pub api_token: Option<String>,
    pub documents_root: PathBuf,
    pub scheduler_enabled: bool,
    pub schedule: String,
    pub backup: BackupConfig,
}

impl Settings {
    /// Resolves each option as env var, then config file, then default.
    /// `env` is handed full variable names such as `PLACEMENT_BACKUP_SCHEDULE`.
    pub fn resolve(cfg: &Config, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| env(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());
        let flag = |name: &str, file: Option<bool>, default: bool| -> Result<bool> {
            match var(name) {
                Some(raw) => parse_bool(&raw).with_context(|| format!("{ENV_PREFIX}{name}")),
                None => Ok(file.unwrap_or(default)),
            }
        };

        let retention_days = match var("RETENTION_DAYS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .with_context(|| format!("{ENV_PREFIX}RETENTION_DAYS must be a whole number of days"))?,
            None => cfg.backup.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS),
        };

        let collections = match var("COLLECTIONS") {
            Some(raw) => split_list(&raw),
            None => cfg.backup.collections.clone().unwrap_or_default(),
        };

        let storage_path = var("STORAGE_PATH")
            .or_else(|| cfg.backup.storage_path.clone())
            .unwrap_or_else(|| DEFAULT_STORAGE_PATH.to_owned());

        let backup = BackupConfig {
            storage_path: PathBuf::from(storage_path),
            collections,
            compression: flag("COMPRESSION", cfg.backup.compression, true)?,
            encryption: flag("ENCRYPTION", cfg.backup.encryption, false)?,
            encryption_key: var("ENCRYPTION_KEY").or_else(|| cfg.backup.encryption_key.clone()),
            retention_days,
        };

        Ok(Self {
            listen: var("LISTEN")
                .or_else(|| cfg.server.listen.clone())
                .unwrap_or_else(|| DEFAULT_LISTEN.to_owned()),
            api_token: var("API_TOKEN").or_else(|| cfg.server.api_token.clone()),
            documents_root: PathBuf::from(
                var("DOCUMENTS_ROOT")
                    .or_else(|| cfg.documents.root.clone())
                    .unwrap_or_else(|| DEFAULT_DOCUMENTS_ROOT.to_owned()),
            ),
            scheduler_enabled: flag("ENABLED", cfg.backup.enabled, false)?,
            schedule: var("SCHEDULE")
                .or_else(|| cfg.backup.schedule.clone())
                .unwrap_or_else(|| DEFAULT_SCHEDULE.to_owned()),
            backup,
        })
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
