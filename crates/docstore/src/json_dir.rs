use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use placement_backup_core::Document;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{validate_collection_name, DocumentStore, DocumentStoreError};

/// File-backed document store: each collection is `<root>/<name>.json`, a JSON
/// array of documents.
#[derive(Debug)]
pub struct JsonDirDocumentStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonDirDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create document root: {}", root.display()))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn collection_path(&self, collection: &str) -> Result<PathBuf> {
        validate_collection_name(collection)?;
        Ok(self.root.join(format!("{collection}.json")))
    }
}

fn read_collection(path: &Path, collection: &str) -> Result<Vec<Document>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read(path).with_context(|| format!("read collection file: {}", path.display()))?;
    serde_json::from_slice(&raw).map_err(|e| {
        DocumentStoreError::Unreadable {
            collection: collection.to_owned(),
            message: e.to_string(),
        }
        .into()
    })
}

fn write_collection(path: &Path, documents: &[Document]) -> Result<()> {
    let raw = serde_json::to_vec_pretty(documents).context("serialize collection")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, raw).with_context(|| format!("write collection file: {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replace collection file: {}", path.display()))?;
    Ok(())
}

#[async_trait::async_trait]
impl DocumentStore for JsonDirDocumentStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut names = Vec::new();
            for entry in fs::read_dir(&root).with_context(|| format!("list {}", root.display()))? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if validate_collection_name(stem).is_ok() {
                        names.push(stem.to_owned());
                    } else {
                        debug!(path = %path.display(), "ignoring file with invalid collection name");
                    }
                }
            }
            names.sort();
            Ok(names)
        })
        .await?
    }

    async fn read_all_documents(&self, collection: &str) -> Result<Vec<Document>> {
        let path = self.collection_path(collection)?;
        let collection = collection.to_owned();
        tokio::task::spawn_blocking(move || read_collection(&path, &collection)).await?
    }

    async fn upsert_document(
        &self,
        collection: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<()> {
        let path = self.collection_path(collection)?;
        let collection = collection.to_owned();
        let id = id.to_owned();
        let fields = fields.clone();

        let _write = self.write_lock.lock().await;
        tokio::task::spawn_blocking(move || {
            let mut documents = read_collection(&path, &collection)?;
            let now = Utc::now();
            match documents.iter_mut().find(|d| d.id == id) {
                Some(existing) => {
                    existing.fields = fields;
                    existing.updated_at = Some(now);
                }
                None => documents.push(Document {
                    id,
                    fields,
                    created_at: Some(now),
                    updated_at: Some(now),
                }),
            }
            write_collection(&path, &documents)
        })
        .await?
    }
}
