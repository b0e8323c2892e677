//! Document Store Adapter: the only surface the backup subsystem uses to reach
//! the live document database.

mod json_dir;
mod memory;

use anyhow::Result;
use placement_backup_core::Document;
use serde_json::{Map, Value};
use thiserror::Error;

pub use json_dir::JsonDirDocumentStore;
pub use memory::MemoryDocumentStore;

#[derive(Debug, Error)]
pub enum DocumentStoreError {
    #[error("invalid collection name {0:?}")]
    InvalidCollectionName(String),
    #[error("collection {collection} is unreadable: {message}")]
    Unreadable { collection: String, message: String },
}

/// Enumerate, read and upsert documents in the live store.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Names of every collection currently in the store.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Every document in `collection`. Unknown collections read as empty.
    async fn read_all_documents(&self, collection: &str) -> Result<Vec<Document>>;

    /// Insert or overwrite the document `id` in `collection`.
    async fn upsert_document(&self, collection: &str, id: &str, fields: &Map<String, Value>)
        -> Result<()>;
}

pub(crate) fn validate_collection_name(name: &str) -> Result<(), DocumentStoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DocumentStoreError::InvalidCollectionName(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_must_be_path_safe() {
        assert!(validate_collection_name("leave_requests").is_ok());
        assert!(validate_collection_name("student-documents").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("../etc").is_err());
        assert!(validate_collection_name("a/b").is_err());
    }
}
