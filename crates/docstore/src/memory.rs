use anyhow::Result;
use chrono::Utc;
use placement_backup_core::Document;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::DocumentStore;

/// In-process document store. Collections enumerate in insertion order.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<Vec<(String, Vec<Document>)>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, name: impl Into<String>, documents: Vec<Document>) -> Self {
        self.collections.get_mut().push((name.into(), documents));
        self
    }

    pub async fn insert_collection(&self, name: impl Into<String>, documents: Vec<Document>) {
        let name = name.into();
        let mut collections = self.collections.write().await;
        match collections.iter_mut().find(|(n, _)| *n == name) {
            Some((_, docs)) => *docs = documents,
            None => collections.push((name, documents)),
        }
    }

    pub async fn document(&self, collection: &str, id: &str) -> Option<Document> {
        let collections = self.collections.read().await;
        collections
            .iter()
            .find(|(n, _)| n == collection)
            .and_then(|(_, docs)| docs.iter().find(|d| d.id == id).cloned())
    }

    pub async fn document_count(&self) -> usize {
        let collections = self.collections.read().await;
        collections.iter().map(|(_, docs)| docs.len()).sum()
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let collections = self.collections.read().await;
        Ok(collections.iter().map(|(n, _)| n.clone()).collect())
    }

    async fn read_all_documents(&self, collection: &str) -> Result<Vec<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .iter()
            .find(|(n, _)| n == collection)
            .map(|(_, docs)| docs.clone())
            .unwrap_or_default())
    }

    async fn upsert_document(
        &self,
        collection: &str,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut collections = self.collections.write().await;
        let docs = match collections.iter().position(|(n, _)| n == collection) {
            Some(idx) => &mut collections[idx].1,
            None => {
                collections.push((collection.to_owned(), Vec::new()));
                let last = collections.len() - 1;
                &mut collections[last].1
            }
        };

        match docs.iter_mut().find(|d| d.id == id) {
            Some(existing) => {
                existing.fields = fields.clone();
                existing.updated_at = Some(now);
            }
            None => docs.push(Document {
                id: id.to_owned(),
                fields: fields.clone(),
                created_at: Some(now),
                updated_at: Some(now),
            }),
        }
        Ok(())
    }
}
