use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::document::Document;
use crate::error::BackupError;

pub const ARCHIVE_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveHeader {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// Collections the run was asked for, captured or not.
    pub collections: Vec<String>,
}

/// Collection name to documents, kept in the order collections were read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionData(Vec<(String, Vec<Document>)>);

impl CollectionData {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Document])> {
        self.0.iter().map(|(name, docs)| (name.as_str(), docs.as_slice()))
    }

    pub fn get(&self, collection: &str) -> Option<&[Document]> {
        self.0
            .iter()
            .find(|(name, _)| name == collection)
            .map(|(_, docs)| docs.as_slice())
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for CollectionData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, docs) in &self.0 {
            map.serialize_entry(name, docs)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CollectionData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = CollectionData;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of collection name to documents")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, docs)) = access.next_entry::<String, Vec<Document>>()? {
                    entries.push((name, docs));
                }
                Ok(CollectionData(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// The snapshot written by one backup run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Archive {
    pub metadata: ArchiveHeader,
    pub data: CollectionData,
}

impl Archive {
    pub fn new(timestamp: DateTime<Utc>, requested: Vec<String>) -> Self {
        Self {
            metadata: ArchiveHeader {
                version: ARCHIVE_FORMAT_VERSION.to_owned(),
                timestamp,
                collections: requested,
            },
            data: CollectionData::default(),
        }
    }

    pub fn push_collection(&mut self, name: impl Into<String>, documents: Vec<Document>) {
        self.data.0.push((name.into(), documents));
    }

    pub fn document_count(&self) -> u64 {
        self.data.0.iter().map(|(_, docs)| docs.len() as u64).sum()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BackupError> {
        serde_json::to_vec_pretty(self).map_err(|e| BackupError::Serialization(e.to_string()))
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, BackupError> {
        serde_json::from_slice(raw).map_err(|e| BackupError::CorruptArchive(e.to_string()))
    }
}
