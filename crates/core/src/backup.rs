use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BackupError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    InProgress,
    Success,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::InProgress => "in_progress",
            BackupStatus::Success => "success",
            BackupStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BackupStatus::InProgress)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collection that could not be read during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionError {
    pub collection: String,
    pub message: String,
}

/// Metadata record for one backup run, persisted as the run's sidecar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupRun {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    /// Collections the run was asked to capture.
    #[serde(default)]
    pub requested_collections: Vec<String>,
    /// Collections actually captured; may be a subset of `requested_collections`.
    pub collections: Vec<String>,
    #[serde(default)]
    pub collection_errors: Vec<CollectionError>,
    #[serde(default)]
    pub document_count: u64,
    pub size_bytes: u64,
    pub checksum: String,
    pub compressed: bool,
    pub encrypted: bool,
    pub status: BackupStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of a successful run, applied by [`BackupRun::mark_success`].
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub collections: Vec<String>,
    pub collection_errors: Vec<CollectionError>,
    pub document_count: u64,
    pub size_bytes: u64,
    pub checksum: String,
}

impl BackupRun {
    pub fn started(
        created_at: DateTime<Utc>,
        requested_collections: Vec<String>,
        compressed: bool,
        encrypted: bool,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            created_at,
            completed_at: None,
            duration_ms: None,
            requested_collections,
            collections: Vec::new(),
            collection_errors: Vec::new(),
            document_count: 0,
            size_bytes: 0,
            checksum: String::new(),
            compressed,
            encrypted,
            status: BackupStatus::InProgress,
            error: None,
        }
    }

    pub fn mark_success(
        &mut self,
        outcome: RunOutcome,
        completed_at: DateTime<Utc>,
    ) -> Result<(), BackupError> {
        self.transition(BackupStatus::Success)?;
        self.collections = outcome.collections;
        self.collection_errors = outcome.collection_errors;
        self.document_count = outcome.document_count;
        self.size_bytes = outcome.size_bytes;
        self.checksum = outcome.checksum;
        self.finish(completed_at);
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        error: impl Into<String>,
        collection_errors: Vec<CollectionError>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), BackupError> {
        self.transition(BackupStatus::Failed)?;
        self.error = Some(error.into());
        self.collection_errors = collection_errors;
        self.finish(completed_at);
        Ok(())
    }

    fn transition(&mut self, to: BackupStatus) -> Result<(), BackupError> {
        if self.status.is_terminal() {
            return Err(BackupError::InvalidStatusTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    fn finish(&mut self, completed_at: DateTime<Utc>) {
        self.duration_ms = Some((completed_at - self.created_at).num_milliseconds());
        self.completed_at = Some(completed_at);
    }
}

/// Aggregate view over every recorded run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupStats {
    pub count: usize,
    pub total_size_bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub failed_count: usize,
}

impl BackupStats {
    pub fn from_runs(runs: &[BackupRun]) -> Self {
        Self {
            count: runs.len(),
            total_size_bytes: runs.iter().map(|r| r.size_bytes).sum(),
            oldest: runs.iter().map(|r| r.created_at).min(),
            newest: runs.iter().map(|r| r.created_at).max(),
            failed_count: runs
                .iter()
                .filter(|r| r.status == BackupStatus::Failed)
                .count(),
        }
    }
}
