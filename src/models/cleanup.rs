use serde::{Deserialize, Serialize};

use super::{FileRecord, FileStatus, UsageSnapshot};

/// What a complete record deletion removed
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletionOutcome {
    pub freed_bytes: i64,
    pub deleted_blobs: Vec<String>,
    pub failed_blobs: Vec<String>,
}

/// Which pass of a reclamation run deleted a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimPhase {
    Reclaimable,
    OldestCompleted,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedRecord {
    pub id: String,
    pub original_name: String,
    pub status: FileStatus,
    pub freed_bytes: i64,
    pub deleted_at: String,
    pub phase: ReclaimPhase,
    /// Blobs left behind for the orphan scan
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_blobs: Vec<String>,
}

/// A per-item failure inside a batch operation
#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    pub id: String,
    pub kind: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReclaimResult {
    pub target_fraction: f64,
    pub bytes_to_free: i64,
    pub freed_bytes: i64,
    pub initial_usage: UsageSnapshot,
    /// Absent when usage could not be recomputed after the run
    pub final_usage: Option<UsageSnapshot>,
    pub deleted: Vec<DeletedRecord>,
    pub errors: Vec<ItemError>,
}

impl ReclaimResult {
    pub fn target_met(&self) -> bool {
        self.freed_bytes >= self.bytes_to_free
    }
}

/// A record the first reclamation phase would delete
#[derive(Debug, Clone, Serialize)]
pub struct CleanupCandidate {
    pub id: String,
    pub original_name: String,
    pub status: FileStatus,
    pub uploaded_by: String,
    pub total_size: i64,
    pub created_at: String,
    pub processing_started_at: Option<String>,
}

impl From<&FileRecord> for CleanupCandidate {
    fn from(record: &FileRecord) -> Self {
        Self {
            id: record.id.clone(),
            original_name: record.original_name.clone(),
            status: record.status,
            uploaded_by: record.uploaded_by.clone(),
            total_size: record.total_size(),
            created_at: record.created_at.clone(),
            processing_started_at: record.processing_started_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupCandidatesResponse {
    pub candidates: Vec<CleanupCandidate>,
    pub count: usize,
    pub total_size: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrphanScanResult {
    pub scanned_blobs: usize,
    pub referenced_blobs: usize,
    pub deleted_count: usize,
    pub freed_bytes: i64,
    pub orphan_ids: Vec<String>,
    pub errors: Vec<ItemError>,
}

/// Oldest-first listing entry
#[derive(Debug, Clone, Serialize)]
pub struct OldestFile {
    pub id: String,
    pub original_name: String,
    pub status: FileStatus,
    pub uploaded_by: String,
    pub total_size: i64,
    pub created_at: String,
}

impl From<&FileRecord> for OldestFile {
    fn from(record: &FileRecord) -> Self {
        Self {
            id: record.id.clone(),
            original_name: record.original_name.clone(),
            status: record.status,
            uploaded_by: record.uploaded_by.clone(),
            total_size: record.total_size(),
            created_at: record.created_at.clone(),
        }
    }
}

/// Manual cleanup request
#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    #[serde(default, alias = "targetPercent")]
    pub target_percent: Option<f64>,
}

/// Bulk delete request
#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    #[serde(alias = "fileIds")]
    pub file_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkDeletedFile {
    pub id: String,
    pub original_name: String,
    pub freed_bytes: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkDeleteResult {
    pub success: bool,
    pub deleted: Vec<BulkDeletedFile>,
    pub errors: Vec<ItemError>,
    pub total_freed_size: i64,
}

#[derive(Debug, Deserialize)]
pub struct OldestFilesQuery {
    pub limit: Option<i64>,
}
