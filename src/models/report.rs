use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{FileStatus, FileType, UsageSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct StatusBreakdown {
    pub status: FileStatus,
    pub count: i64,
    pub total_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct OwnerBreakdown {
    pub uploaded_by: String,
    pub count: i64,
    pub total_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct FileTypeBreakdown {
    pub file_type: FileType,
    pub count: i64,
    pub total_bytes: i64,
}

/// Usage plus grouped aggregations over all records
#[derive(Debug, Clone, Serialize)]
pub struct StorageReport {
    pub usage: UsageSnapshot,
    pub record_count: i64,
    pub logical_bytes: i64,
    pub by_status: Vec<StatusBreakdown>,
    pub top_owners: Vec<OwnerBreakdown>,
    pub by_file_type: Vec<FileTypeBreakdown>,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub top: Option<i64>,
}
