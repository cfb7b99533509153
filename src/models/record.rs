use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Conversion status of a manuscript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum FileStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Uploaded => "uploaded",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "uploaded" => Some(FileStatus::Uploaded),
            "processing" => Some(FileStatus::Processing),
            "completed" => Some(FileStatus::Completed),
            "failed" => Some(FileStatus::Failed),
            _ => None,
        }
    }
}

/// Accepted manuscript formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Epub,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Epub => "epub",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            FileType::Pdf => "application/pdf",
            FileType::Epub => "application/epub+zip",
        }
    }

    /// Detect the format from the upload's content type, falling back to the extension
    pub fn detect(file_name: &str, content_type: Option<&str>) -> Option<Self> {
        match content_type.map(|c| c.to_lowercase()) {
            Some(c) if c == "application/pdf" => return Some(FileType::Pdf),
            Some(c) if c == "application/epub+zip" => return Some(FileType::Epub),
            _ => {}
        }

        let ext = file_name.rsplit_once('.')?.1.to_lowercase();
        match ext.as_str() {
            "pdf" => Some(FileType::Pdf),
            "epub" => Some(FileType::Epub),
            _ => None,
        }
    }
}

/// One artifact produced by the conversion worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputFile {
    pub file_name: String,
    pub file_size: i64,
    pub blob_id: Option<String>,
    pub stored_in_blob_store: bool,
}

/// An uploaded manuscript and its conversion outputs
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FileRecord {
    pub id: String,
    pub original_name: String,
    pub file_type: FileType,
    pub file_size: i64,
    pub status: FileStatus,
    pub input_blob_id: Option<String>,
    pub uploaded_by: String,
    pub error_message: Option<String>,
    pub created_at: String,
    pub processing_started_at: Option<String>,
    pub processing_completed_at: Option<String>,
    pub updated_at: String,
    #[sqlx(skip)]
    pub output_files: Vec<OutputFile>,
}

impl FileRecord {
    /// Input size plus every output size
    pub fn total_size(&self) -> i64 {
        self.file_size + self.output_files.iter().map(|o| o.file_size).sum::<i64>()
    }

    /// Blobs that a complete deletion must remove
    pub fn owned_blob_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.input_blob_id.as_deref().into_iter().collect();
        ids.extend(
            self.output_files
                .iter()
                .filter(|o| o.stored_in_blob_store)
                .filter_map(|o| o.blob_id.as_deref()),
        );
        ids
    }

    /// Same rule as the reclaimable-records query: failed, or unfinished
    /// since before `stale_before`
    pub fn is_reclaimable(&self, stale_before: &str) -> bool {
        match self.status {
            FileStatus::Failed => true,
            FileStatus::Uploaded => self.created_at.as_str() < stale_before,
            FileStatus::Processing => {
                self.processing_started_at
                    .as_deref()
                    .unwrap_or(self.created_at.as_str())
                    < stale_before
            }
            FileStatus::Completed => false,
        }
    }
}

/// Fields supplied when a manuscript upload is accepted
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub original_name: String,
    pub file_type: FileType,
    pub file_size: i64,
    pub input_blob_id: String,
    pub uploaded_by: String,
}

/// Output reported by the worker once its bytes are stored
#[derive(Debug, Clone)]
pub struct NewOutputFile {
    pub file_name: String,
    pub file_size: i64,
    pub blob_id: String,
}

/// Filter for record queries; unset fields do not constrain
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub statuses: Vec<FileStatus>,
    pub uploaded_by: Option<String>,
    pub created_before: Option<String>,
    pub created_after: Option<String>,
    pub oldest_first: bool,
    pub limit: Option<i64>,
}

/// Worker failure report
#[derive(Debug, Deserialize)]
pub struct FailConversionRequest {
    pub error: String,
}
