use std::sync::Arc;

use bytes::Bytes;

use crate::error::{AppError, Result};
use crate::models::{
    BulkDeleteResult, BulkDeletedFile, CurrentUser, DeletionOutcome, FileRecord, FileStatus,
    FileType, ItemError, NewFileRecord, NewOutputFile, RecordFilter,
};
use crate::services::reclaim::delete_record_completely;
use crate::services::{AdmissionController, ReclamationEngine, RecordStore};
use crate::storage::BlobStore;

/// Bytes handed back to a downloader
#[derive(Debug)]
pub struct Download {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Manuscript uploads, downloads, conversion reports and deletion
#[derive(Clone)]
pub struct FileService {
    records: RecordStore,
    blobs: Arc<dyn BlobStore>,
    admission: AdmissionController,
    reclamation: Arc<ReclamationEngine>,
}

impl FileService {
    pub fn new(
        records: RecordStore,
        blobs: Arc<dyn BlobStore>,
        admission: AdmissionController,
        reclamation: Arc<ReclamationEngine>,
    ) -> Self {
        Self {
            records,
            blobs,
            admission,
            reclamation,
        }
    }

    /// Accept a manuscript: admission check, store the bytes, create the record.
    ///
    /// A cleanup hint from admission starts a background reclamation whether
    /// or not this upload is admitted.
    pub async fn upload(
        &self,
        owner: &str,
        file_name: &str,
        content_type: Option<&str>,
        data: Bytes,
    ) -> Result<FileRecord> {
        let file_name = file_name.trim();
        if file_name.is_empty() || file_name.contains('/') || file_name.contains('\\') {
            return Err(AppError::BadRequest("Invalid file name".to_string()));
        }
        let file_type = FileType::detect(file_name, content_type).ok_or_else(|| {
            AppError::BadRequest("Only PDF and EPUB manuscripts are accepted".to_string())
        })?;
        if data.is_empty() {
            return Err(AppError::BadRequest("Empty file".to_string()));
        }

        let file_size = data.len() as i64;
        let decision = self.admission.check_admission(file_size).await;
        if decision.should_cleanup && self.reclamation.trigger_background() {
            tracing::info!("Storage above cleanup threshold, background reclamation started");
        }
        decision.into_result()?;

        let blob_id = self.blobs.store(data).await?;
        let created = self
            .records
            .create(NewFileRecord {
                original_name: file_name.to_string(),
                file_type,
                file_size,
                input_blob_id: blob_id.clone(),
                uploaded_by: owner.to_string(),
            })
            .await;

        match created {
            Ok(record) => {
                tracing::info!(
                    record_id = %record.id,
                    owner,
                    file_size,
                    "Accepted {} upload {}",
                    file_type.as_str(),
                    file_name
                );
                Ok(record)
            }
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&blob_id).await {
                    tracing::warn!("Failed to remove blob {} after record error: {}", blob_id, cleanup);
                }
                Err(e)
            }
        }
    }

    /// The caller's records, newest first
    pub async fn list_for(&self, user: &CurrentUser) -> Result<Vec<FileRecord>> {
        self.records
            .find(&RecordFilter {
                uploaded_by: Some(user.id.clone()),
                ..Default::default()
            })
            .await
    }

    /// A record the caller owns, or any record for admins
    pub async fn get_visible(&self, user: &CurrentUser, id: &str) -> Result<FileRecord> {
        let record = self.records.get(id).await?;
        if !user.is_admin() && record.uploaded_by != user.id {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }
        Ok(record)
    }

    pub async fn download_input(&self, user: &CurrentUser, id: &str) -> Result<Download> {
        let record = self.get_visible(user, id).await?;
        self.input_of(&record).await
    }

    /// Output `index` (zero-based, in worker order) of a visible record
    pub async fn download_output(
        &self,
        user: &CurrentUser,
        id: &str,
        index: usize,
    ) -> Result<Download> {
        let record = self.get_visible(user, id).await?;
        let output = record
            .output_files
            .get(index)
            .ok_or_else(|| AppError::NotFound(format!("Output {} of record {}", index, id)))?;

        let blob_id = match (&output.blob_id, output.stored_in_blob_store) {
            (Some(blob_id), true) => blob_id,
            _ => {
                return Err(AppError::NotFound(format!(
                    "Output {} of record {} is not held in the blob store",
                    index, id
                )))
            }
        };

        let data = self.blobs.fetch(blob_id).await?;
        Ok(Download {
            content_type: mime_guess::from_path(&output.file_name)
                .first_or_octet_stream()
                .to_string(),
            file_name: output.file_name.clone(),
            data,
        })
    }

    /// Completely delete a record the caller owns (admins may delete any)
    pub async fn delete(&self, user: &CurrentUser, id: &str) -> Result<DeletionOutcome> {
        let record = self.get_visible(user, id).await?;
        delete_record_completely(&self.records, self.blobs.as_ref(), &record).await
    }

    /// Completely delete each id. Failures are reported per id and never stop the batch.
    pub async fn delete_many(&self, ids: &[String]) -> BulkDeleteResult {
        let mut result = BulkDeleteResult::default();

        for id in ids {
            let deleted = match self.records.get(id).await {
                Ok(record) => delete_record_completely(&self.records, self.blobs.as_ref(), &record)
                    .await
                    .map(|outcome| (record, outcome)),
                Err(e) => Err(e),
            };

            match deleted {
                Ok((record, outcome)) => {
                    result.total_freed_size += outcome.freed_bytes;
                    result.deleted.push(BulkDeletedFile {
                        id: record.id,
                        original_name: record.original_name,
                        freed_bytes: outcome.freed_bytes,
                    });
                }
                Err(e) => {
                    tracing::warn!("Bulk delete of {} failed: {}", id, e);
                    result.errors.push(ItemError {
                        id: id.clone(),
                        kind: e.kind().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        result.success = !result.deleted.is_empty();
        tracing::info!(
            deleted = result.deleted.len(),
            failed = result.errors.len(),
            freed_bytes = result.total_freed_size,
            "Bulk delete finished"
        );
        result
    }

    /// Input bytes for the conversion worker
    pub async fn worker_input(&self, id: &str) -> Result<Download> {
        let record = self.records.get(id).await?;
        self.input_of(&record).await
    }

    pub async fn start_conversion(&self, id: &str) -> Result<FileRecord> {
        let record = self.records.mark_processing(id).await?;
        tracing::info!(record_id = %id, "Conversion started");
        Ok(record)
    }

    /// Store the worker's outputs and mark the record completed.
    /// Output blobs are removed again if the transition is refused.
    pub async fn complete_conversion(
        &self,
        id: &str,
        outputs: Vec<(String, Bytes)>,
    ) -> Result<FileRecord> {
        let record = self.records.get(id).await?;
        if record.status != FileStatus::Processing {
            return Err(AppError::Conflict(format!(
                "Record {} is {}, not processing",
                id,
                record.status.as_str()
            )));
        }

        let mut stored: Vec<NewOutputFile> = Vec::with_capacity(outputs.len());
        for (file_name, data) in outputs {
            let file_size = data.len() as i64;
            match self.blobs.store(data).await {
                Ok(blob_id) => stored.push(NewOutputFile {
                    file_name,
                    file_size,
                    blob_id,
                }),
                Err(e) => {
                    self.discard_outputs(&stored).await;
                    return Err(e);
                }
            }
        }

        match self.records.mark_completed(id, stored.clone()).await {
            Ok(record) => {
                tracing::info!(record_id = %id, outputs = record.output_files.len(), "Conversion completed");
                Ok(record)
            }
            Err(e) => {
                self.discard_outputs(&stored).await;
                Err(e)
            }
        }
    }

    pub async fn fail_conversion(&self, id: &str, error: &str) -> Result<FileRecord> {
        let record = self.records.mark_failed(id, error).await?;
        tracing::warn!(record_id = %id, "Conversion failed: {}", error);
        Ok(record)
    }

    async fn input_of(&self, record: &FileRecord) -> Result<Download> {
        let blob_id = record.input_blob_id.as_deref().ok_or_else(|| {
            AppError::NotFound(format!("Record {} has no input blob", record.id))
        })?;
        let data = self.blobs.fetch(blob_id).await?;
        Ok(Download {
            file_name: record.original_name.clone(),
            content_type: record.file_type.mime_type().to_string(),
            data,
        })
    }

    async fn discard_outputs(&self, outputs: &[NewOutputFile]) {
        for output in outputs {
            if let Err(e) = self.blobs.delete(&output.blob_id).await {
                tracing::warn!("Failed to discard output blob {}: {}", output.blob_id, e);
            }
        }
    }
}
