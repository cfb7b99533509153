//! Fixtures shared by the unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};

use crate::config::StorageLimits;
use crate::db::{format_timestamp, Database};
use crate::error::{AppError, Result};
use crate::models::{BlobInfo, FileRecord, FileType, NewFileRecord, NewOutputFile};
use crate::services::RecordStore;
use crate::storage::{BlobStore, DatabaseBlobStore};

pub fn new_record(name: &str, size: i64, blob_id: &str, owner: &str) -> NewFileRecord {
    NewFileRecord {
        original_name: name.to_string(),
        file_type: FileType::detect(name, None).unwrap_or(FileType::Pdf),
        file_size: size,
        input_blob_id: blob_id.to_string(),
        uploaded_by: owner.to_string(),
    }
}

/// Limits with a small capacity and the default thresholds
pub fn limits(max_bytes: i64) -> StorageLimits {
    StorageLimits {
        max_bytes,
        ..StorageLimits::default()
    }
}

/// Move a record's creation (and processing start, if any) `days` into the past
pub async fn backdate(db: &Database, id: &str, days: i64) {
    let ts = format_timestamp(Utc::now() - Duration::days(days));
    sqlx::query(
        "UPDATE file_records SET created_at = ?, processing_started_at = CASE WHEN processing_started_at IS NULL THEN NULL ELSE ? END WHERE id = ?",
    )
    .bind(&ts)
    .bind(&ts)
    .bind(id)
    .execute(db.pool())
    .await
    .unwrap();
}

/// Store `size` bytes and create an `uploaded` record pointing at them
pub async fn upload(
    records: &RecordStore,
    blobs: &dyn BlobStore,
    name: &str,
    size: usize,
    owner: &str,
) -> FileRecord {
    let blob_id = blobs.store(Bytes::from(vec![b'x'; size])).await.unwrap();
    records
        .create(new_record(name, size as i64, &blob_id, owner))
        .await
        .unwrap()
}

/// Upload, run through processing and complete with one output of `output_size` bytes
pub async fn completed(
    records: &RecordStore,
    blobs: &dyn BlobStore,
    name: &str,
    size: usize,
    output_size: usize,
    owner: &str,
) -> FileRecord {
    let record = upload(records, blobs, name, size, owner).await;
    records.mark_processing(&record.id).await.unwrap();
    let out = blobs.store(Bytes::from(vec![b'o'; output_size])).await.unwrap();
    records
        .mark_completed(
            &record.id,
            vec![NewOutputFile {
                file_name: format!("{}.html", name),
                file_size: output_size as i64,
                blob_id: out,
            }],
        )
        .await
        .unwrap()
}

/// Upload, start processing and report failure
pub async fn failed(
    records: &RecordStore,
    blobs: &dyn BlobStore,
    name: &str,
    size: usize,
    owner: &str,
) -> FileRecord {
    let record = upload(records, blobs, name, size, owner).await;
    records.mark_processing(&record.id).await.unwrap();
    records.mark_failed(&record.id, "conversion crashed").await.unwrap()
}

/// Database-backed store that can be told to fail deletes or enumeration
pub struct FlakyBlobStore {
    inner: DatabaseBlobStore,
    failing_deletes: Mutex<HashSet<String>>,
    fail_listing: Mutex<bool>,
}

impl FlakyBlobStore {
    pub fn new(db: Database) -> Arc<Self> {
        Arc::new(Self {
            inner: DatabaseBlobStore::new(db),
            failing_deletes: Mutex::new(HashSet::new()),
            fail_listing: Mutex::new(false),
        })
    }

    pub fn fail_delete_of(&self, id: &str) {
        self.failing_deletes.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_listing(&self, fail: bool) {
        *self.fail_listing.lock().unwrap() = fail;
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn store(&self, data: Bytes) -> Result<String> {
        self.inner.store(data).await
    }

    async fn fetch(&self, id: &str) -> Result<Bytes> {
        self.inner.fetch(id).await
    }

    async fn delete(&self, id: &str) -> Result<i64> {
        if self.failing_deletes.lock().unwrap().contains(id) {
            return Err(AppError::BlobDeleteFailed {
                blob_id: id.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.inner.delete(id).await
    }

    async fn list_all(&self) -> Result<Vec<BlobInfo>> {
        if *self.fail_listing.lock().unwrap() {
            return Err(AppError::StoreUnavailable("injected outage".to_string()));
        }
        self.inner.list_all().await
    }

    fn store_type(&self) -> &'static str {
        "flaky"
    }
}
