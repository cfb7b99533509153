use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{BlobInfo, ItemError, OrphanScanResult};
use crate::services::RecordStore;
use crate::storage::BlobStore;

/// Finds and removes blobs that no record references.
///
/// References are snapshotted before the blob store is enumerated. A blob
/// written after the snapshot but before its record exists looks orphaned, so
/// scans that overlap active uploads can remove a just-stored input. No lock
/// guards against this.
#[derive(Clone)]
pub struct OrphanScanner {
    records: RecordStore,
    blobs: Arc<dyn BlobStore>,
}

impl OrphanScanner {
    pub fn new(records: RecordStore, blobs: Arc<dyn BlobStore>) -> Self {
        Self { records, blobs }
    }

    async fn scan(&self) -> Result<(OrphanScanResult, Vec<BlobInfo>)> {
        let referenced = self.records.referenced_blob_ids().await?;
        let all = self.blobs.list_all().await?;

        let result = OrphanScanResult {
            scanned_blobs: all.len(),
            referenced_blobs: referenced.len(),
            ..Default::default()
        };
        let orphans = all
            .into_iter()
            .filter(|blob| !referenced.contains(&blob.id))
            .collect();
        Ok((result, orphans))
    }

    /// Report orphaned blobs without deleting them
    pub async fn find_orphans(&self) -> Result<OrphanScanResult> {
        let (mut result, orphans) = self.scan().await?;
        result.freed_bytes = orphans.iter().map(|b| b.length).sum();
        result.orphan_ids = orphans.into_iter().map(|b| b.id).collect();
        Ok(result)
    }

    /// Delete every orphaned blob
    pub async fn reclaim_orphans(&self) -> Result<OrphanScanResult> {
        let (mut result, orphans) = self.scan().await?;

        for blob in orphans {
            match self.blobs.delete(&blob.id).await {
                Ok(length) => {
                    result.deleted_count += 1;
                    result.freed_bytes += length;
                    result.orphan_ids.push(blob.id);
                }
                // Removed by someone else since enumeration
                Err(AppError::BlobNotFound(_)) => {}
                Err(e) => {
                    tracing::warn!("Failed to delete orphaned blob {}: {}", blob.id, e);
                    result.errors.push(ItemError {
                        id: blob.id,
                        kind: "blob_delete_failed".to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            scanned = result.scanned_blobs,
            deleted = result.deleted_count,
            freed_bytes = result.freed_bytes,
            "Orphan scan finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::storage::DatabaseBlobStore;
    use crate::test_support::{completed, upload, FlakyBlobStore};
    use bytes::Bytes;

    #[tokio::test]
    async fn test_deletes_unreferenced_blobs() {
        let db = Database::new_in_memory().await.unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(DatabaseBlobStore::new(db.clone()));
        let records = RecordStore::new(db);
        let scanner = OrphanScanner::new(records.clone(), blobs.clone());

        // Two referenced blobs, three stray ones
        upload(&records, blobs.as_ref(), "a.pdf", 10, "u").await;
        upload(&records, blobs.as_ref(), "b.pdf", 20, "u").await;
        for size in [5usize, 6, 7] {
            blobs.store(Bytes::from(vec![0u8; size])).await.unwrap();
        }

        let preview = scanner.find_orphans().await.unwrap();
        assert_eq!(preview.orphan_ids.len(), 3);
        assert_eq!(preview.deleted_count, 0);
        assert_eq!(blobs.list_all().await.unwrap().len(), 5);

        let result = scanner.reclaim_orphans().await.unwrap();
        assert_eq!(result.scanned_blobs, 5);
        assert_eq!(result.referenced_blobs, 2);
        assert_eq!(result.deleted_count, 3);
        assert_eq!(result.freed_bytes, 18);

        let second = scanner.reclaim_orphans().await.unwrap();
        assert_eq!(second.deleted_count, 0);
        assert_eq!(blobs.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_output_blobs_count_as_referenced() {
        let db = Database::new_in_memory().await.unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(DatabaseBlobStore::new(db.clone()));
        let records = RecordStore::new(db);
        completed(&records, blobs.as_ref(), "book.epub", 10, 10, "u").await;

        let result = OrphanScanner::new(records, blobs).reclaim_orphans().await.unwrap();
        assert_eq!(result.deleted_count, 0);
        assert_eq!(result.referenced_blobs, 2);
    }

    #[tokio::test]
    async fn test_failed_delete_is_reported_and_skipped() {
        let db = Database::new_in_memory().await.unwrap();
        let flaky = FlakyBlobStore::new(db.clone());
        let records = RecordStore::new(db);
        let stuck = flaky.store(Bytes::from_static(b"stuck")).await.unwrap();
        flaky.store(Bytes::from_static(b"loose")).await.unwrap();
        flaky.fail_delete_of(&stuck);

        let result = OrphanScanner::new(records, flaky).reclaim_orphans().await.unwrap();
        assert_eq!(result.deleted_count, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].id, stuck);
    }
}
