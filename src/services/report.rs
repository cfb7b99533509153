use crate::error::Result;
use crate::models::{FileRecord, OldestFile, RecordFilter, StorageReport};
use crate::services::{RecordStore, UsageAccountant};

/// Owners listed in a report unless the caller asks otherwise
pub const DEFAULT_TOP_OWNERS: i64 = 10;

/// Read-only aggregations over records, recomputed on every call
#[derive(Clone)]
pub struct Reporter {
    records: RecordStore,
    accountant: UsageAccountant,
}

impl Reporter {
    pub fn new(records: RecordStore, accountant: UsageAccountant) -> Self {
        Self {
            records,
            accountant,
        }
    }

    pub async fn storage_report(&self, top_owners: i64) -> Result<StorageReport> {
        let usage = self.accountant.compute_usage().await?;
        let by_status = self.records.totals_by_status().await?;
        let top_owners = self.records.top_owners(top_owners).await?;
        let by_file_type = self.records.totals_by_file_type().await?;

        Ok(StorageReport {
            usage,
            record_count: by_status.iter().map(|s| s.count).sum(),
            logical_bytes: by_status.iter().map(|s| s.total_bytes).sum(),
            by_status,
            top_owners,
            by_file_type,
        })
    }

    /// The `limit` oldest records with their total sizes
    pub async fn oldest_records(&self, limit: i64) -> Result<Vec<OldestFile>> {
        let records: Vec<FileRecord> = self
            .records
            .find(&RecordFilter {
                oldest_first: true,
                limit: Some(limit),
                ..Default::default()
            })
            .await?;
        Ok(records.iter().map(OldestFile::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{FileStatus, FileType, OwnerBreakdown};
    use crate::storage::{BlobStore, DatabaseBlobStore};
    use crate::test_support::{backdate, completed, failed, limits, upload};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_report_groups() {
        let db = Database::new_in_memory().await.unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(DatabaseBlobStore::new(db.clone()));
        let records = RecordStore::new(db.clone());
        let reporter = Reporter::new(
            records.clone(),
            UsageAccountant::new(blobs.clone(), limits(10_000)),
        );

        completed(&records, blobs.as_ref(), "a.pdf", 100, 50, "alice").await;
        completed(&records, blobs.as_ref(), "b.epub", 200, 20, "bob").await;
        failed(&records, blobs.as_ref(), "c.pdf", 30, "alice").await;
        let old = upload(&records, blobs.as_ref(), "d.epub", 40, "carol").await;
        backdate(&db, &old.id, 3).await;

        let report = reporter.storage_report(2).await.unwrap();
        assert_eq!(report.usage.total_bytes, 440);
        assert_eq!(report.record_count, 4);
        assert_eq!(report.logical_bytes, 440);

        let completed_row = report
            .by_status
            .iter()
            .find(|s| s.status == FileStatus::Completed)
            .unwrap();
        assert_eq!(completed_row.count, 2);
        assert_eq!(completed_row.total_bytes, 370);

        assert_eq!(
            report.top_owners,
            vec![
                OwnerBreakdown {
                    uploaded_by: "bob".to_string(),
                    count: 1,
                    total_bytes: 220,
                },
                OwnerBreakdown {
                    uploaded_by: "alice".to_string(),
                    count: 2,
                    total_bytes: 180,
                },
            ]
        );

        let epub = report
            .by_file_type
            .iter()
            .find(|t| t.file_type == FileType::Epub)
            .unwrap();
        assert_eq!(epub.count, 2);
        assert_eq!(epub.total_bytes, 260);

        let oldest = reporter.oldest_records(1).await.unwrap();
        assert_eq!(oldest.len(), 1);
        assert_eq!(oldest[0].id, old.id);
        assert_eq!(oldest[0].total_size, 40);
    }
}
