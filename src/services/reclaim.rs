use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::config::StorageLimits;
use crate::db::{format_timestamp, now_timestamp};
use crate::error::{AppError, Result};
use crate::models::{
    CleanupCandidate, CleanupCandidatesResponse, DeletedRecord, DeletionOutcome, FileRecord,
    FileStatus, ItemError, ReclaimPhase, ReclaimResult, RecordFilter,
};
use crate::services::{RecordStore, UsageAccountant};
use crate::storage::BlobStore;

/// Delete every blob a record owns, then the record itself.
///
/// Blobs that are already gone count as zero bytes. Other blob failures are
/// logged and skipped so a half-deleted record can still be cleaned up. Safe
/// to retry.
pub async fn delete_record_completely(
    records: &RecordStore,
    blobs: &dyn BlobStore,
    record: &FileRecord,
) -> Result<DeletionOutcome> {
    let mut outcome = DeletionOutcome::default();

    for blob_id in record.owned_blob_ids() {
        match blobs.delete(blob_id).await {
            Ok(length) => {
                outcome.freed_bytes += length;
                outcome.deleted_blobs.push(blob_id.to_string());
            }
            Err(AppError::BlobNotFound(_)) => {
                tracing::debug!("Blob {} of record {} already gone", blob_id, record.id);
            }
            Err(e) => {
                let err = AppError::BlobDeleteFailed {
                    blob_id: blob_id.to_string(),
                    reason: e.to_string(),
                };
                tracing::warn!("Record {}: {}", record.id, err);
                outcome.failed_blobs.push(blob_id.to_string());
            }
        }
    }

    if !records.delete(&record.id).await? {
        tracing::debug!("Record {} was already deleted", record.id);
    }

    tracing::info!(
        record_id = %record.id,
        freed_bytes = outcome.freed_bytes,
        blobs = outcome.deleted_blobs.len(),
        "Deleted record"
    );
    Ok(outcome)
}

/// Frees space by deleting records, reclaimable ones first
pub struct ReclamationEngine {
    records: RecordStore,
    blobs: Arc<dyn BlobStore>,
    accountant: UsageAccountant,
    limits: StorageLimits,
    background_running: AtomicBool,
}

impl ReclamationEngine {
    pub fn new(
        records: RecordStore,
        blobs: Arc<dyn BlobStore>,
        accountant: UsageAccountant,
        limits: StorageLimits,
    ) -> Self {
        Self {
            records,
            blobs,
            accountant,
            limits,
            background_running: AtomicBool::new(false),
        }
    }

    /// Cutoff before which unfinished records count as abandoned
    fn stale_before(&self) -> String {
        format_timestamp(Utc::now() - Duration::days(self.limits.stale_after_days))
    }

    /// Phase-one candidates, oldest first, without deleting anything
    pub async fn cleanup_candidates(&self) -> Result<CleanupCandidatesResponse> {
        let records = self.records.reclaimable(&self.stale_before()).await?;
        let candidates: Vec<CleanupCandidate> = records.iter().map(CleanupCandidate::from).collect();
        let total_size = candidates.iter().map(|c| c.total_size).sum();

        Ok(CleanupCandidatesResponse {
            count: candidates.len(),
            candidates,
            total_size,
        })
    }

    /// Reclaim down to the configured post-cleanup target
    pub async fn reclaim_default(&self) -> Result<ReclaimResult> {
        self.reclaim_to(self.limits.target_after_cleanup_fraction).await
    }

    /// Delete records until usage is at or below `target_fraction` of capacity.
    ///
    /// Failed, stale and stuck records go first. Completed records are only
    /// touched when those are not enough, oldest first and at most
    /// `fallback_batch_size` per call.
    pub async fn reclaim_to(&self, target_fraction: f64) -> Result<ReclaimResult> {
        let initial = self.accountant.compute_usage().await?;
        // Rounded down so the run never stops above the requested fraction
        let target_bytes = (self.limits.max_bytes as f64 * target_fraction).floor() as i64;

        let mut result = ReclaimResult {
            target_fraction,
            bytes_to_free: (initial.total_bytes - target_bytes).max(0),
            freed_bytes: 0,
            initial_usage: initial.clone(),
            final_usage: None,
            deleted: Vec::new(),
            errors: Vec::new(),
        };

        if initial.total_bytes <= target_bytes {
            tracing::debug!(
                "Usage {} bytes already within target {} bytes",
                initial.total_bytes,
                target_bytes
            );
            result.final_usage = Some(initial);
            return Ok(result);
        }

        tracing::info!(
            "Reclaiming {} bytes (usage {:.1}%, target {:.1}%)",
            result.bytes_to_free,
            initial.usage_percent,
            target_fraction * 100.0
        );

        let stale_before = self.stale_before();
        let reclaimable = self.records.reclaimable(&stale_before).await?;
        self.delete_in_order(reclaimable, ReclaimPhase::Reclaimable, &stale_before, &mut result)
            .await;

        if !result.target_met() {
            let oldest_completed = self
                .records
                .find(&RecordFilter {
                    statuses: vec![FileStatus::Completed],
                    oldest_first: true,
                    limit: Some(self.limits.fallback_batch_size),
                    ..Default::default()
                })
                .await?;
            tracing::info!(
                "Reclaimable records freed {} of {} bytes, falling back to {} oldest completed",
                result.freed_bytes,
                result.bytes_to_free,
                oldest_completed.len()
            );
            self.delete_in_order(
                oldest_completed,
                ReclaimPhase::OldestCompleted,
                &stale_before,
                &mut result,
            )
            .await;
        }

        result.final_usage = match self.accountant.compute_usage().await {
            Ok(usage) => Some(usage),
            Err(e) => {
                tracing::warn!("Could not recompute usage after reclamation: {}", e);
                None
            }
        };

        tracing::info!(
            freed_bytes = result.freed_bytes,
            deleted = result.deleted.len(),
            errors = result.errors.len(),
            "Reclamation finished"
        );
        Ok(result)
    }

    /// Delete candidates in order until the target is met.
    ///
    /// Each candidate is re-read first. A record that changed state or
    /// vanished since the listing is skipped.
    async fn delete_in_order(
        &self,
        candidates: Vec<FileRecord>,
        phase: ReclaimPhase,
        stale_before: &str,
        result: &mut ReclaimResult,
    ) {
        for candidate in candidates {
            if result.target_met() {
                break;
            }

            let record = match self.records.get(&candidate.id).await {
                Ok(record) => record,
                Err(AppError::RecordNotFound(_)) => {
                    tracing::debug!("Record {} vanished before reclamation", candidate.id);
                    continue;
                }
                Err(e) => {
                    self.push_error(result, candidate.id, e);
                    continue;
                }
            };

            let still_eligible = match phase {
                ReclaimPhase::Reclaimable => record.is_reclaimable(stale_before),
                ReclaimPhase::OldestCompleted => record.status == FileStatus::Completed,
            };
            if !still_eligible {
                tracing::debug!(
                    "Record {} is now {}, skipping",
                    record.id,
                    record.status.as_str()
                );
                continue;
            }

            match delete_record_completely(&self.records, self.blobs.as_ref(), &record).await {
                Ok(outcome) => {
                    result.freed_bytes += outcome.freed_bytes;
                    result.deleted.push(DeletedRecord {
                        id: record.id,
                        original_name: record.original_name,
                        status: record.status,
                        freed_bytes: outcome.freed_bytes,
                        deleted_at: now_timestamp(),
                        phase,
                        failed_blobs: outcome.failed_blobs,
                    });
                }
                Err(e) => self.push_error(result, record.id, e),
            }
        }
    }

    fn push_error(&self, result: &mut ReclaimResult, id: String, e: AppError) {
        tracing::warn!("Failed to reclaim record {}: {}", id, e);
        result.errors.push(ItemError {
            id,
            kind: e.kind().to_string(),
            error: e.to_string(),
        });
    }

    /// Start a background run to the default target unless one is already going
    pub fn trigger_background(self: &Arc<Self>) -> bool {
        if self
            .background_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Background reclamation already running");
            return false;
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            match engine.reclaim_default().await {
                Ok(result) => tracing::info!(
                    "Background reclamation freed {} bytes from {} records",
                    result.freed_bytes,
                    result.deleted.len()
                ),
                Err(e) => tracing::error!("Background reclamation failed: {}", e),
            }
            engine.background_running.store(false, Ordering::Release);
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::NewOutputFile;
    use crate::storage::DatabaseBlobStore;
    use bytes::Bytes;
    use crate::test_support::{backdate, completed, failed, limits, upload, FlakyBlobStore};

    struct Fixture {
        db: Database,
        records: RecordStore,
        blobs: Arc<dyn BlobStore>,
        engine: Arc<ReclamationEngine>,
    }

    fn fixture_with(db: Database, blobs: Arc<dyn BlobStore>, limits: StorageLimits) -> Fixture {
        let records = RecordStore::new(db.clone());
        let accountant = UsageAccountant::new(blobs.clone(), limits.clone());
        let engine = Arc::new(ReclamationEngine::new(
            records.clone(),
            blobs.clone(),
            accountant,
            limits,
        ));
        Fixture {
            db,
            records,
            blobs,
            engine,
        }
    }

    async fn fixture(max_bytes: i64) -> Fixture {
        let db = Database::new_in_memory().await.unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(DatabaseBlobStore::new(db.clone()));
        fixture_with(db, blobs, limits(max_bytes))
    }

    #[tokio::test]
    async fn test_noop_when_under_target() {
        let f = fixture(1000).await;
        failed(&f.records, f.blobs.as_ref(), "bad.pdf", 100, "u").await;
        completed(&f.records, f.blobs.as_ref(), "ok.pdf", 100, 100, "u").await;

        // 300 / 1000 = 30% is under a 70% target
        let result = f.engine.reclaim_to(0.70).await.unwrap();
        assert_eq!(result.freed_bytes, 0);
        assert!(result.deleted.is_empty());
        assert_eq!(result.bytes_to_free, 0);

        // Exactly at target also does nothing
        let result = f.engine.reclaim_to(0.30).await.unwrap();
        assert_eq!(result.freed_bytes, 0);
        assert_eq!(f.engine.accountant.compute_usage().await.unwrap().total_bytes, 300);
    }

    #[tokio::test]
    async fn test_reclaimable_records_go_before_completed_work() {
        let f = fixture(1000).await;
        let done = completed(&f.records, f.blobs.as_ref(), "old-done.pdf", 200, 100, "u").await;
        backdate(&f.db, &done.id, 90).await;

        let bad = failed(&f.records, f.blobs.as_ref(), "bad.pdf", 150, "u").await;
        let abandoned = upload(&f.records, f.blobs.as_ref(), "abandoned.epub", 150, "u").await;
        backdate(&f.db, &abandoned.id, 31).await;
        let stuck = upload(&f.records, f.blobs.as_ref(), "stuck.pdf", 100, "u").await;
        f.records.mark_processing(&stuck.id).await.unwrap();
        backdate(&f.db, &stuck.id, 60).await;
        let fresh = upload(&f.records, f.blobs.as_ref(), "fresh.pdf", 100, "u").await;

        // 800 bytes stored; target 50% means freeing 300
        let result = f.engine.reclaim_to(0.50).await.unwrap();

        let deleted: Vec<&str> = result.deleted.iter().map(|d| d.id.as_str()).collect();
        // Oldest created first: stuck (60d) then abandoned (31d) reach 250, then the failure
        assert_eq!(deleted, vec![stuck.id.as_str(), abandoned.id.as_str(), bad.id.as_str()]);
        assert!(result
            .deleted
            .iter()
            .all(|d| d.phase == ReclaimPhase::Reclaimable));
        assert_eq!(result.freed_bytes, 400);
        assert!(result.target_met());
        assert_eq!(result.final_usage.unwrap().total_bytes, 400);

        // Completed and fresh work survive
        assert!(f.records.get(&done.id).await.is_ok());
        assert!(f.records.get(&fresh.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_stops_as_soon_as_target_is_met() {
        let f = fixture(1000).await;
        let first = failed(&f.records, f.blobs.as_ref(), "a.pdf", 300, "u").await;
        backdate(&f.db, &first.id, 2).await;
        let second = failed(&f.records, f.blobs.as_ref(), "b.pdf", 300, "u").await;
        backdate(&f.db, &second.id, 1).await;
        upload(&f.records, f.blobs.as_ref(), "c.pdf", 300, "u").await;

        // 900 stored, target 70% -> free 200; the first failure covers it
        let result = f.engine.reclaim_to(0.70).await.unwrap();
        assert_eq!(result.deleted.len(), 1);
        assert_eq!(result.deleted[0].id, first.id);
        assert!(f.records.get(&second.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_falls_back_to_oldest_completed() {
        let f = fixture(1000).await;
        let older = completed(&f.records, f.blobs.as_ref(), "older.pdf", 200, 100, "u").await;
        backdate(&f.db, &older.id, 10).await;
        let newer = completed(&f.records, f.blobs.as_ref(), "newer.pdf", 200, 100, "u").await;
        backdate(&f.db, &newer.id, 5).await;
        let bad = failed(&f.records, f.blobs.as_ref(), "bad.pdf", 100, "u").await;

        // 700 stored, target 40% -> free 300: the failure gives 100, then the older completed
        let result = f.engine.reclaim_to(0.40).await.unwrap();
        let phases: Vec<(String, ReclaimPhase)> = result
            .deleted
            .iter()
            .map(|d| (d.id.clone(), d.phase))
            .collect();
        assert_eq!(
            phases,
            vec![
                (bad.id.clone(), ReclaimPhase::Reclaimable),
                (older.id.clone(), ReclaimPhase::OldestCompleted),
            ]
        );
        assert_eq!(result.freed_bytes, 400);
        assert!(f.records.get(&newer.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_fallback_batch_is_bounded() {
        let db = Database::new_in_memory().await.unwrap();
        let blobs: Arc<dyn BlobStore> = Arc::new(DatabaseBlobStore::new(db.clone()));
        let f = fixture_with(
            db,
            blobs,
            StorageLimits {
                fallback_batch_size: 2,
                ..limits(1000)
            },
        );
        for i in 0..4 {
            completed(&f.records, f.blobs.as_ref(), &format!("{}.pdf", i), 150, 50, "u").await;
        }

        // 800 stored, free everything down to 10%: only two completed records may go per call
        let result = f.engine.reclaim_to(0.10).await.unwrap();
        assert_eq!(result.deleted.len(), 2);
        assert!(!result.target_met());

        let again = f.engine.reclaim_to(0.10).await.unwrap();
        assert_eq!(again.deleted.len(), 2);
    }

    #[tokio::test]
    async fn test_blob_failure_does_not_abort_run() {
        let db = Database::new_in_memory().await.unwrap();
        let flaky = FlakyBlobStore::new(db.clone());
        let f = fixture_with(db, flaky.clone(), limits(1000));

        let first = failed(&f.records, f.blobs.as_ref(), "a.pdf", 300, "u").await;
        backdate(&f.db, &first.id, 3).await;
        let second = failed(&f.records, f.blobs.as_ref(), "b.pdf", 300, "u").await;
        flaky.fail_delete_of(first.input_blob_id.as_deref().unwrap());

        // 600 stored, target 10% -> free 500
        let result = f.engine.reclaim_to(0.10).await.unwrap();

        // The first record is still deleted (its blob is now orphaned), the second frees bytes
        assert_eq!(result.deleted.len(), 2);
        assert_eq!(result.deleted[0].freed_bytes, 0);
        assert_eq!(
            result.deleted[0].failed_blobs,
            vec![first.input_blob_id.clone().unwrap()]
        );
        assert_eq!(result.deleted[1].freed_bytes, 300);
        assert!(result.deleted[1].failed_blobs.is_empty());
        assert!(result.errors.is_empty());
        assert!(f.records.get(&first.id).await.is_err());
        assert!(f.records.get(&second.id).await.is_err());
    }

    #[tokio::test]
    async fn test_record_delete_failure_is_reported_and_run_continues() {
        let f = fixture(1000).await;
        let first = failed(&f.records, f.blobs.as_ref(), "a.pdf", 300, "u").await;
        backdate(&f.db, &first.id, 3).await;
        let second = failed(&f.records, f.blobs.as_ref(), "b.pdf", 300, "u").await;

        sqlx::query(&format!(
            "CREATE TRIGGER block_delete BEFORE DELETE ON file_records \
             WHEN OLD.id = '{}' BEGIN SELECT RAISE(ABORT, 'locked'); END",
            first.id
        ))
        .execute(f.db.pool())
        .await
        .unwrap();

        // 600 stored, target 10% -> free 500
        let result = f.engine.reclaim_to(0.10).await.unwrap();

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].id, first.id);
        assert_eq!(result.errors[0].kind, "store_unavailable");
        let deleted: Vec<&str> = result.deleted.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(deleted, vec![second.id.as_str()]);
        assert_eq!(result.freed_bytes, 300);
        assert!(f.records.get(&first.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_target_is_rounded_down() {
        let f = fixture(1000).await;
        failed(&f.records, f.blobs.as_ref(), "a.pdf", 300, "u").await;

        // 29.96% of 1000 is 299.6 bytes; 300 stored is above it
        let result = f.engine.reclaim_to(0.2996).await.unwrap();
        assert_eq!(result.bytes_to_free, 1);
        assert_eq!(result.deleted.len(), 1);
        assert_eq!(result.freed_bytes, 300);
    }

    #[tokio::test]
    async fn test_record_that_changed_state_is_skipped() {
        let f = fixture(1000).await;
        let stuck = upload(&f.records, f.blobs.as_ref(), "stuck.pdf", 300, "u").await;
        f.records.mark_processing(&stuck.id).await.unwrap();
        backdate(&f.db, &stuck.id, 40).await;

        let stale_before = f.engine.stale_before();
        let snapshot = f.records.reclaimable(&stale_before).await.unwrap();
        assert_eq!(snapshot.len(), 1);

        // The worker finishes between the listing and the deletion
        let out = f.blobs.store(Bytes::from(vec![b'o'; 50])).await.unwrap();
        f.records
            .mark_completed(
                &stuck.id,
                vec![NewOutputFile {
                    file_name: "stuck.html".to_string(),
                    file_size: 50,
                    blob_id: out.clone(),
                }],
            )
            .await
            .unwrap();

        let initial = f.engine.accountant.compute_usage().await.unwrap();
        let mut result = ReclaimResult {
            target_fraction: 0.1,
            bytes_to_free: 1000,
            freed_bytes: 0,
            initial_usage: initial,
            final_usage: None,
            deleted: Vec::new(),
            errors: Vec::new(),
        };
        f.engine
            .delete_in_order(snapshot, ReclaimPhase::Reclaimable, &stale_before, &mut result)
            .await;

        assert!(result.deleted.is_empty());
        assert!(result.errors.is_empty());
        let record = f.records.get(&stuck.id).await.unwrap();
        assert_eq!(record.status, FileStatus::Completed);
        assert_eq!(f.blobs.fetch(&out).await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn test_delete_record_completely_removes_all_blobs() {
        let f = fixture(10_000).await;
        let record = completed(&f.records, f.blobs.as_ref(), "book.epub", 400, 250, "u").await;

        let outcome = delete_record_completely(&f.records, f.blobs.as_ref(), &record)
            .await
            .unwrap();
        assert_eq!(outcome.freed_bytes, 650);
        assert_eq!(outcome.deleted_blobs.len(), 2);

        let remaining: Vec<String> = f
            .blobs
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        for id in record.owned_blob_ids() {
            assert!(!remaining.iter().any(|r| r == id));
        }
        assert!(matches!(
            f.records.get(&record.id).await,
            Err(AppError::RecordNotFound(_))
        ));

        // Retrying on an already-deleted record succeeds and frees nothing
        let again = delete_record_completely(&f.records, f.blobs.as_ref(), &record)
            .await
            .unwrap();
        assert_eq!(again.freed_bytes, 0);
    }

    #[tokio::test]
    async fn test_cleanup_candidates_lists_without_deleting() {
        let f = fixture(1000).await;
        failed(&f.records, f.blobs.as_ref(), "bad.pdf", 120, "u").await;
        completed(&f.records, f.blobs.as_ref(), "ok.pdf", 100, 10, "u").await;

        let listing = f.engine.cleanup_candidates().await.unwrap();
        assert_eq!(listing.count, 1);
        assert_eq!(listing.total_size, 120);
        assert_eq!(listing.candidates[0].status, FileStatus::Failed);
        assert_eq!(f.blobs.list_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_background_trigger_runs_once_at_a_time() {
        let f = fixture(1000).await;
        failed(&f.records, f.blobs.as_ref(), "bad.pdf", 900, "u").await;

        assert!(f.engine.trigger_background());
        assert!(!f.engine.trigger_background());

        for _ in 0..100 {
            if !f.engine.background_running.load(Ordering::Acquire) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!f.engine.background_running.load(Ordering::Acquire));
        assert_eq!(f.engine.accountant.compute_usage().await.unwrap().total_bytes, 0);
    }
}
