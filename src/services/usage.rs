use std::sync::Arc;

use crate::config::StorageLimits;
use crate::error::{AppError, Result};
use crate::models::UsageSnapshot;
use crate::storage::BlobStore;

/// Computes how full the blob store is
#[derive(Clone)]
pub struct UsageAccountant {
    blobs: Arc<dyn BlobStore>,
    limits: StorageLimits,
}

impl UsageAccountant {
    pub fn new(blobs: Arc<dyn BlobStore>, limits: StorageLimits) -> Self {
        Self { blobs, limits }
    }

    pub fn limits(&self) -> &StorageLimits {
        &self.limits
    }

    /// Enumerate every blob and classify the total against the thresholds.
    /// Recomputed on each call so it always reflects current store contents.
    pub async fn compute_usage(&self) -> Result<UsageSnapshot> {
        let blobs = self.blobs.list_all().await.map_err(|e| match e {
            AppError::StoreUnavailable(_) => e,
            other => AppError::StoreUnavailable(other.to_string()),
        })?;

        let total_bytes: i64 = blobs.iter().map(|b| b.length).sum();
        let snapshot = UsageSnapshot::new(total_bytes, blobs.len() as i64, &self.limits);

        tracing::debug!(
            total_bytes = snapshot.total_bytes,
            file_count = snapshot.file_count,
            usage_percent = snapshot.usage_percent,
            "Computed storage usage"
        );
        Ok(snapshot)
    }
}
