use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{
    BulkDeleteRequest, BulkDeleteResult, CleanupCandidatesResponse, CleanupRequest, CurrentUser,
    OldestFile, OldestFilesQuery, OrphanScanResult, ReclaimResult, ReportQuery, StorageReport,
    UsageSnapshot,
};
use crate::services::DEFAULT_TOP_OWNERS;
use crate::AppState;

const DEFAULT_OLDEST_LIMIT: i64 = 20;
const MAX_OLDEST_LIMIT: i64 = 500;
const MAX_TOP_OWNERS: i64 = 100;

/// Check if user is admin
fn require_admin(user: &CurrentUser) -> Result<()> {
    if !user.is_admin() {
        return Err(AppError::Forbidden(
            "Admin access required".to_string(),
        ));
    }
    Ok(())
}

/// Convert an optional percentage into a target fraction
pub(crate) fn target_fraction(target_percent: Option<f64>, default: f64) -> Result<f64> {
    match target_percent {
        None => Ok(default),
        Some(p) if p > 0.0 && p < 100.0 => Ok(p / 100.0),
        Some(p) => Err(AppError::BadRequest(format!(
            "targetPercent must be between 0 and 100 exclusive, got {}",
            p
        ))),
    }
}

/// GET /api/v1/admin/storage/stats
pub async fn storage_stats(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<UsageSnapshot>>> {
    require_admin(&current_user)?;
    let usage = state.services.accountant.compute_usage().await?;
    Ok(Json(ApiResponse::success(usage)))
}

/// Usage plus per-status, per-owner and per-type totals
/// GET /api/v1/admin/storage/report?top=N
pub async fn storage_report(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<ApiResponse<StorageReport>>> {
    require_admin(&current_user)?;
    let top = query.top.unwrap_or(DEFAULT_TOP_OWNERS).clamp(1, MAX_TOP_OWNERS);
    let report = state.services.reporter.storage_report(top).await?;
    Ok(Json(ApiResponse::success(report)))
}

/// GET /api/v1/admin/storage/cleanup-candidates
pub async fn cleanup_candidates(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<CleanupCandidatesResponse>>> {
    require_admin(&current_user)?;
    let candidates = state.services.reclamation.cleanup_candidates().await?;
    Ok(Json(ApiResponse::success(candidates)))
}

/// GET /api/v1/admin/storage/oldest-files?limit=N
pub async fn oldest_files(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Query(query): Query<OldestFilesQuery>,
) -> Result<Json<ApiResponse<Vec<OldestFile>>>> {
    require_admin(&current_user)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_OLDEST_LIMIT)
        .clamp(1, MAX_OLDEST_LIMIT);
    let files = state.services.reporter.oldest_records(limit).await?;
    Ok(Json(ApiResponse::success(files)))
}

/// Run reclamation now, to `targetPercent` or the configured target
/// POST /api/v1/admin/storage/cleanup
pub async fn run_cleanup(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    body: Option<Json<CleanupRequest>>,
) -> Result<Json<ApiResponse<ReclaimResult>>> {
    require_admin(&current_user)?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let target = target_fraction(
        req.target_percent,
        state.config.limits.target_after_cleanup_fraction,
    )?;

    tracing::info!(admin = %current_user.id, "Manual cleanup to {:.1}%", target * 100.0);
    let result = state.services.reclamation.reclaim_to(target).await?;
    Ok(Json(ApiResponse::success(result)))
}

/// POST /api/v1/admin/storage/cleanup-orphaned
pub async fn cleanup_orphaned(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<OrphanScanResult>>> {
    require_admin(&current_user)?;
    tracing::info!(admin = %current_user.id, "Manual orphan cleanup");
    let result = state.services.orphans.reclaim_orphans().await?;
    Ok(Json(ApiResponse::success(result)))
}

/// Completely delete the listed records
/// DELETE /api/v1/admin/storage/files
pub async fn delete_files(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<BulkDeleteRequest>,
) -> Result<(StatusCode, Json<ApiResponse<BulkDeleteResult>>)> {
    require_admin(&current_user)?;
    if req.file_ids.is_empty() {
        return Err(AppError::BadRequest("fileIds must not be empty".to_string()));
    }

    let result = state.services.files.delete_many(&req.file_ids).await;
    if result.success {
        Ok((StatusCode::OK, Json(ApiResponse::success(result))))
    } else {
        Ok((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::with_code(404, "No files were deleted", result)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_fraction_bounds() {
        assert_eq!(target_fraction(None, 0.7).unwrap(), 0.7);
        assert_eq!(target_fraction(Some(50.0), 0.7).unwrap(), 0.5);
        assert!(target_fraction(Some(0.0), 0.7).is_err());
        assert!(target_fraction(Some(100.0), 0.7).is_err());
        assert!(target_fraction(Some(-5.0), 0.7).is_err());
    }
}
