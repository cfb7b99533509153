use axum::{extract::State, Json};

use crate::error::{ApiResponse, Result};
use crate::models::UsageSnapshot;
use crate::AppState;

/// How full the shared store is
/// GET /api/v1/storage/status
pub async fn storage_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<UsageSnapshot>>> {
    let usage = state.services.accountant.compute_usage().await?;
    Ok(Json(ApiResponse::success(usage)))
}
