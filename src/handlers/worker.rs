use axum::{
    extract::{Multipart, Path, State},
    response::Response,
    Extension, Json,
};
use bytes::Bytes;

use crate::error::{ApiResponse, AppError, Result};
use crate::handlers::file::attachment;
use crate::models::{CurrentUser, FailConversionRequest, FileRecord};
use crate::AppState;

/// Conversion reports come from workers or admins
fn require_worker(user: &CurrentUser) -> Result<()> {
    if !user.can_convert() {
        return Err(AppError::Forbidden("Worker access required".to_string()));
    }
    Ok(())
}

/// Fetch the manuscript to convert
/// GET /api/v1/worker/files/:id/input
pub async fn get_input(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Response> {
    require_worker(&current_user)?;
    let download = state.services.files.worker_input(&id).await?;
    attachment(download)
}

/// POST /api/v1/worker/files/:id/start
pub async fn start_conversion(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileRecord>>> {
    require_worker(&current_user)?;
    let record = state.services.files.start_conversion(&id).await?;
    Ok(Json(ApiResponse::success(record)))
}

/// Report finished conversion, one multipart part per output file
/// POST /api/v1/worker/files/:id/complete
pub async fn complete_conversion(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<FileRecord>>> {
    require_worker(&current_user)?;

    let mut outputs: Vec<(String, Bytes)> = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to process multipart: {}", e))
    })? {
        let file_name = match field.file_name().or_else(|| field.name()) {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => return Err(AppError::BadRequest("Output without a file name".to_string())),
        };
        let data = field.bytes().await.map_err(|e| {
            AppError::BadRequest(format!("Failed to read output {}: {}", file_name, e))
        })?;
        outputs.push((file_name, data));
    }

    let record = state.services.files.complete_conversion(&id, outputs).await?;
    Ok(Json(ApiResponse::success(record)))
}

/// POST /api/v1/worker/files/:id/fail
pub async fn fail_conversion(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<FailConversionRequest>,
) -> Result<Json<ApiResponse<FileRecord>>> {
    require_worker(&current_user)?;
    let record = state.services.files.fail_conversion(&id, &req.error).await?;
    Ok(Json(ApiResponse::success(record)))
}
