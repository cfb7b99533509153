use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use bytes::Bytes;

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{CurrentUser, DeletionOutcome, FileRecord};
use crate::services::Download;
use crate::AppState;

/// Build an attachment response for downloaded bytes
pub(crate) fn attachment(download: Download) -> Result<Response> {
    let fallback_name = download.file_name.replace(['"', '\\'], "_");
    let encoded_name = urlencoding::encode(&download.file_name);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, download.content_type)
        .header(header::CONTENT_LENGTH, download.data.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                fallback_name, encoded_name
            ),
        )
        .body(Body::from(download.data))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

/// List the caller's manuscripts
/// GET /api/v1/files
pub async fn list_files(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<Vec<FileRecord>>>> {
    let files = state.services.files.list_for(&current_user).await?;
    Ok(Json(ApiResponse::success(files)))
}

/// Get a specific manuscript
/// GET /api/v1/files/:id
pub async fn get_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<FileRecord>>> {
    let file = state.services.files.get_visible(&current_user, &id).await?;
    Ok(Json(ApiResponse::success(file)))
}

/// Upload a manuscript
/// POST /api/v1/files/upload
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<FileRecord>>> {
    let mut upload: Option<(String, Option<String>, Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to process multipart: {}", e))
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::BadRequest("No file name provided".to_string()))?;
        let content_type = field.content_type().map(|s| s.to_string());
        let data = field.bytes().await.map_err(|e| {
            AppError::BadRequest(format!("Failed to read file: {}", e))
        })?;

        upload = Some((file_name, content_type, data));
    }

    let (file_name, content_type, data) =
        upload.ok_or_else(|| AppError::BadRequest("No file provided".to_string()))?;

    let record = state
        .services
        .files
        .upload(&current_user.id, &file_name, content_type.as_deref(), data)
        .await?;
    Ok(Json(ApiResponse::success(record)))
}

/// Download the uploaded manuscript
/// GET /api/v1/files/:id/download
pub async fn download_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Response> {
    let download = state.services.files.download_input(&current_user, &id).await?;
    attachment(download)
}

/// Download one conversion output
/// GET /api/v1/files/:id/outputs/:index/download
pub async fn download_output(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path((id, index)): Path<(String, usize)>,
) -> Result<Response> {
    let download = state
        .services
        .files
        .download_output(&current_user, &id, index)
        .await?;
    attachment(download)
}

/// Delete a manuscript with all of its blobs
/// DELETE /api/v1/files/:id
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let outcome: DeletionOutcome = state.services.files.delete(&current_user, &id).await?;
    Ok(Json(ApiResponse::with_code(0, "File deleted", outcome)))
}
