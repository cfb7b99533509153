use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Response code for uploads refused because the store is past the critical threshold
pub const CODE_QUOTA_CRITICAL: i32 = 4071;
/// Response code for uploads refused because they would not fit in the remaining capacity
pub const CODE_INSUFFICIENT_CAPACITY: i32 = 4072;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    #[error("Failed to delete blob {blob_id}: {reason}")]
    BlobDeleteFailed { blob_id: String, reason: String },

    #[error("Storage quota critical: {0}")]
    QuotaCritical(String),

    #[error("Insufficient remaining capacity: {0}")]
    InsufficientCapacity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Stable machine-readable kind, used in per-item batch reports
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) | AppError::StoreUnavailable(_) => "store_unavailable",
            AppError::RecordNotFound(_) => "record_not_found",
            AppError::BlobNotFound(_) => "blob_not_found",
            AppError::BlobDeleteFailed { .. } => "blob_delete_failed",
            AppError::QuotaCritical(_) => "quota_critical",
            AppError::InsufficientCapacity(_) => "insufficient_capacity",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::BadRequest(_) => "bad_request",
            AppError::Conflict(_) => "conflict",
            AppError::Internal(_) => "internal",
            AppError::Jwt(_) => "invalid_token",
            AppError::Io(_) => "io",
        }
    }
}

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    /// Response carrying data alongside a non-zero code, for partially failed batches
    pub fn with_code(code: i32, message: &str, data: T) -> Self {
        Self {
            code,
            message: message.to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, message: &str) -> ApiResponse<()> {
        ApiResponse {
            code,
            message: message.to_string(),
            data: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "Database error".to_string())
            }
            AppError::StoreUnavailable(msg) => {
                tracing::error!("Store unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, 503, "Storage is unavailable".to_string())
            }
            AppError::RecordNotFound(msg)
            | AppError::BlobNotFound(msg)
            | AppError::NotFound(msg) => (StatusCode::NOT_FOUND, 404, msg.clone()),
            AppError::BlobDeleteFailed { .. } => {
                tracing::error!("{}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, self.to_string())
            }
            // 507 lets the client tell "storage is full" apart from a generic server failure
            AppError::QuotaCritical(msg) => (
                StatusCode::INSUFFICIENT_STORAGE,
                CODE_QUOTA_CRITICAL,
                msg.clone(),
            ),
            AppError::InsufficientCapacity(msg) => (
                StatusCode::INSUFFICIENT_STORAGE,
                CODE_INSUFFICIENT_CAPACITY,
                msg.clone(),
            ),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, 401, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, 403, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, 400, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, 409, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, msg.clone())
            }
            AppError::Jwt(e) => {
                tracing::warn!("JWT error: {:?}", e);
                (StatusCode::UNAUTHORIZED, 401, "Invalid token".to_string())
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "IO error".to_string())
            }
        };

        let body = Json(ApiResponse::<()>::error(code, &message));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
