use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::services::AuthService;
use crate::AppState;

/// Token from an `Authorization: Bearer <token>` header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the caller from the bearer token and attach it as `CurrentUser`.
/// Identities live entirely in the token; there is no user table.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers()).ok_or_else(|| {
        AppError::Unauthorized("Missing or invalid Authorization header".to_string())
    })?;

    let current_user = AuthService::authenticate(token, &state.config.jwt)?;
    tracing::debug!(user = %current_user.id, role = current_user.role.as_str(), "Authenticated request");

    request.extensions_mut().insert(current_user);
    Ok(next.run(request).await)
}
