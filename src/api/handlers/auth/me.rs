//! Identity of the current bearer token.

use axum::{
    extract::Extension,
    http::HeaderMap,
    response::Json,
};
use std::sync::Arc;

use super::{
    error::AuthError,
    principal::require_auth,
    state::AuthState,
    types::{ErrorResponse, MeResponse},
};

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    responses(
        (status = 200, description = "Claims of the presented access token", body = MeResponse),
        (status = 400, description = "Malformed authorization header", body = ErrorResponse),
        (status = 401, description = "Missing, invalid or expired access token", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn me(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<MeResponse>, AuthError> {
    let principal = require_auth(&headers, &auth_state)?;
    Ok(Json(MeResponse {
        principal_id: principal.principal_id.to_string(),
        email: principal.email,
        principal_type: principal.principal_type,
        expires_at: principal.expires_at.timestamp(),
    }))
}
