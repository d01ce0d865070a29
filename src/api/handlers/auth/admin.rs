//! Administrative account operations.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::{
    error::AuthError,
    models::PrincipalKind,
    permissions::{Action, Module},
    principal::require_principal_type,
    state::AuthState,
    types::ErrorResponse,
};

#[utoipa::path(
    post,
    path = "/v1/admin/principals/{id}/unlock",
    params(
        ("id" = String, Path, description = "Principal id")
    ),
    responses(
        (status = 204, description = "Failed attempts cleared and lock lifted"),
        (status = 400, description = "Malformed id or authorization header", body = ErrorResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse),
        (status = 403, description = "Not an administrator with administrators:update", body = ErrorResponse),
        (status = 404, description = "Principal not found", body = ErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
#[instrument(skip(headers, auth_state))]
pub async fn unlock_principal(
    Path(id): Path<String>,
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    let admin = require_principal_type(&headers, &auth_state, PrincipalKind::Admin)?;
    auth_state
        .permissions()
        .require_permission(&admin, Module::Administrators, Action::Update)
        .await?;

    let principal_id = Uuid::parse_str(id.trim())
        .map_err(|_| AuthError::Validation("Principal id must be a UUID".to_string()))?;

    if auth_state
        .lockout()
        .unlock(auth_state.store(), principal_id)
        .await?
    {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(AuthError::NotFound)
    }
}
