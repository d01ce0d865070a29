//! Password login.
//!
//! Flow Overview:
//! 1) Normalize and validate the request.
//! 2) Look up the principal; unknown emails still pay for one hash.
//! 3) Refuse while locked, otherwise verify and drive the lockout machine.
//! 4) On success issue an access token (body) and a refresh token (cookie).

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Extension},
    response::{Json, Response},
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{
    access_token::TokenSubject,
    error::AuthError,
    lockout::FailureOutcome,
    models::{PrincipalRecord, PrincipalStatus},
    session::session_response,
    state::AuthState,
    types::{ErrorResponse, LoginRequest, TokenResponse},
    utils::{normalize_email, valid_email},
};

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated; refresh token set as cookie", body = TokenResponse),
        (status = 400, description = "Malformed request body", body = ErrorResponse),
        (status = 401, description = "Invalid email or password", body = ErrorResponse),
        (status = 403, description = "Account is inactive or pending", body = ErrorResponse),
        (status = 423, description = "Account temporarily locked", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(auth_state, payload))]
pub async fn login(
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, AuthError> {
    let Json(request) = payload.map_err(|rejection| AuthError::Validation(rejection.body_text()))?;

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return Err(AuthError::Validation("A valid email is required".to_string()));
    }
    if request.password.is_empty() {
        return Err(AuthError::Validation("Password is required".to_string()));
    }

    let Some(principal) = auth_state.store().find_principal_by_email(&email).await? else {
        burn_dummy_verification(&auth_state, request.password).await?;
        debug!("Login for unknown email");
        return Err(AuthError::InvalidCredentials {
            remaining_attempts: None,
        });
    };

    // Pending accounts are not counted; they can never log in yet.
    if principal.status == PrincipalStatus::Pending {
        return if verify_password(&auth_state, request.password, &principal).await? {
            Err(AuthError::InactiveAccount)
        } else {
            Err(AuthError::InvalidCredentials {
                remaining_attempts: None,
            })
        };
    }

    let now = auth_state.clock().now();
    if let Some(retry_after_seconds) = auth_state
        .lockout()
        .check(auth_state.store(), principal.id, &principal.lockout, now)
        .await?
    {
        return Err(AuthError::AccountLocked {
            retry_after_seconds,
        });
    }

    if !verify_password(&auth_state, request.password, &principal).await? {
        return match auth_state
            .lockout()
            .register_failure(auth_state.store(), principal.id, now)
            .await?
        {
            FailureOutcome::Remaining(remaining) => Err(AuthError::InvalidCredentials {
                remaining_attempts: Some(remaining),
            }),
            FailureOutcome::Locked {
                retry_after_seconds,
            } => Err(AuthError::AccountLocked {
                retry_after_seconds,
            }),
        };
    }

    if let Some(retry_after_seconds) = auth_state
        .lockout()
        .register_success(auth_state.store(), principal.id, now)
        .await?
    {
        return Err(AuthError::AccountLocked {
            retry_after_seconds,
        });
    }

    if principal.status != PrincipalStatus::Active {
        info!(principal_id = %principal.id, "Login refused for inactive principal");
        return Err(AuthError::InactiveAccount);
    }

    let subject = TokenSubject {
        principal_id: principal.id,
        email: principal.email,
        principal_type: principal.kind,
    };
    let access_token = auth_state
        .tokens()
        .issue(&subject, auth_state.config().access_token_ttl())?;
    let refresh = auth_state.refresh_tokens().issue(principal.id).await?;

    info!(
        principal_id = %subject.principal_id,
        principal_type = %subject.principal_type,
        "Login succeeded"
    );
    Ok(session_response(&auth_state, access_token, &refresh))
}

// Argon2 is CPU bound; keep it off the async workers.
async fn verify_password(
    auth_state: &AuthState,
    password: String,
    principal: &PrincipalRecord,
) -> anyhow::Result<bool> {
    let verifier = auth_state.passwords().clone();
    let stored_hash = principal.password_hash.clone();
    tokio::task::spawn_blocking(move || verifier.verify(&password, &stored_hash))
        .await
        .context("Password verification task failed")
}

async fn burn_dummy_verification(auth_state: &AuthState, password: String) -> anyhow::Result<()> {
    let verifier = auth_state.passwords().clone();
    tokio::task::spawn_blocking(move || verifier.verify_dummy(&password))
        .await
        .context("Password verification task failed")
}
