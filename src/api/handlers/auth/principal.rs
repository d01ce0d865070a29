//! Authenticated principal extraction.
//!
//! Flow Overview: read the `Authorization` header, validate the bearer access
//! token, and return a `Principal` that the handler passes on explicitly.
//! Nothing here touches the store; access-token validation is pure.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use super::{error::AuthError, models::PrincipalKind, state::AuthState};

/// Identity of the caller for the duration of one request.
#[derive(Clone, Debug)]
pub struct Principal {
    pub principal_id: Uuid,
    pub email: String,
    pub principal_type: PrincipalKind,
    pub expires_at: DateTime<Utc>,
}

/// Pull the raw token out of `Authorization: Bearer <token>`.
///
/// # Errors
/// `MissingHeader`, `MalformedHeader` or `EmptyToken`, checked in that order.
/// A token with inner whitespace is `MalformedHeader`.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers.get(AUTHORIZATION).ok_or(AuthError::MissingHeader)?;
    let value = value.to_str().map_err(|_| AuthError::MalformedHeader)?.trim();

    let (scheme, token) = match value.split_once(' ') {
        Some((scheme, token)) => (scheme, token),
        None => (value, ""),
    };
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MalformedHeader);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::EmptyToken);
    }
    if token.contains(char::is_whitespace) {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token)
}

/// Resolve the bearer token into a principal, or return the matching auth error.
///
/// # Errors
/// Header errors from [`extract_bearer_token`], or `InvalidOrExpiredToken`.
pub fn require_auth(headers: &HeaderMap, auth_state: &AuthState) -> Result<Principal, AuthError> {
    let token = extract_bearer_token(headers)?;
    let claims = auth_state.tokens().validate(token).map_err(|err| {
        debug!("Rejected access token: {err}");
        AuthError::from(err)
    })?;
    let expires_at =
        DateTime::from_timestamp(claims.exp, 0).ok_or(AuthError::InvalidOrExpiredToken)?;

    Ok(Principal {
        principal_id: claims.sub,
        email: claims.email,
        principal_type: claims.principal_type,
        expires_at,
    })
}

/// Like [`require_auth`] but only for tokens minted for `expected` principals.
///
/// # Errors
/// Any error from [`require_auth`], or `WrongPrincipalType`.
pub fn require_principal_type(
    headers: &HeaderMap,
    auth_state: &AuthState,
    expected: PrincipalKind,
) -> Result<Principal, AuthError> {
    let principal = require_auth(headers, auth_state)?;
    if principal.principal_type == expected {
        Ok(principal)
    } else {
        debug!(
            principal_id = %principal.principal_id,
            principal_type = %principal.principal_type,
            %expected,
            "Token used against another principal family"
        );
        Err(AuthError::WrongPrincipalType)
    }
}
