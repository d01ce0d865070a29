//! Refresh and sign-out endpoints, plus the refresh cookie helpers.
//!
//! The refresh token only ever travels in an `HttpOnly` cookie scoped to
//! `/v1/auth`, so page scripts and unrelated routes never see it.

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::{
    access_token::TokenSubject,
    error::AuthError,
    refresh_token::{IssuedRefreshToken, RefreshError},
    state::{AuthConfig, AuthState},
    types::{ErrorResponse, TokenResponse},
};

pub(crate) const REFRESH_COOKIE_NAME: &str = "partgate_refresh";
const REFRESH_COOKIE_PATH: &str = "/v1/auth";

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    responses(
        (status = 200, description = "New access token; refresh cookie rotated", body = TokenResponse),
        (status = 401, description = "Refresh cookie missing, unknown, expired, or owner inactive", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(headers, auth_state))]
pub async fn refresh(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    let Some(token) = extract_refresh_token(&headers) else {
        return Err(AuthError::RefreshRejected);
    };

    // Resolve first so stale rows are cleaned up and inactive owners revoked.
    if let Err(err) = auth_state.refresh_tokens().validate(&token).await {
        return Ok(reject_refresh(auth_state.config(), err));
    }

    let (principal_id, rotated) = match auth_state.refresh_tokens().rotate(&token).await {
        Ok(rotated) => rotated,
        Err(RefreshError::NotFound) => {
            warn!("Refresh token lost a rotation race or was reused");
            return Ok(reject_refresh(auth_state.config(), RefreshError::NotFound));
        }
        Err(err) => return Err(err.into()),
    };

    let Some(principal) = auth_state.store().find_principal(principal_id).await? else {
        auth_state.refresh_tokens().revoke(&rotated.token).await?;
        return Ok(reject_refresh(auth_state.config(), RefreshError::NotFound));
    };

    let subject = TokenSubject {
        principal_id,
        email: principal.email,
        principal_type: principal.kind,
    };
    let access_token = auth_state
        .tokens()
        .issue(&subject, auth_state.config().access_token_ttl())?;

    info!(%principal_id, "Access token refreshed");
    Ok(session_response(&auth_state, access_token, &rotated))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Refresh token revoked and cookie cleared"),
        (status = 500, description = "Refresh token could not be revoked", body = ErrorResponse)
    ),
    tag = "auth"
)]
#[instrument(skip(headers, auth_state))]
pub async fn logout(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    // A store failure must not look like a successful sign-out.
    if let Some(token) = extract_refresh_token(&headers) {
        auth_state.refresh_tokens().revoke(&token).await?;
    }

    // Clear the cookie even if the token was unknown.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_refresh_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    Ok((StatusCode::NO_CONTENT, response_headers).into_response())
}

/// 200 with the access token in the body and the refresh token in the cookie.
pub(super) fn session_response(
    auth_state: &AuthState,
    access_token: String,
    refresh: &IssuedRefreshToken,
) -> Response {
    let mut response_headers = HeaderMap::new();
    match refresh_cookie(auth_state.config(), &refresh.token) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build refresh cookie: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    let body = TokenResponse::bearer(access_token, auth_state.config().access_token_ttl_seconds());
    (StatusCode::OK, response_headers, Json(body)).into_response()
}

fn reject_refresh(auth_config: &AuthConfig, err: RefreshError) -> Response {
    let mut response = AuthError::from(err).into_response();
    if let Ok(cookie) = clear_refresh_cookie(auth_config) {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    response
}

/// Build a secure `HttpOnly` cookie for the refresh token.
pub(super) fn refresh_cookie(
    auth_config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = auth_config.refresh_token_ttl_seconds();
    // Only mark cookies secure when the frontend is served over HTTPS.
    let secure = auth_config.session_cookie_secure();
    let mut cookie = format!(
        "{REFRESH_COOKIE_NAME}={token}; Path={REFRESH_COOKIE_PATH}; HttpOnly; SameSite=Strict; Max-Age={ttl_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn clear_refresh_cookie(
    auth_config: &AuthConfig,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = auth_config.session_cookie_secure();
    let mut cookie = format!(
        "{REFRESH_COOKIE_NAME}=; Path={REFRESH_COOKIE_PATH}; HttpOnly; SameSite=Strict; Max-Age=0"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn extract_refresh_token(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let Some((key, val)) = pair.trim().split_once('=') else {
                continue;
            };
            let val = val.trim();
            if key.trim() == REFRESH_COOKIE_NAME && !val.is_empty() {
                return Some(val.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(COOKIE, value);
        }
        headers
    }

    #[test]
    fn refresh_cookie_attributes() {
        let config = AuthConfig::new("https://partgate.dev".to_string());
        let cookie = refresh_cookie(&config, "abc").ok();
        let cookie = cookie.as_ref().and_then(|value| value.to_str().ok());
        assert_eq!(
            cookie,
            Some("partgate_refresh=abc; Path=/v1/auth; HttpOnly; SameSite=Strict; Max-Age=604800; Secure")
        );
    }

    #[test]
    fn cleared_cookie_expires_immediately() {
        let config = AuthConfig::new("http://localhost:5173".to_string());
        let cookie = clear_refresh_cookie(&config).ok();
        let cookie = cookie.as_ref().and_then(|value| value.to_str().ok());
        assert_eq!(
            cookie,
            Some("partgate_refresh=; Path=/v1/auth; HttpOnly; SameSite=Strict; Max-Age=0")
        );
    }

    #[test]
    fn extracts_named_cookie_among_others() {
        let headers = cookie_headers("theme=dark; partgate_refresh=tok-123 ; lang=en");
        assert_eq!(extract_refresh_token(&headers).as_deref(), Some("tok-123"));
    }

    #[test]
    fn missing_or_empty_cookie_is_none() {
        assert!(extract_refresh_token(&HeaderMap::new()).is_none());
        assert!(extract_refresh_token(&cookie_headers("theme=dark")).is_none());
        assert!(extract_refresh_token(&cookie_headers("partgate_refresh=")).is_none());
    }
}
