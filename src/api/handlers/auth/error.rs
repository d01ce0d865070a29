//! Error type shared by every auth endpoint.
//!
//! Each variant maps to one status code and a stable snake_case `error`
//! string in the JSON body. Store failures are logged here and surface as a
//! bare 500 with a generic message.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use tracing::error;

use super::{
    access_token::TokenError, lockout::lock_message, refresh_token::RefreshError,
    types::ErrorResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("Authorization header is required")]
    MissingHeader,
    #[error("Authorization header must use the Bearer scheme")]
    MalformedHeader,
    #[error("Bearer token is empty")]
    EmptyToken,
    #[error("Access token is invalid or expired")]
    InvalidOrExpiredToken,
    #[error("Invalid email or password")]
    InvalidCredentials { remaining_attempts: Option<u32> },
    #[error("Refresh token is invalid or expired")]
    RefreshRejected,
    #[error("{}", lock_message(*retry_after_seconds))]
    AccountLocked { retry_after_seconds: u64 },
    #[error("Account is not active")]
    InactiveAccount,
    #[error("You do not have permission to perform this action")]
    AuthorizationDenied,
    #[error("This endpoint is not available for this account type")]
    WrongPrincipalType,
    #[error("Resource not found")]
    NotFound,
    #[error("Internal server error")]
    Persistence(anyhow::Error),
}

impl AuthError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::MalformedHeader | Self::EmptyToken => {
                StatusCode::BAD_REQUEST
            }
            Self::MissingHeader
            | Self::InvalidOrExpiredToken
            | Self::InvalidCredentials { .. }
            | Self::RefreshRejected => StatusCode::UNAUTHORIZED,
            Self::AccountLocked { .. } => StatusCode::LOCKED,
            Self::InactiveAccount | Self::AuthorizationDenied | Self::WrongPrincipalType => {
                StatusCode::FORBIDDEN
            }
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::MissingHeader => "missing_header",
            Self::MalformedHeader => "malformed_header",
            Self::EmptyToken => "empty_token",
            Self::InvalidOrExpiredToken => "invalid_token",
            Self::InvalidCredentials { .. } => "invalid_credentials",
            Self::RefreshRejected => "invalid_refresh_token",
            Self::AccountLocked { .. } => "account_locked",
            Self::InactiveAccount => "inactive_account",
            Self::AuthorizationDenied => "forbidden",
            Self::WrongPrincipalType => "wrong_principal_type",
            Self::NotFound => "not_found",
            Self::Persistence(_) => "internal_error",
        }
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Persistence(err)
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Malformed | TokenError::BadSignature | TokenError::Expired => {
                Self::InvalidOrExpiredToken
            }
            TokenError::Signing | TokenError::WeakSecret => {
                Self::Persistence(anyhow::anyhow!("access token signing failed: {err}"))
            }
        }
    }
}

impl From<RefreshError> for AuthError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::NotFound | RefreshError::Expired | RefreshError::PrincipalInactive => {
                Self::RefreshRejected
            }
            RefreshError::Persistence(err) => Self::Persistence(err),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::Persistence(err) = &self {
            error!("Auth request failed: {err:#}");
        }

        let status = self.status();
        let (remaining_attempts, retry_after_seconds) = match &self {
            Self::InvalidCredentials { remaining_attempts } => (*remaining_attempts, None),
            Self::AccountLocked {
                retry_after_seconds,
            } => (None, Some(*retry_after_seconds)),
            _ => (None, None),
        };
        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
            remaining_attempts,
            retry_after_seconds,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = retry_after_seconds {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}
