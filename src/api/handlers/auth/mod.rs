//! Auth handlers and supporting modules.
//!
//! This module coordinates password login, the access/refresh token pair,
//! brute-force lockout, and role-based permission checks.
//!
//! ## Tokens
//!
//! - **Access token:** HS256 JWT, 15 minutes, sent as `Authorization: Bearer`.
//!   Stateless; a leaked token stays valid until it expires.
//! - **Refresh token:** 32 random bytes, 7 days, `HttpOnly` cookie scoped to
//!   `/v1/auth`. Stored as a SHA-256 digest and rotated on every refresh.
//!
//! ## Lockout
//!
//! Five consecutive failed logins lock the account for 30 minutes. The lock
//! clears lazily on the next attempt after it expires, on a successful login,
//! or through `POST /v1/admin/principals/{id}/unlock`.
//!
//! ## Protected endpoints
//!
//! Call [`require_auth`] (or [`require_principal_type`]) and then
//! [`PermissionChecker::require_permission`] before touching any data.

pub(crate) mod access_token;
pub(crate) mod admin;
pub mod clock;
mod error;
mod lockout;
pub(crate) mod login;
pub mod memory;
mod models;
mod password;
mod permissions;
mod principal;
mod refresh_token;
pub(crate) mod me;
pub(crate) mod session;
mod state;
mod storage;
pub(crate) mod types;
mod utils;

pub use access_token::{AccessTokenClaims, TokenError, TokenIssuer, TokenSubject};
pub use error::AuthError;
pub use lockout::{LockoutGuard, LockoutPolicy, LockoutRecord};
pub use memory::MemoryStore;
pub use models::{
    ModuleRow, PermissionFlags, PrincipalKind, PrincipalRecord, PrincipalStatus, RefreshRecord,
};
pub use password::PasswordVerifier;
pub use permissions::{Action, Module, ModuleRegistry, PermissionChecker};
pub use principal::{extract_bearer_token, require_auth, require_principal_type, Principal};
pub use refresh_token::{RefreshError, RefreshTokenStore};
pub use state::{
    AuthConfig, AuthState, MAX_ACCESS_TOKEN_TTL_SECONDS, MAX_LOCK_DURATION_SECONDS,
    MAX_REFRESH_TOKEN_TTL_SECONDS,
};
pub use storage::{AuthStore, PgStore};
