//! Auth configuration and the shared state handed to every handler.

use anyhow::{ensure, Context, Result};
use chrono::Duration;
use secrecy::SecretString;
use std::sync::Arc;

use super::{
    access_token::{TokenIssuer, DEFAULT_ACCESS_TOKEN_TTL_SECONDS},
    clock::Clock,
    lockout::{LockoutGuard, LockoutPolicy, DEFAULT_LOCK_DURATION_SECONDS, DEFAULT_THRESHOLD},
    password::PasswordVerifier,
    permissions::{ModuleRegistry, PermissionChecker},
    refresh_token::{RefreshTokenStore, DEFAULT_REFRESH_TOKEN_TTL_SECONDS},
    storage::AuthStore,
};

pub const MAX_ACCESS_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
pub const MAX_REFRESH_TOKEN_TTL_SECONDS: i64 = 365 * 24 * 60 * 60;
pub const MAX_LOCK_DURATION_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    lockout_threshold: i32,
    lockout_duration_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            lockout_threshold: DEFAULT_THRESHOLD,
            lockout_duration_seconds: DEFAULT_LOCK_DURATION_SECONDS,
        }
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_lockout_threshold(mut self, threshold: i32) -> Self {
        self.lockout_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_lockout_duration_seconds(mut self, seconds: i64) -> Self {
        self.lockout_duration_seconds = seconds;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub fn lockout_threshold(&self) -> i32 {
        self.lockout_threshold
    }

    #[must_use]
    pub fn lockout_duration_seconds(&self) -> i64 {
        self.lockout_duration_seconds
    }

    /// Check every duration is positive and within its upper bound.
    ///
    /// # Errors
    /// Names the first setting out of range.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=MAX_ACCESS_TOKEN_TTL_SECONDS).contains(&self.access_token_ttl_seconds),
            "access token TTL must be between 1 and {MAX_ACCESS_TOKEN_TTL_SECONDS} seconds"
        );
        ensure!(
            (1..=MAX_REFRESH_TOKEN_TTL_SECONDS).contains(&self.refresh_token_ttl_seconds),
            "refresh token TTL must be between 1 and {MAX_REFRESH_TOKEN_TTL_SECONDS} seconds"
        );
        ensure!(
            (1..=MAX_LOCK_DURATION_SECONDS).contains(&self.lockout_duration_seconds),
            "lockout duration must be between 1 and {MAX_LOCK_DURATION_SECONDS} seconds"
        );
        ensure!(self.lockout_threshold >= 1, "lockout threshold must be at least 1");
        Ok(())
    }

    pub(super) fn access_token_ttl(&self) -> Duration {
        Duration::seconds(self.access_token_ttl_seconds)
    }

    pub(super) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    store: Arc<dyn AuthStore>,
    clock: Arc<dyn Clock>,
    passwords: PasswordVerifier,
    tokens: TokenIssuer,
    refresh_tokens: RefreshTokenStore,
    lockout: LockoutGuard,
    permissions: PermissionChecker,
}

impl AuthState {
    /// Wire the auth components around one store and one clock.
    ///
    /// # Errors
    /// Fails if a duration is out of range, the signing secret is too short,
    /// or the module table does not cover every known module.
    pub async fn new(
        config: AuthConfig,
        jwt_secret: &SecretString,
        store: Arc<dyn AuthStore>,
        clock: Arc<dyn Clock>,
        passwords: PasswordVerifier,
    ) -> Result<Self> {
        config.validate()?;
        let tokens =
            TokenIssuer::new(jwt_secret, clock.clone()).context("Invalid JWT signing secret")?;
        let refresh_tokens = RefreshTokenStore::new(
            store.clone(),
            clock.clone(),
            Duration::seconds(config.refresh_token_ttl_seconds),
        );
        let lockout = LockoutGuard::new(LockoutPolicy::new(
            config.lockout_threshold,
            Duration::seconds(config.lockout_duration_seconds),
        ));
        let registry = ModuleRegistry::load(store.as_ref())
            .await
            .context("Failed to load permission modules")?;
        let permissions = PermissionChecker::new(store.clone(), registry);

        Ok(Self {
            config,
            store,
            clock,
            passwords,
            tokens,
            refresh_tokens,
            lockout,
            permissions,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &dyn AuthStore {
        self.store.as_ref()
    }

    pub(super) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(super) fn passwords(&self) -> &PasswordVerifier {
        &self.passwords
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    #[must_use]
    pub fn refresh_tokens(&self) -> &RefreshTokenStore {
        &self.refresh_tokens
    }

    #[must_use]
    pub fn lockout(&self) -> &LockoutGuard {
        &self.lockout
    }

    #[must_use]
    pub fn permissions(&self) -> &PermissionChecker {
        &self.permissions
    }
}
