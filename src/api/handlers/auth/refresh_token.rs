//! Opaque, server-side refresh tokens.
//!
//! Login appends a new row per device. Refresh rotates the presented row in
//! place with a compare-and-swap, so a token value is usable exactly once and
//! of two racing refresh calls only one gets a new token.

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    clock::Clock,
    models::PrincipalStatus,
    storage::AuthStore,
    utils::{generate_refresh_token, hash_refresh_token},
};

pub const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

const MAX_GENERATION_ATTEMPTS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("refresh token not found")]
    NotFound,
    #[error("refresh token expired")]
    Expired,
    #[error("refresh token owner is not active")]
    PrincipalInactive,
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

#[derive(Clone, Debug)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct RefreshTokenStore {
    store: Arc<dyn AuthStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl RefreshTokenStore {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Persist a fresh token for `principal_id`.
    ///
    /// # Errors
    /// Returns `Persistence` if the RNG or the store fails.
    pub async fn issue(&self, principal_id: Uuid) -> Result<IssuedRefreshToken, RefreshError> {
        let expires_at = self.clock.now() + self.ttl;
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let token = generate_refresh_token()?;
            let token_hash = hash_refresh_token(&token);
            if self
                .store
                .insert_refresh_token(principal_id, &token_hash, expires_at)
                .await?
            {
                debug!(%principal_id, "Refresh token issued");
                return Ok(IssuedRefreshToken { token, expires_at });
            }
        }
        Err(anyhow!("failed to generate unique refresh token").into())
    }

    /// Resolve a presented token to its principal.
    ///
    /// Expired rows are deleted on discovery, and so are rows whose owner
    /// is no longer active.
    ///
    /// # Errors
    /// `NotFound`, `Expired`, `PrincipalInactive`, or `Persistence`.
    pub async fn validate(&self, token: &str) -> Result<Uuid, RefreshError> {
        let token_hash = hash_refresh_token(token);
        let Some(record) = self.store.lookup_refresh_token(&token_hash).await? else {
            return Err(RefreshError::NotFound);
        };

        if record.expires_at <= self.clock.now() {
            self.store.delete_refresh_token(&token_hash).await?;
            return Err(RefreshError::Expired);
        }

        if record.principal_status != PrincipalStatus::Active {
            self.store.delete_refresh_token(&token_hash).await?;
            warn!(
                principal_id = %record.principal_id,
                "Refresh token revoked: principal is no longer active"
            );
            return Err(RefreshError::PrincipalInactive);
        }

        Ok(record.principal_id)
    }

    /// Replace `old_token` with a new value and a renewed expiry.
    ///
    /// # Errors
    /// `NotFound` if the token was already rotated, revoked or has expired.
    pub async fn rotate(&self, old_token: &str) -> Result<(Uuid, IssuedRefreshToken), RefreshError> {
        let old_hash = hash_refresh_token(old_token);
        let now = self.clock.now();
        let expires_at = now + self.ttl;
        let token = generate_refresh_token()?;
        let new_hash = hash_refresh_token(&token);

        match self
            .store
            .rotate_refresh_token(&old_hash, &new_hash, expires_at, now)
            .await?
        {
            Some(principal_id) => {
                debug!(%principal_id, "Refresh token rotated");
                Ok((principal_id, IssuedRefreshToken { token, expires_at }))
            }
            None => {
                info!("Refresh token rotation lost: token already superseded");
                Err(RefreshError::NotFound)
            }
        }
    }

    /// Delete a token. Absent tokens are not an error.
    ///
    /// # Errors
    /// Returns `Persistence` if the store fails.
    pub async fn revoke(&self, token: &str) -> Result<bool, RefreshError> {
        let token_hash = hash_refresh_token(token);
        Ok(self.store.delete_refresh_token(&token_hash).await?)
    }
}
