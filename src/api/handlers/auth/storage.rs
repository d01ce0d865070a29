//! Persistence for principals, refresh tokens and role permissions.
//!
//! Every mutation that guards a security invariant is a single conditional
//! statement so concurrent requests cannot interleave a read-then-write:
//! the failed-attempt counter increments in place, a successful login only
//! clears the counter while no lock is active, and refresh rotation is a
//! compare-and-swap on the stored digest.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Connection, PgPool, Row};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::{
    lockout::LockoutRecord,
    models::{ModuleRow, PermissionFlags, PrincipalRecord, RefreshRecord},
    utils::is_unique_violation,
};

#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn find_principal_by_email(&self, email: &str) -> Result<Option<PrincipalRecord>>;

    async fn find_principal(&self, principal_id: Uuid) -> Result<Option<PrincipalRecord>>;

    /// Clear a lock whose window has passed. Returns `true` if a row changed.
    async fn release_expired_lock(&self, principal_id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Atomically count one failure and lock at `threshold`.
    async fn record_failed_attempt(
        &self,
        principal_id: Uuid,
        threshold: i32,
        lock_until: DateTime<Utc>,
    ) -> Result<LockoutRecord>;

    /// Reset counter and lock. Returns `false` when the principal does not exist.
    async fn reset_lockout(&self, principal_id: Uuid) -> Result<bool>;

    /// Reset counter and lock only if no lock is active at `now`.
    /// Returns `false` when a lock is active or the principal does not exist.
    async fn reset_lockout_unless_locked(
        &self,
        principal_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Returns `false` if the digest collides with an existing row.
    async fn insert_refresh_token(
        &self,
        principal_id: Uuid,
        token_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn lookup_refresh_token(&self, token_hash: &[u8]) -> Result<Option<RefreshRecord>>;

    /// Swap the stored digest only if it still equals `old_hash` and is unexpired.
    async fn rotate_refresh_token(
        &self,
        old_hash: &[u8],
        new_hash: &[u8],
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>>;

    async fn delete_refresh_token(&self, token_hash: &[u8]) -> Result<bool>;

    async fn list_modules(&self) -> Result<Vec<ModuleRow>>;

    /// Flags for the principal's role on a module, if the role is active and a row exists.
    async fn role_permissions(
        &self,
        principal_id: Uuid,
        module_id: Uuid,
    ) -> Result<Option<PermissionFlags>>;

    /// Cheap connectivity probe for `/health`.
    async fn ping(&self) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn principal_from_row(row: &PgRow) -> Result<PrincipalRecord> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    Ok(PrincipalRecord {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        kind: kind.parse()?,
        status: status.parse()?,
        lockout: LockoutRecord {
            failed_attempts: row.get("failed_attempts"),
            locked_until: row.get("locked_until"),
        },
        role_id: row.get("role_id"),
    })
}

const PRINCIPAL_COLUMNS: &str =
    "id, email, password_hash, kind, status, failed_attempts, locked_until, role_id";

#[async_trait]
impl AuthStore for PgStore {
    async fn find_principal_by_email(&self, email: &str) -> Result<Option<PrincipalRecord>> {
        let query = format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE email = $1");
        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "SELECT ... FROM principals WHERE email = $1"))
            .await
            .context("failed to lookup principal by email")?;
        row.as_ref().map(principal_from_row).transpose()
    }

    async fn find_principal(&self, principal_id: Uuid) -> Result<Option<PrincipalRecord>> {
        let query = format!("SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(principal_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", "SELECT ... FROM principals WHERE id = $1"))
            .await
            .context("failed to lookup principal")?;
        row.as_ref().map(principal_from_row).transpose()
    }

    async fn release_expired_lock(&self, principal_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let query = r"
            UPDATE principals
            SET failed_attempts = 0,
                locked_until = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND locked_until IS NOT NULL
              AND locked_until <= $2
        ";
        let result = sqlx::query(query)
            .bind(principal_id)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to release expired lock")?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_failed_attempt(
        &self,
        principal_id: Uuid,
        threshold: i32,
        lock_until: DateTime<Utc>,
    ) -> Result<LockoutRecord> {
        // Right-hand sides see the pre-update row, so `failed_attempts + 1`
        // in the CASE is the new count.
        let query = r"
            UPDATE principals
            SET failed_attempts = failed_attempts + 1,
                locked_until = CASE
                    WHEN failed_attempts + 1 >= $2 THEN $3
                    ELSE locked_until
                END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING failed_attempts, locked_until
        ";
        let row = sqlx::query(query)
            .bind(principal_id)
            .bind(threshold)
            .bind(lock_until)
            .fetch_one(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to record failed attempt")?;
        Ok(LockoutRecord {
            failed_attempts: row.get("failed_attempts"),
            locked_until: row.get("locked_until"),
        })
    }

    async fn reset_lockout(&self, principal_id: Uuid) -> Result<bool> {
        let query = r"
            UPDATE principals
            SET failed_attempts = 0,
                locked_until = NULL,
                updated_at = NOW()
            WHERE id = $1
        ";
        let result = sqlx::query(query)
            .bind(principal_id)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to reset lockout")?;
        Ok(result.rows_affected() > 0)
    }

    async fn reset_lockout_unless_locked(
        &self,
        principal_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let query = r"
            UPDATE principals
            SET failed_attempts = 0,
                locked_until = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND (locked_until IS NULL OR locked_until <= $2)
        ";
        let result = sqlx::query(query)
            .bind(principal_id)
            .bind(now)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to reset lockout")?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_refresh_token(
        &self,
        principal_id: Uuid,
        token_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let query = r"
            INSERT INTO refresh_tokens (principal_id, token_hash, expires_at)
            VALUES ($1, $2, $3)
        ";
        let result = sqlx::query(query)
            .bind(principal_id)
            .bind(token_hash)
            .bind(expires_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) if is_unique_violation(&err) => Ok(false),
            Err(err) => Err(err).context("failed to insert refresh token"),
        }
    }

    async fn lookup_refresh_token(&self, token_hash: &[u8]) -> Result<Option<RefreshRecord>> {
        let query = r"
            SELECT refresh_tokens.principal_id,
                   refresh_tokens.expires_at,
                   principals.status
            FROM refresh_tokens
            JOIN principals ON principals.id = refresh_tokens.principal_id
            WHERE refresh_tokens.token_hash = $1
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup refresh token")?;

        row.map(|row| {
            let status: String = row.get("status");
            Ok(RefreshRecord {
                principal_id: row.get("principal_id"),
                expires_at: row.get("expires_at"),
                principal_status: status.parse()?,
            })
        })
        .transpose()
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &[u8],
        new_hash: &[u8],
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let query = r"
            UPDATE refresh_tokens
            SET token_hash = $2,
                expires_at = $3
            WHERE token_hash = $1
              AND expires_at > $4
            RETURNING principal_id
        ";
        let row = sqlx::query(query)
            .bind(old_hash)
            .bind(new_hash)
            .bind(expires_at)
            .bind(now)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to rotate refresh token")?;
        Ok(row.map(|row| row.get("principal_id")))
    }

    async fn delete_refresh_token(&self, token_hash: &[u8]) -> Result<bool> {
        let query = "DELETE FROM refresh_tokens WHERE token_hash = $1";
        let result = sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete refresh token")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_modules(&self) -> Result<Vec<ModuleRow>> {
        let query = "SELECT id, name FROM modules";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to list modules")?;
        Ok(rows
            .iter()
            .map(|row| ModuleRow {
                id: row.get("id"),
                name: row.get("name"),
            })
            .collect())
    }

    async fn role_permissions(
        &self,
        principal_id: Uuid,
        module_id: Uuid,
    ) -> Result<Option<PermissionFlags>> {
        let query = r"
            SELECT rmp.can_read, rmp.can_create, rmp.can_update, rmp.can_delete
            FROM principals
            JOIN roles ON roles.id = principals.role_id
            JOIN role_module_permissions rmp
              ON rmp.role_id = roles.id
             AND rmp.module_id = $2
            WHERE principals.id = $1
              AND principals.status = 'active'
              AND roles.status = 'active'
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(principal_id)
            .bind(module_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup role permissions")?;
        Ok(row.map(|row| PermissionFlags {
            can_read: row.get("can_read"),
            can_create: row.get("can_create"),
            can_update: row.get("can_update"),
            can_delete: row.get("can_delete"),
        }))
    }

    async fn ping(&self) -> Result<()> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;
        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")
    }
}
