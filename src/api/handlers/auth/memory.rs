//! In-process `AuthStore` for tests and local runs without PostgreSQL.
//!
//! Every trait method takes the lock once, so each operation is atomic in the
//! same way the single-statement SQL is.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    lockout::LockoutRecord,
    models::{
        ModuleRow, PermissionFlags, PrincipalKind, PrincipalRecord, PrincipalStatus, RefreshRecord,
    },
    permissions::Module,
    storage::AuthStore,
};

#[derive(Clone, Debug)]
struct StoredRefresh {
    principal_id: Uuid,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    principals: HashMap<Uuid, PrincipalRecord>,
    refresh_tokens: HashMap<Vec<u8>, StoredRefresh>,
    roles: HashMap<Uuid, bool>,
    modules: Vec<ModuleRow>,
    permissions: HashMap<(Uuid, Uuid), PermissionFlags>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with every module the service knows about.
    pub async fn with_default_modules() -> Self {
        let store = Self::new();
        for module in Module::ALL {
            store.insert_module(module.as_str()).await;
        }
        store
    }

    pub async fn insert_module(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.lock().await.modules.push(ModuleRow {
            id,
            name: name.to_string(),
        });
        id
    }

    pub async fn insert_role(&self, active: bool) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.lock().await.roles.insert(id, active);
        id
    }

    pub async fn set_role_active(&self, role_id: Uuid, active: bool) {
        self.inner.lock().await.roles.insert(role_id, active);
    }

    /// Grant flags to a role on a module by name.
    ///
    /// # Errors
    /// Returns an error if the module name is unknown.
    pub async fn grant(&self, role_id: Uuid, module: &str, flags: PermissionFlags) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let module_id = inner
            .modules
            .iter()
            .find(|row| row.name == module)
            .map(|row| row.id)
            .ok_or_else(|| anyhow!("unknown module: {module}"))?;
        inner.permissions.insert((role_id, module_id), flags);
        Ok(())
    }

    pub async fn insert_principal(
        &self,
        email: &str,
        password_hash: &str,
        kind: PrincipalKind,
        status: PrincipalStatus,
        role_id: Option<Uuid>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.inner.lock().await.principals.insert(
            id,
            PrincipalRecord {
                id,
                email: email.to_string(),
                password_hash: password_hash.to_string(),
                kind,
                status,
                lockout: LockoutRecord::unlocked(),
                role_id,
            },
        );
        id
    }

    pub async fn set_principal_status(&self, principal_id: Uuid, status: PrincipalStatus) {
        if let Some(principal) = self.inner.lock().await.principals.get_mut(&principal_id) {
            principal.status = status;
        }
    }

    pub async fn lockout_of(&self, principal_id: Uuid) -> Option<LockoutRecord> {
        self.inner
            .lock()
            .await
            .principals
            .get(&principal_id)
            .map(|principal| principal.lockout)
    }

    pub async fn refresh_token_count(&self, principal_id: Uuid) -> usize {
        self.inner
            .lock()
            .await
            .refresh_tokens
            .values()
            .filter(|row| row.principal_id == principal_id)
            .count()
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn find_principal_by_email(&self, email: &str) -> Result<Option<PrincipalRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .principals
            .values()
            .find(|principal| principal.email == email)
            .cloned())
    }

    async fn find_principal(&self, principal_id: Uuid) -> Result<Option<PrincipalRecord>> {
        Ok(self.inner.lock().await.principals.get(&principal_id).cloned())
    }

    async fn release_expired_lock(&self, principal_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(principal) = inner.principals.get_mut(&principal_id) else {
            return Ok(false);
        };
        match principal.lockout.locked_until {
            Some(until) if until <= now => {
                principal.lockout = LockoutRecord::unlocked();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_failed_attempt(
        &self,
        principal_id: Uuid,
        threshold: i32,
        lock_until: DateTime<Utc>,
    ) -> Result<LockoutRecord> {
        let mut inner = self.inner.lock().await;
        let principal = inner
            .principals
            .get_mut(&principal_id)
            .ok_or_else(|| anyhow!("principal not found: {principal_id}"))?;
        principal.lockout = principal.lockout.after_failure(threshold, lock_until);
        Ok(principal.lockout)
    }

    async fn reset_lockout(&self, principal_id: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .principals
            .get_mut(&principal_id)
            .map(|principal| principal.lockout = LockoutRecord::unlocked())
            .is_some())
    }

    async fn reset_lockout_unless_locked(
        &self,
        principal_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(principal) = inner.principals.get_mut(&principal_id) else {
            return Ok(false);
        };
        if principal.lockout.locked_until.is_some_and(|until| until > now) {
            return Ok(false);
        }
        principal.lockout = LockoutRecord::unlocked();
        Ok(true)
    }

    async fn insert_refresh_token(
        &self,
        principal_id: Uuid,
        token_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.principals.contains_key(&principal_id) {
            return Err(anyhow!("principal not found: {principal_id}"));
        }
        if inner.refresh_tokens.contains_key(token_hash) {
            return Ok(false);
        }
        inner.refresh_tokens.insert(
            token_hash.to_vec(),
            StoredRefresh {
                principal_id,
                expires_at,
            },
        );
        Ok(true)
    }

    async fn lookup_refresh_token(&self, token_hash: &[u8]) -> Result<Option<RefreshRecord>> {
        let inner = self.inner.lock().await;
        let Some(row) = inner.refresh_tokens.get(token_hash) else {
            return Ok(None);
        };
        let principal = inner
            .principals
            .get(&row.principal_id)
            .ok_or_else(|| anyhow!("refresh token references a missing principal"))?;
        Ok(Some(RefreshRecord {
            principal_id: row.principal_id,
            expires_at: row.expires_at,
            principal_status: principal.status,
        }))
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &[u8],
        new_hash: &[u8],
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let mut inner = self.inner.lock().await;
        let still_current = inner
            .refresh_tokens
            .get(old_hash)
            .is_some_and(|row| row.expires_at > now);
        if !still_current || inner.refresh_tokens.contains_key(new_hash) {
            return Ok(None);
        }
        let Some(mut row) = inner.refresh_tokens.remove(old_hash) else {
            return Ok(None);
        };
        row.expires_at = expires_at;
        let principal_id = row.principal_id;
        inner.refresh_tokens.insert(new_hash.to_vec(), row);
        Ok(Some(principal_id))
    }

    async fn delete_refresh_token(&self, token_hash: &[u8]) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .await
            .refresh_tokens
            .remove(token_hash)
            .is_some())
    }

    async fn list_modules(&self) -> Result<Vec<ModuleRow>> {
        Ok(self.inner.lock().await.modules.clone())
    }

    async fn role_permissions(
        &self,
        principal_id: Uuid,
        module_id: Uuid,
    ) -> Result<Option<PermissionFlags>> {
        let inner = self.inner.lock().await;
        let Some(principal) = inner.principals.get(&principal_id) else {
            return Ok(None);
        };
        if principal.status != PrincipalStatus::Active {
            return Ok(None);
        }
        let Some(role_id) = principal.role_id else {
            return Ok(None);
        };
        if !inner.roles.get(&role_id).copied().unwrap_or(false) {
            return Ok(None);
        }
        Ok(inner.permissions.get(&(role_id, module_id)).copied())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
