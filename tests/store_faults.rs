//! Router flows over a store that can serve stale reads or fail deletes.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{
        header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
        Request, StatusCode,
    },
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use partgate::api::{
    self,
    handlers::auth::{
        clock::ManualClock, AuthConfig, AuthState, AuthStore, LockoutRecord, MemoryStore,
        ModuleRow, PasswordVerifier, PermissionFlags, PrincipalKind, PrincipalRecord,
        PrincipalStatus, RefreshRecord,
    },
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::Mutex;
use uuid::Uuid;

const PASSWORD: &str = "correct horse battery staple";
const EMAIL: &str = "parts@supplier.test";
const SECRET: &str = "integration-test-signing-secret-0123456789";

/// Delegates to `MemoryStore`, with two switches for failure injection.
struct FaultyStore {
    inner: Arc<MemoryStore>,
    // Returned by email lookups instead of the live row while set.
    stale_principal: Mutex<Option<PrincipalRecord>>,
    fail_deletes: AtomicBool,
}

#[async_trait]
impl AuthStore for FaultyStore {
    async fn find_principal_by_email(&self, email: &str) -> Result<Option<PrincipalRecord>> {
        if let Some(snapshot) = self.stale_principal.lock().await.clone() {
            return Ok(Some(snapshot));
        }
        self.inner.find_principal_by_email(email).await
    }

    async fn find_principal(&self, principal_id: Uuid) -> Result<Option<PrincipalRecord>> {
        self.inner.find_principal(principal_id).await
    }

    async fn release_expired_lock(&self, principal_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.inner.release_expired_lock(principal_id, now).await
    }

    async fn record_failed_attempt(
        &self,
        principal_id: Uuid,
        threshold: i32,
        lock_until: DateTime<Utc>,
    ) -> Result<LockoutRecord> {
        self.inner
            .record_failed_attempt(principal_id, threshold, lock_until)
            .await
    }

    async fn reset_lockout(&self, principal_id: Uuid) -> Result<bool> {
        self.inner.reset_lockout(principal_id).await
    }

    async fn reset_lockout_unless_locked(
        &self,
        principal_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.reset_lockout_unless_locked(principal_id, now).await
    }

    async fn insert_refresh_token(
        &self,
        principal_id: Uuid,
        token_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner
            .insert_refresh_token(principal_id, token_hash, expires_at)
            .await
    }

    async fn lookup_refresh_token(&self, token_hash: &[u8]) -> Result<Option<RefreshRecord>> {
        self.inner.lookup_refresh_token(token_hash).await
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &[u8],
        new_hash: &[u8],
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        self.inner
            .rotate_refresh_token(old_hash, new_hash, expires_at, now)
            .await
    }

    async fn delete_refresh_token(&self, token_hash: &[u8]) -> Result<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(anyhow!("connection reset by peer"));
        }
        self.inner.delete_refresh_token(token_hash).await
    }

    async fn list_modules(&self) -> Result<Vec<ModuleRow>> {
        self.inner.list_modules().await
    }

    async fn role_permissions(
        &self,
        principal_id: Uuid,
        module_id: Uuid,
    ) -> Result<Option<PermissionFlags>> {
        self.inner.role_permissions(principal_id, module_id).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

struct Harness {
    app: Router,
    memory: Arc<MemoryStore>,
    store: Arc<FaultyStore>,
    principal_id: Uuid,
}

async fn harness() -> Result<Harness> {
    let memory = Arc::new(MemoryStore::with_default_modules().await);
    let passwords = PasswordVerifier::with_params(1024, 1, 1)?;
    let principal_id = memory
        .insert_principal(
            EMAIL,
            &passwords.hash(PASSWORD)?,
            PrincipalKind::Supplier,
            PrincipalStatus::Active,
            None,
        )
        .await;
    let store = Arc::new(FaultyStore {
        inner: memory.clone(),
        stale_principal: Mutex::new(None),
        fail_deletes: AtomicBool::new(false),
    });
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
            .single()
            .context("valid start time")?,
    ));

    let state = AuthState::new(
        AuthConfig::new("http://localhost:5173".to_string()),
        &SecretString::from(SECRET),
        store.clone(),
        clock,
        passwords,
    )
    .await?;

    Ok(Harness {
        app: api::app(Arc::new(state))?,
        memory,
        store,
        principal_id,
    })
}

async fn send(app: &Router, request: Request<Body>) -> Result<(StatusCode, Option<String>, Value)> {
    let response = tower::ServiceExt::oneshot(app.clone(), request).await?;
    let status = response.status();
    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, cookie, body))
}

async fn login(app: &Router, password: &str) -> Result<(StatusCode, Option<String>, Value)> {
    let request = Request::post("/v1/auth/login")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "email": EMAIL, "password": password }).to_string(),
        ))?;
    send(app, request).await
}

fn refresh_token(set_cookie: Option<&str>) -> Result<String> {
    set_cookie
        .and_then(|value| value.split(';').next())
        .and_then(|pair| pair.strip_prefix("partgate_refresh="))
        .filter(|token| !token.is_empty())
        .map(ToString::to_string)
        .context("refresh cookie")
}

#[tokio::test]
async fn correct_password_cannot_clear_a_lock_set_after_lookup() -> Result<()> {
    let h = harness().await?;
    let before = h
        .memory
        .find_principal_by_email(EMAIL)
        .await?
        .context("principal exists")?;

    for _ in 0..5 {
        login(&h.app, "wrong password").await?;
    }

    // Replay the unlocked row the slow request read before the lock landed.
    *h.store.stale_principal.lock().await = Some(before);
    let (status, cookie, body) = login(&h.app, PASSWORD).await?;
    *h.store.stale_principal.lock().await = None;

    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(body["error"], "account_locked");
    assert_eq!(body["retry_after_seconds"], 1800);
    assert!(cookie.is_none());
    assert_eq!(h.memory.refresh_token_count(h.principal_id).await, 0);

    let lockout = h
        .memory
        .lockout_of(h.principal_id)
        .await
        .context("principal exists")?;
    assert_eq!(lockout.failed_attempts, 5);
    assert!(lockout.locked_until.is_some());
    Ok(())
}

#[tokio::test]
async fn concurrent_wrong_logins_lock_at_the_threshold() -> Result<()> {
    let h = harness().await?;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let app = h.app.clone();
        handles.push(tokio::spawn(async move {
            login(&app, "wrong password").await
        }));
    }

    let mut remaining = BTreeSet::new();
    let mut locked = 0;
    for handle in handles {
        let (status, _, body) = handle.await??;
        match status {
            StatusCode::UNAUTHORIZED => {
                let value = body["remaining_attempts"]
                    .as_u64()
                    .context("remaining_attempts")?;
                assert!(remaining.insert(value), "duplicate remaining count {value}");
            }
            StatusCode::LOCKED => locked += 1,
            other => return Err(anyhow!("unexpected status {other}")),
        }
    }
    assert_eq!(remaining, BTreeSet::from([1, 2, 3, 4]));
    assert_eq!(locked, 16);

    let (status, _, _) = login(&h.app, PASSWORD).await?;
    assert_eq!(status, StatusCode::LOCKED);
    Ok(())
}

#[tokio::test]
async fn logout_reports_a_failed_revoke() -> Result<()> {
    let h = harness().await?;
    let (status, cookie, _) = login(&h.app, PASSWORD).await?;
    assert_eq!(status, StatusCode::OK);
    let token = refresh_token(cookie.as_deref())?;

    h.store.fail_deletes.store(true, Ordering::SeqCst);
    let request = Request::post("/v1/auth/logout")
        .header(COOKIE, format!("partgate_refresh={token}"))
        .body(Body::empty())?;
    let (status, cookie, body) = send(&h.app, request).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "internal_error");
    assert!(cookie.is_none());
    assert_eq!(h.memory.refresh_token_count(h.principal_id).await, 1);

    h.store.fail_deletes.store(false, Ordering::SeqCst);
    let request = Request::post("/v1/auth/logout")
        .header(COOKIE, format!("partgate_refresh={token}"))
        .body(Body::empty())?;
    let (status, _, _) = send(&h.app, request).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(h.memory.refresh_token_count(h.principal_id).await, 0);
    Ok(())
}
