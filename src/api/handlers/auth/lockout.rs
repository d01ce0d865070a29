//! Brute-force lockout state machine.
//!
//! Flow Overview:
//! 1) Before checking a password, an elapsed lock is lazily cleared.
//! 2) A still-active lock rejects the attempt without touching the password.
//! 3) A failed password increments the counter in one atomic store update,
//!    which also sets `locked_until` when the threshold is reached.
//! 4) A successful password resets both fields unless a concurrent failure
//!    locked the principal in the meantime. An administrative unlock always
//!    resets them.
//!
//! Pending principals never enter this machine; the login flow rejects them
//! before any counter is read.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::storage::AuthStore;

pub const DEFAULT_THRESHOLD: i32 = 5;
pub const DEFAULT_LOCK_DURATION_SECONDS: i64 = 30 * 60;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LockoutRecord {
    pub failed_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LockState {
    Unlocked,
    Locked { until: DateTime<Utc> },
    /// A lock was set but its window has passed; it must be cleared first.
    Elapsed,
}

impl LockoutRecord {
    #[must_use]
    pub const fn unlocked() -> Self {
        Self {
            failed_attempts: 0,
            locked_until: None,
        }
    }

    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> LockState {
        match self.locked_until {
            Some(until) if until > now => LockState::Locked { until },
            Some(_) => LockState::Elapsed,
            None => LockState::Unlocked,
        }
    }

    /// The record a single failed attempt produces. Store implementations
    /// must apply exactly this transition atomically.
    #[must_use]
    pub fn after_failure(self, threshold: i32, lock_until: DateTime<Utc>) -> Self {
        let failed_attempts = self.failed_attempts.saturating_add(1);
        Self {
            failed_attempts,
            locked_until: if failed_attempts >= threshold {
                Some(lock_until)
            } else {
                self.locked_until
            },
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LockoutPolicy {
    threshold: i32,
    duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, Duration::seconds(DEFAULT_LOCK_DURATION_SECONDS))
    }
}

impl LockoutPolicy {
    #[must_use]
    pub fn new(threshold: i32, duration: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            duration,
        }
    }

    #[must_use]
    pub const fn threshold(&self) -> i32 {
        self.threshold
    }

    #[must_use]
    pub fn lock_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.duration
    }

    #[must_use]
    pub fn remaining_attempts(&self, record: &LockoutRecord) -> u32 {
        u32::try_from(self.threshold - record.failed_attempts).unwrap_or(0)
    }
}

/// Seconds until `until`, rounded up so a client never retries early.
#[must_use]
pub fn retry_after_seconds(until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (until - now).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    u64::try_from((millis + 999) / 1000).unwrap_or(0)
}

/// Human readable remaining lock time.
#[must_use]
pub fn lock_message(retry_after_seconds: u64) -> String {
    let minutes = retry_after_seconds / 60;
    let seconds = retry_after_seconds % 60;
    let remaining = match (minutes, seconds) {
        (0, s) => unit(s, "second"),
        (m, 0) => unit(m, "minute"),
        (m, s) => format!("{} and {}", unit(m, "minute"), unit(s, "second")),
    };
    format!("Account locked due to too many failed attempts. Try again in {remaining}.")
}

fn unit(value: u64, name: &str) -> String {
    if value == 1 {
        format!("1 {name}")
    } else {
        format!("{value} {name}s")
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureOutcome {
    Remaining(u32),
    Locked { retry_after_seconds: u64 },
}

#[derive(Clone, Copy, Debug)]
pub struct LockoutGuard {
    policy: LockoutPolicy,
}

impl LockoutGuard {
    #[must_use]
    pub const fn new(policy: LockoutPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub const fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Gate an attempt before its credential is evaluated.
    ///
    /// Returns `Some(retry_after_seconds)` while the principal is locked. An
    /// elapsed lock is cleared in the store before returning `None`.
    ///
    /// # Errors
    /// Returns an error if the store update fails.
    pub async fn check(
        &self,
        store: &dyn AuthStore,
        principal_id: Uuid,
        record: &LockoutRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>> {
        match record.state(now) {
            LockState::Unlocked => Ok(None),
            LockState::Locked { until } => Ok(Some(retry_after_seconds(until, now))),
            LockState::Elapsed => {
                if store.release_expired_lock(principal_id, now).await? {
                    info!(%principal_id, "Lockout window elapsed, counter reset");
                }
                Ok(None)
            }
        }
    }

    /// Count one failed credential check.
    ///
    /// # Errors
    /// Returns an error if the store update fails.
    pub async fn register_failure(
        &self,
        store: &dyn AuthStore,
        principal_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome> {
        let record = store
            .record_failed_attempt(
                principal_id,
                self.policy.threshold(),
                self.policy.lock_until(now),
            )
            .await?;

        if let LockState::Locked { until } = record.state(now) {
            warn!(
                %principal_id,
                failed_attempts = record.failed_attempts,
                %until,
                "Principal locked after repeated failed logins"
            );
            return Ok(FailureOutcome::Locked {
                retry_after_seconds: retry_after_seconds(until, now),
            });
        }

        Ok(FailureOutcome::Remaining(
            self.policy.remaining_attempts(&record),
        ))
    }

    /// Reset the machine after a successful credential check.
    ///
    /// The reset only applies while no lock is active, so a request that
    /// passed `check` before a concurrent failure locked the principal cannot
    /// clear that lock. Returns `Some(retry_after_seconds)` in that case.
    ///
    /// # Errors
    /// Returns an error if a store call fails.
    pub async fn register_success(
        &self,
        store: &dyn AuthStore,
        principal_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<u64>> {
        if store.reset_lockout_unless_locked(principal_id, now).await? {
            return Ok(None);
        }

        let until = store
            .find_principal(principal_id)
            .await?
            .and_then(|principal| principal.lockout.locked_until);
        warn!(%principal_id, "Correct password refused: principal was locked concurrently");
        Ok(Some(
            until.map_or(1, |until| retry_after_seconds(until, now).max(1)),
        ))
    }

    /// Force the unlocked state regardless of the current one.
    ///
    /// Returns `false` when the principal does not exist.
    ///
    /// # Errors
    /// Returns an error if the store update fails.
    pub async fn unlock(&self, store: &dyn AuthStore, principal_id: Uuid) -> Result<bool> {
        let found = store.reset_lockout(principal_id).await?;
        if found {
            info!(%principal_id, "Principal unlocked by administrator");
        }
        Ok(found)
    }
}
