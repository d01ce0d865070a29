//! Persisted auth records shared by the store implementations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

use super::lockout::LockoutRecord;

/// Principal category. A token minted for one kind is never accepted by an
/// endpoint family reserved for another.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    Admin,
    Supplier,
    MobileUser,
}

impl PrincipalKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Supplier => "supplier",
            Self::MobileUser => "mobile_user",
        }
    }
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrincipalKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Self::Admin),
            "supplier" => Ok(Self::Supplier),
            "mobile_user" => Ok(Self::MobileUser),
            other => Err(anyhow::anyhow!("unknown principal kind: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PrincipalStatus {
    Active,
    Inactive,
    /// Application submitted but not yet provisioned as a full account.
    Pending,
}

impl PrincipalStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Pending => "pending",
        }
    }
}

impl FromStr for PrincipalStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "pending" => Ok(Self::Pending),
            other => Err(anyhow::anyhow!("unknown principal status: {other}")),
        }
    }
}

/// Fields needed to authenticate a principal and drive its lockout state.
#[derive(Clone, Debug)]
pub struct PrincipalRecord {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub kind: PrincipalKind,
    pub status: PrincipalStatus,
    pub lockout: LockoutRecord,
    pub role_id: Option<Uuid>,
}

/// Stored refresh token joined with the owning principal's current status.
#[derive(Clone, Debug)]
pub struct RefreshRecord {
    pub principal_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub principal_status: PrincipalStatus,
}

#[derive(Clone, Debug)]
pub struct ModuleRow {
    pub id: Uuid,
    pub name: String,
}

/// Per-action flags of a `(role, module)` permission row.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PermissionFlags {
    pub can_read: bool,
    pub can_create: bool,
    pub can_update: bool,
    pub can_delete: bool,
}
