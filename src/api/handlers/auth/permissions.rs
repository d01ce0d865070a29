//! Role-based authorization: role → module → action.
//!
//! Modules are a closed enum. At startup the registry maps every variant to
//! the id of its row in `modules` and refuses to start if one is missing, so
//! a handler can never check a permission on a module the database does not
//! know about. Lookups fail closed: no role, inactive role, or no row for the
//! `(role, module)` pair all mean "denied".

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::{debug, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    error::AuthError, models::PermissionFlags, principal::Principal, storage::AuthStore,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Administrators,
    Roles,
    Suppliers,
    Products,
    Categories,
    Brands,
    Vehicles,
    Orders,
    Customers,
    Inventory,
    Promotions,
    Reports,
}

impl Module {
    pub const ALL: [Self; 12] = [
        Self::Administrators,
        Self::Roles,
        Self::Suppliers,
        Self::Products,
        Self::Categories,
        Self::Brands,
        Self::Vehicles,
        Self::Orders,
        Self::Customers,
        Self::Inventory,
        Self::Promotions,
        Self::Reports,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Administrators => "administrators",
            Self::Roles => "roles",
            Self::Suppliers => "suppliers",
            Self::Products => "products",
            Self::Categories => "categories",
            Self::Brands => "brands",
            Self::Vehicles => "vehicles",
            Self::Orders => "orders",
            Self::Customers => "customers",
            Self::Inventory => "inventory",
            Self::Promotions => "promotions",
            Self::Reports => "reports",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

impl PermissionFlags {
    #[must_use]
    pub const fn allows(&self, action: Action) -> bool {
        match action {
            Action::Read => self.can_read,
            Action::Create => self.can_create,
            Action::Update => self.can_update,
            Action::Delete => self.can_delete,
        }
    }
}

/// Module ids resolved against the persisted module list.
#[derive(Clone, Debug)]
pub struct ModuleRegistry {
    ids: HashMap<Module, Uuid>,
}

impl ModuleRegistry {
    /// Resolve every `Module` variant to its database id.
    ///
    /// # Errors
    /// Fails if the store cannot be read or any variant has no row.
    pub async fn load(store: &dyn AuthStore) -> Result<Self> {
        let rows = store.list_modules().await?;
        let by_name: HashMap<&str, Uuid> =
            rows.iter().map(|row| (row.name.as_str(), row.id)).collect();

        let missing: Vec<&str> = Module::ALL
            .iter()
            .map(|module| module.as_str())
            .filter(|name| !by_name.contains_key(name))
            .collect();
        if !missing.is_empty() {
            bail!(
                "modules table is missing entries for: {}",
                missing.join(", ")
            );
        }

        for row in &rows {
            if !Module::ALL.iter().any(|module| module.as_str() == row.name) {
                debug!(module = %row.name, "Persisted module has no typed counterpart");
            }
        }

        let ids = Module::ALL
            .iter()
            .filter_map(|module| by_name.get(module.as_str()).map(|id| (*module, *id)))
            .collect();
        Ok(Self { ids })
    }

    #[must_use]
    pub fn id(&self, module: Module) -> Option<Uuid> {
        self.ids.get(&module).copied()
    }
}

pub struct PermissionChecker {
    store: Arc<dyn AuthStore>,
    registry: ModuleRegistry,
}

impl PermissionChecker {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>, registry: ModuleRegistry) -> Self {
        Self { store, registry }
    }

    #[must_use]
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Whether the principal's role grants `action` on `module`.
    ///
    /// # Errors
    /// Returns an error only when the store fails.
    #[instrument(skip(self))]
    pub async fn check_permission(
        &self,
        principal_id: Uuid,
        module: Module,
        action: Action,
    ) -> Result<bool> {
        let Some(module_id) = self.registry.id(module) else {
            return Ok(false);
        };
        let flags = self.store.role_permissions(principal_id, module_id).await?;
        Ok(flags.is_some_and(|flags| flags.allows(action)))
    }

    /// Gate a handler: `Ok(())` when allowed, `AuthorizationDenied` otherwise.
    ///
    /// # Errors
    /// `AuthorizationDenied` when the check fails, `Persistence` when the store fails.
    pub async fn require_permission(
        &self,
        principal: &Principal,
        module: Module,
        action: Action,
    ) -> Result<(), AuthError> {
        if self
            .check_permission(principal.principal_id, module, action)
            .await?
        {
            Ok(())
        } else {
            warn!(
                principal_id = %principal.principal_id,
                %module,
                %action,
                "Permission denied"
            );
            Err(AuthError::AuthorizationDenied)
        }
    }
}
