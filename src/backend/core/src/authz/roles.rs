//! Built-in roles and the default permission catalog.
//!
//! Warden ships with three seed roles:
//!
//! | Role       | Description                                                     |
//! |------------|-----------------------------------------------------------------|
//! | Admin      | Every permission in the catalog                                 |
//! | Staff      | Manage any booking, read any user; no user deletion or grants   |
//! | Customer   | Own bookings, own profile, own addresses                        |
//!
//! The same data lives in `seed/catalog.toml`; deployments may replace it
//! wholesale with their own seed file or with the database tables.

use super::catalog::CatalogSeed;
use super::models::{Permission, Role, RolePermission};

/// `(name, description, category)` for every default permission.
const DEFAULT_PERMISSIONS: &[(&str, &str, &str)] = &[
    ("booking:create", "Create a booking", "booking"),
    ("booking:read", "Read own bookings", "booking"),
    ("booking:read:any", "Read any booking", "booking"),
    ("booking:update", "Update own bookings", "booking"),
    ("booking:update:any", "Update any booking", "booking"),
    ("booking:cancel", "Cancel own bookings", "booking"),
    ("booking:cancel:any", "Cancel any booking", "booking"),
    ("user:read", "Read own profile", "user"),
    ("user:read:any", "Read any user profile", "user"),
    ("user:update", "Update own profile", "user"),
    ("user:update:any", "Update any user profile", "user"),
    ("user:delete:any", "Delete any user", "user"),
    ("address:create", "Add an address", "address"),
    ("address:read", "Read own addresses", "address"),
    ("address:update", "Update own addresses", "address"),
    ("address:update:any", "Update any address", "address"),
    ("address:delete", "Delete own addresses", "address"),
    ("address:delete:any", "Delete any address", "address"),
    ("permission:read", "Inspect the permission catalog and overrides", "permission"),
    ("permission:grant", "Grant permission overrides", "permission"),
    ("permission:revoke", "Revoke permission overrides", "permission"),
];

/// Predefined role templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredefinedRole {
    Admin,
    Staff,
    Customer,
}

impl PredefinedRole {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Staff => "staff",
            Self::Customer => "customer",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Admin => "Administrator",
            Self::Staff => "Staff",
            Self::Customer => "Customer",
        }
    }

    /// Default permission names for this role.
    pub fn permissions(&self) -> Vec<&'static str> {
        match self {
            Self::Admin => DEFAULT_PERMISSIONS.iter().map(|(name, _, _)| *name).collect(),
            Self::Staff => vec![
                "booking:create",
                "booking:read",
                "booking:read:any",
                "booking:update",
                "booking:update:any",
                "booking:cancel",
                "booking:cancel:any",
                "user:read",
                "user:read:any",
                "user:update",
                "address:read",
                "permission:read",
            ],
            Self::Customer => vec![
                "booking:create",
                "booking:read",
                "booking:update",
                "booking:cancel",
                "user:read",
                "user:update",
                "address:create",
                "address:read",
                "address:update",
                "address:delete",
            ],
        }
    }

    pub fn to_role(&self) -> Role {
        Role::new(self.id(), self.display_name())
    }

    pub fn all() -> Vec<PredefinedRole> {
        vec![Self::Admin, Self::Staff, Self::Customer]
    }
}

/// The default permission records.
pub fn default_permissions() -> Vec<Permission> {
    DEFAULT_PERMISSIONS
        .iter()
        .map(|(name, description, category)| Permission::new(*name, *description, *category))
        .collect()
}

/// The complete built-in catalog seed.
pub fn default_seed() -> CatalogSeed {
    let roles = PredefinedRole::all();
    let role_permissions = roles
        .iter()
        .flat_map(|role| {
            role.permissions()
                .into_iter()
                .map(move |perm| RolePermission::new(role.id(), perm))
        })
        .collect();

    CatalogSeed {
        permissions: default_permissions(),
        roles: roles.iter().map(PredefinedRole::to_role).collect(),
        role_permissions,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
