//! Permission catalog: the static registry of permission names and the
//! role → permission-set mapping.
//!
//! The catalog is built once at startup from a [`CatalogSeed`] and is
//! read-only afterwards. Reloading means building a new catalog and new
//! resolvers from it; nothing mutates a live catalog during a request.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

use super::models::{Permission, PermissionName, Role, RoleName, RolePermission};
use crate::error::{Result, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Seed
// ═══════════════════════════════════════════════════════════════════════════════

/// Raw catalog data as read from a seed file or the database.
///
/// TOML layout:
///
/// ```toml
/// [[permissions]]
/// name = "booking:create"
/// description = "Create a booking"
/// category = "booking"
///
/// [[roles]]
/// name = "customer"
/// display_name = "Customer"
///
/// [[role_permissions]]
/// role = "customer"
/// permission = "booking:create"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub role_permissions: Vec<RolePermission>,
}

impl CatalogSeed {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Catalog
// ═══════════════════════════════════════════════════════════════════════════════

/// Read-only permission registry.
#[derive(Debug, Clone)]
pub struct PermissionCatalog {
    permissions: HashMap<String, Permission>,
    roles: HashMap<RoleName, Role>,
    /// Effective static set per active role: union of non-revoked grants of
    /// active permissions.
    role_sets: HashMap<RoleName, HashSet<String>>,
}

impl PermissionCatalog {
    /// Validate a seed and build the catalog.
    ///
    /// Rejects malformed or duplicate permission names, duplicate roles, and
    /// role grants that reference unknown roles or permissions.
    pub fn from_seed(seed: CatalogSeed) -> Result<Self> {
        let mut permissions = HashMap::with_capacity(seed.permissions.len());
        for permission in seed.permissions {
            if !PermissionName::is_valid(&permission.name) {
                return Err(WardenError::invalid_permission_name(&permission.name));
            }
            if permissions.contains_key(&permission.name) {
                return Err(WardenError::duplicate_permission(&permission.name));
            }
            permissions.insert(permission.name.clone(), permission);
        }

        let mut roles = HashMap::with_capacity(seed.roles.len());
        for role in seed.roles {
            if roles.contains_key(&role.name) {
                return Err(WardenError::invalid_catalog(format!(
                    "Duplicate role in catalog: {}",
                    role.name
                )));
            }
            roles.insert(role.name.clone(), role);
        }

        let mut role_sets: HashMap<RoleName, HashSet<String>> = roles
            .values()
            .filter(|r| r.is_active)
            .map(|r| (r.name.clone(), HashSet::new()))
            .collect();

        for grant in seed.role_permissions {
            let role = roles
                .get(&grant.role)
                .ok_or_else(|| WardenError::unknown_role(grant.role.as_str()))?;
            let permission = permissions.get(&grant.permission).ok_or_else(|| {
                WardenError::invalid_catalog(format!(
                    "Role {} is granted unknown permission {}",
                    grant.role, grant.permission
                ))
            })?;

            if grant.is_revoked() || !role.is_active || !permission.is_active {
                debug!(
                    role = %grant.role,
                    permission = %grant.permission,
                    "Skipping inactive role grant"
                );
                continue;
            }

            if let Some(set) = role_sets.get_mut(&grant.role) {
                set.insert(grant.permission);
            }
        }

        info!(
            permissions = permissions.len(),
            roles = roles.len(),
            "Permission catalog built"
        );

        Ok(Self {
            permissions,
            roles,
            role_sets,
        })
    }

    /// Build from a TOML seed file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_seed(CatalogSeed::from_toml_file(path)?)
    }

    /// An empty catalog: every role maps to the empty set.
    pub fn empty() -> Self {
        Self {
            permissions: HashMap::new(),
            roles: HashMap::new(),
            role_sets: HashMap::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Default permission set of `role`. Unknown or inactive roles yield the
    /// empty set.
    pub fn permissions_for_role(&self, role: &RoleName) -> HashSet<String> {
        self.role_set(role).cloned().unwrap_or_default()
    }

    /// Borrowing variant of [`permissions_for_role`](Self::permissions_for_role).
    pub fn role_set(&self, role: &RoleName) -> Option<&HashSet<String>> {
        self.role_sets.get(role)
    }

    /// Whether `role` grants `permission` by default.
    pub fn role_grants(&self, role: &RoleName, permission: &str) -> bool {
        self.role_sets
            .get(role)
            .is_some_and(|set| set.contains(permission))
    }

    /// Whether `name` is an active permission in the catalog.
    pub fn is_known_permission(&self, name: &str) -> bool {
        self.permissions.get(name).is_some_and(|p| p.is_active)
    }

    pub fn permission(&self, name: &str) -> Option<&Permission> {
        self.permissions.get(name)
    }

    pub fn role(&self, name: &RoleName) -> Option<&Role> {
        self.roles.get(name)
    }

    /// Roles sorted by name.
    pub fn roles(&self) -> Vec<&Role> {
        let mut roles: Vec<&Role> = self.roles.values().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        roles
    }

    /// Permissions sorted by name.
    pub fn permissions(&self) -> Vec<&Permission> {
        let mut perms: Vec<&Permission> = self.permissions.values().collect();
        perms.sort_by(|a, b| a.name.cmp(&b.name));
        perms
    }

    pub fn permissions_by_category(&self) -> BTreeMap<String, Vec<&Permission>> {
        let mut grouped: BTreeMap<String, Vec<&Permission>> = BTreeMap::new();
        for perm in self.permissions() {
            grouped.entry(perm.category.clone()).or_default().push(perm);
        }
        grouped
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }
}

impl Default for PermissionCatalog {
    /// The built-in catalog from [`super::roles::default_seed`].
    fn default() -> Self {
        Self::from_seed(super::roles::default_seed())
            .unwrap_or_else(|_| Self::empty())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use chrono::Utc;

    fn role(name: &str) -> RoleName {
        RoleName::new(name)
    }

    fn small_seed() -> CatalogSeed {
        CatalogSeed {
            permissions: vec![
                Permission::new("booking:create", "", "booking"),
                Permission::new("booking:read", "", "booking"),
                Permission::new("user:delete:any", "", "user").deactivated(),
            ],
            roles: vec![
                Role::new("customer", "Customer"),
                Role::new("ghost", "Ghost").deactivated(),
            ],
            role_permissions: vec![
                RolePermission::new("customer", "booking:create"),
                RolePermission::new("customer", "booking:read").revoked(Utc::now()),
                RolePermission::new("customer", "user:delete:any"),
                RolePermission::new("ghost", "booking:create"),
            ],
        }
    }

    #[test]
    fn test_default_catalog_customer() {
        let catalog = PermissionCatalog::default();
        let perms = catalog.permissions_for_role(&role("customer"));
        assert!(perms.contains("booking:create"));
        assert!(!perms.contains("user:delete:any"));
    }

    #[test]
    fn test_unknown_role_yields_empty_set() {
        let catalog = PermissionCatalog::default();
        assert!(catalog.permissions_for_role(&role("pirate")).is_empty());
        assert!(!catalog.role_grants(&role("pirate"), "booking:create"));
    }

    #[test]
    fn test_role_set_is_deterministic() {
        let a = PermissionCatalog::default();
        let b = PermissionCatalog::default();
        for r in ["admin", "staff", "customer"] {
            assert_eq!(
                a.permissions_for_role(&role(r)),
                a.permissions_for_role(&role(r))
            );
            assert_eq!(
                a.permissions_for_role(&role(r)),
                b.permissions_for_role(&role(r))
            );
        }
    }

    #[test]
    fn test_revoked_and_inactive_grants_excluded() {
        let catalog = PermissionCatalog::from_seed(small_seed()).unwrap();
        let perms = catalog.permissions_for_role(&role("customer"));

        assert!(perms.contains("booking:create"));
        assert!(!perms.contains("booking:read"), "revoked grant must not count");
        assert!(!perms.contains("user:delete:any"), "inactive permission must not count");

        assert!(catalog.permissions_for_role(&role("ghost")).is_empty());
    }

    #[test]
    fn test_regrant_after_revoke_counts() {
        let mut seed = small_seed();
        // History row first, live re-grant second, as the tables store them.
        seed.role_permissions.push(RolePermission::new("customer", "booking:read"));
        let catalog = PermissionCatalog::from_seed(seed).unwrap();
        assert!(catalog
            .permissions_for_role(&role("customer"))
            .contains("booking:read"));
    }

    #[test]
    fn test_inactive_permission_is_not_known() {
        let catalog = PermissionCatalog::from_seed(small_seed()).unwrap();
        assert!(catalog.is_known_permission("booking:create"));
        assert!(!catalog.is_known_permission("user:delete:any"));
        assert!(catalog.permission("user:delete:any").is_some());
        assert!(!catalog.is_known_permission("nope:nope"));
    }

    #[test]
    fn test_duplicate_permission_rejected() {
        let mut seed = small_seed();
        seed.permissions.push(Permission::new("booking:create", "again", "booking"));
        let err = PermissionCatalog::from_seed(seed).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicatePermission);
    }

    #[test]
    fn test_malformed_permission_rejected() {
        let mut seed = small_seed();
        seed.permissions.push(Permission::new("bookings", "", ""));
        let err = PermissionCatalog::from_seed(seed).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPermissionName);
    }

    #[test]
    fn test_grant_to_unknown_role_rejected() {
        let mut seed = small_seed();
        seed.role_permissions
            .push(RolePermission::new("pirate", "booking:create"));
        let err = PermissionCatalog::from_seed(seed).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownRole);
    }

    #[test]
    fn test_grant_of_unknown_permission_rejected() {
        let mut seed = small_seed();
        seed.role_permissions
            .push(RolePermission::new("customer", "booking:teleport"));
        let err = PermissionCatalog::from_seed(seed).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidCatalog);
    }

    #[test]
    fn test_seed_from_toml() {
        let seed = CatalogSeed::from_toml_str(
            r#"
            [[permissions]]
            name = "booking:create"
            description = "Create a booking"
            category = "booking"

            [[roles]]
            name = "customer"
            display_name = "Customer"

            [[role_permissions]]
            role = "customer"
            permission = "booking:create"
            "#,
        )
        .unwrap();

        let catalog = PermissionCatalog::from_seed(seed).unwrap();
        assert!(catalog.role_grants(&role("customer"), "booking:create"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_invalid_toml_is_catalog_error() {
        let err = CatalogSeed::from_toml_str("[[permissions]\nname = ").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidCatalog);
    }

    #[test]
    fn test_permissions_by_category() {
        let catalog = PermissionCatalog::default();
        let grouped = catalog.permissions_by_category();
        assert!(grouped.contains_key("booking"));
        assert!(grouped["address"]
            .iter()
            .any(|p| p.name == "address:update:any"));
    }
}
