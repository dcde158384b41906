//! Effective permission resolution.
//!
//! `effective(p) = role_set(p.role) ∪ active_overrides(p.id)`, evaluated
//! against the store and clock on every call. Nothing here is cached beyond
//! what the override store itself guarantees to be expiry-safe.

use dashmap::DashSet;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{trace, warn};

use super::catalog::PermissionCatalog;
use super::models::Principal;
use super::overrides::OverrideStore;

/// Result of checking a list of permission names against one principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionCheck {
    /// Requested names the principal holds.
    pub held: Vec<String>,
    /// Requested catalog names the principal lacks.
    pub missing: Vec<String>,
    /// Requested names absent from the catalog. Never held.
    pub unknown: Vec<String>,
}

impl PermissionCheck {
    /// Every requested name is held. False for an empty request.
    pub fn all_held(&self) -> bool {
        !self.held.is_empty() && self.missing.is_empty() && self.unknown.is_empty()
    }

    pub fn any_held(&self) -> bool {
        !self.held.is_empty()
    }
}

/// Resolves what a principal may do right now.
///
/// Decision methods never fail: a missing principal resolves to the empty
/// set, unknown permission names resolve to false, and an unreachable
/// override store degrades to role defaults only.
pub struct EffectivePermissionResolver {
    catalog: Arc<PermissionCatalog>,
    store: Arc<OverrideStore>,
    reported_unknown: DashSet<String>,
}

impl EffectivePermissionResolver {
    pub fn new(store: Arc<OverrideStore>) -> Self {
        Self {
            catalog: store.catalog().clone(),
            store,
            reported_unknown: DashSet::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<PermissionCatalog> {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<OverrideStore> {
        &self.store
    }

    /// Role defaults plus active overrides, restricted to active catalog
    /// permissions.
    pub async fn effective_permissions(&self, principal: Option<&Principal>) -> HashSet<String> {
        let Some(principal) = principal else {
            return HashSet::new();
        };

        let mut effective = self.catalog.permissions_for_role(&principal.role);

        match self.store.active_overrides_for(&principal.id).await {
            Ok(overrides) => {
                effective.extend(
                    overrides
                        .into_iter()
                        .filter(|name| self.catalog.is_known_permission(name)),
                );
            }
            Err(e) => {
                // Overrides only ever add permissions, so falling back to
                // role defaults never widens access.
                warn!(
                    principal_id = %principal.id,
                    error = %e,
                    "Override lookup failed, resolving from role defaults only"
                );
            }
        }

        trace!(
            principal_id = %principal.id,
            role = %principal.role,
            count = effective.len(),
            "Resolved effective permissions"
        );
        effective
    }

    pub async fn has_permission(&self, principal: Option<&Principal>, permission: &str) -> bool {
        if !self.catalog.is_known_permission(permission) {
            self.report_unknown(permission);
            return false;
        }
        self.effective_permissions(principal)
            .await
            .contains(permission)
    }

    /// Check several names with a single resolution.
    pub async fn check<S: AsRef<str>>(
        &self,
        principal: Option<&Principal>,
        permissions: &[S],
    ) -> PermissionCheck {
        let effective = self.effective_permissions(principal).await;
        self.check_against(&effective, permissions)
    }

    /// Check names against an already-resolved set.
    pub fn check_against<S: AsRef<str>>(
        &self,
        effective: &HashSet<String>,
        permissions: &[S],
    ) -> PermissionCheck {
        let mut check = PermissionCheck::default();
        for name in permissions.iter().map(AsRef::as_ref) {
            if !self.catalog.is_known_permission(name) {
                self.report_unknown(name);
                check.unknown.push(name.to_string());
            } else if effective.contains(name) {
                check.held.push(name.to_string());
            } else {
                check.missing.push(name.to_string());
            }
        }
        check
    }

    /// Log an unknown permission name as a configuration defect, once per
    /// name for the life of the resolver.
    pub fn report_unknown(&self, permission: &str) {
        if self.reported_unknown.insert(permission.to_string()) {
            warn!(
                permission = %permission,
                "Guard references a permission that is not in the catalog; it will always deny"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::overrides::GrantRequest;

    fn resolver() -> EffectivePermissionResolver {
        let store = OverrideStore::in_memory(Arc::new(PermissionCatalog::default()), ["1", "42"]);
        EffectivePermissionResolver::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_missing_principal_has_nothing() {
        let resolver = resolver();
        assert!(resolver.effective_permissions(None).await.is_empty());
        assert!(!resolver.has_permission(None, "booking:create").await);
    }

    #[tokio::test]
    async fn test_unknown_role_has_nothing() {
        let resolver = resolver();
        let ghost = Principal::new("42", "ghost");
        assert!(resolver.effective_permissions(Some(&ghost)).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_permission_is_false_for_admin() {
        let resolver = resolver();
        let admin = Principal::new("1", "admin");
        assert!(!resolver.has_permission(Some(&admin), "booking:teleport").await);
        assert!(!resolver.has_permission(Some(&admin), "garbage").await);
    }

    #[tokio::test]
    async fn test_override_adds_to_role_set() {
        let resolver = resolver();
        let customer = Principal::new("42", "customer");
        assert!(!resolver.has_permission(Some(&customer), "user:update:any").await);

        resolver
            .store()
            .grant(GrantRequest::new("42", "user:update:any", "1"))
            .await
            .unwrap();

        assert!(resolver.has_permission(Some(&customer), "user:update:any").await);
        assert!(resolver.has_permission(Some(&customer), "booking:create").await);
    }

    #[tokio::test]
    async fn test_check_partitions_names() {
        let resolver = resolver();
        let customer = Principal::new("42", "customer");
        let check = resolver
            .check(
                Some(&customer),
                &["booking:create", "user:delete:any", "booking:teleport"],
            )
            .await;

        assert_eq!(check.held, vec!["booking:create"]);
        assert_eq!(check.missing, vec!["user:delete:any"]);
        assert_eq!(check.unknown, vec!["booking:teleport"]);
        assert!(check.any_held());
        assert!(!check.all_held());
    }

    #[test]
    fn test_empty_check_is_not_all_held() {
        assert!(!PermissionCheck::default().all_held());
    }
}
