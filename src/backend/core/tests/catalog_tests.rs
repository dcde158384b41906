//! Catalog seeding tests.
//!
//! Tests cover:
//! - The shipped seed file agrees with the built-in roles
//! - Loading seeds from TOML files
//! - Rejection of inconsistent seeds
//! - Deactivated and revoked entries

use std::io::Write;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

use warden_core::authz::roles::default_seed;
use warden_core::authz::{
    CatalogSeed, EffectivePermissionResolver, GrantRequest, OverrideStore, PermissionCatalog,
    PredefinedRole, Principal, PrincipalId, RoleName,
};
use warden_core::ErrorCode;

fn seed_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

const SMALL_SEED: &str = r#"
[[permissions]]
name = "report:read"
description = "Read reports"
category = "report"

[[permissions]]
name = "report:export"
category = "report"

[[permissions]]
name = "report:purge"
category = "report"
is_active = false

[[roles]]
name = "analyst"
display_name = "Analyst"

[[roles]]
name = "intern"
is_active = false

[[role_permissions]]
role = "analyst"
permission = "report:read"

[[role_permissions]]
role = "analyst"
permission = "report:export"
revoked_at = "2024-01-01T00:00:00Z"

[[role_permissions]]
role = "analyst"
permission = "report:purge"

[[role_permissions]]
role = "intern"
permission = "report:read"
"#;

// ============================================================================
// Shipped seed
// ============================================================================

#[test]
fn test_shipped_seed_matches_builtin_roles() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/seed/catalog.toml");
    let shipped = assert_ok!(PermissionCatalog::from_toml_file(path));
    let builtin = PermissionCatalog::from_seed(default_seed()).unwrap();

    assert_eq!(shipped.len(), builtin.len());
    for role in PredefinedRole::all() {
        let name = RoleName::new(role.id());
        assert_eq!(
            shipped.permissions_for_role(&name),
            builtin.permissions_for_role(&name),
            "role {}",
            role.id()
        );
    }
}

#[test]
fn test_admin_holds_every_permission() {
    let catalog = PermissionCatalog::default();
    let admin = catalog.permissions_for_role(&RoleName::new("admin"));
    assert_eq!(admin.len(), catalog.len());
}

// ============================================================================
// TOML seeds
// ============================================================================

#[test]
fn test_seed_file_inactive_entries_do_not_count() {
    let file = seed_file(SMALL_SEED);
    let catalog = assert_ok!(PermissionCatalog::from_toml_file(file.path()));

    let analyst = catalog.permissions_for_role(&RoleName::new("analyst"));
    // export is revoked, purge is deactivated.
    assert_eq!(analyst.len(), 1);
    assert!(analyst.contains("report:read"));

    assert!(catalog.permissions_for_role(&RoleName::new("intern")).is_empty());
    assert!(catalog.permissions_for_role(&RoleName::new("nobody")).is_empty());

    assert!(catalog.is_known_permission("report:export"));
    assert!(!catalog.is_known_permission("report:purge"));
    assert!(catalog.permission("report:purge").is_some());
}

#[tokio::test]
async fn test_seed_file_drives_decisions() {
    let file = seed_file(SMALL_SEED);
    let catalog = Arc::new(PermissionCatalog::from_toml_file(file.path()).unwrap());
    let store = Arc::new(OverrideStore::in_memory(catalog, ["5"]));
    let resolver = EffectivePermissionResolver::new(store.clone());
    let analyst = Principal::new("5", "analyst");

    assert!(resolver.has_permission(Some(&analyst), "report:read").await);
    assert!(!resolver.has_permission(Some(&analyst), "report:export").await);

    store
        .grant(GrantRequest::new("5", "report:export", "root"))
        .await
        .unwrap();
    assert!(resolver.has_permission(Some(&analyst), "report:export").await);

    // Deactivated permissions cannot be granted but can be revoked.
    let err = assert_err!(
        store
            .grant(GrantRequest::new("5", "report:purge", "root"))
            .await
    );
    assert_eq!(err.code(), ErrorCode::UnknownPermission);
    assert_ok!(
        store
            .revoke(&PrincipalId::from("5"), "report:purge", None)
            .await
    );
    assert!(!resolver.has_permission(Some(&analyst), "report:purge").await);
}

// ============================================================================
// Invalid seeds
// ============================================================================

#[test]
fn test_malformed_toml_is_rejected() {
    let file = seed_file("[[permissions]\nname = ");
    assert_err!(PermissionCatalog::from_toml_file(file.path()));
}

#[test]
fn test_missing_seed_file_is_rejected() {
    assert_err!(PermissionCatalog::from_toml_file("/nonexistent/warden/catalog.toml"));
}

#[test]
fn test_invalid_permission_name_is_rejected() {
    let seed = CatalogSeed::from_toml_str(
        r#"
        [[permissions]]
        name = "Reports"
        "#,
    )
    .unwrap();
    let err = PermissionCatalog::from_seed(seed).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidPermissionName);
}

#[test]
fn test_duplicate_permission_is_rejected() {
    let seed = CatalogSeed::from_toml_str(
        r#"
        [[permissions]]
        name = "report:read"

        [[permissions]]
        name = "report:read"
        "#,
    )
    .unwrap();
    let err = PermissionCatalog::from_seed(seed).unwrap_err();
    assert_eq!(err.code(), ErrorCode::DuplicatePermission);
}

#[test]
fn test_grant_to_unknown_role_is_rejected() {
    let seed = CatalogSeed::from_toml_str(
        r#"
        [[permissions]]
        name = "report:read"

        [[role_permissions]]
        role = "ghost"
        permission = "report:read"
        "#,
    )
    .unwrap();
    let err = PermissionCatalog::from_seed(seed).unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownRole);
}

#[test]
fn test_grant_of_unknown_permission_is_rejected() {
    let seed = CatalogSeed::from_toml_str(
        r#"
        [[roles]]
        name = "analyst"

        [[role_permissions]]
        role = "analyst"
        permission = "report:read"
        "#,
    )
    .unwrap();
    let err = PermissionCatalog::from_seed(seed).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidCatalog);
}
