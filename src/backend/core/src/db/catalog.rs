//! Catalog tables: `permissions`, `roles`, `role_permissions`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;

use crate::authz::catalog::CatalogSeed;
use crate::authz::models::{Permission, PrincipalId, Role, RoleName, RolePermission};
use crate::error::Result;

#[derive(Debug, sqlx::FromRow)]
struct PermissionRow {
    name: String,
    description: String,
    category: String,
    is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct RoleRow {
    name: String,
    display_name: String,
    is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct RolePermissionRow {
    role_name: String,
    permission_name: String,
    granted_by: Option<String>,
    granted_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

/// Read the whole catalog into a seed, ready for `PermissionCatalog::from_seed`.
pub async fn load_seed(pool: &PgPool) -> Result<CatalogSeed> {
    let permissions = sqlx::query_as::<_, PermissionRow>(
        "SELECT name, description, category, is_active FROM permissions ORDER BY name",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| Permission {
        name: row.name,
        description: row.description,
        category: row.category,
        is_active: row.is_active,
    })
    .collect();

    let roles = sqlx::query_as::<_, RoleRow>(
        "SELECT name, display_name, is_active FROM roles ORDER BY name",
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| Role {
        name: RoleName::new(row.name),
        display_name: row.display_name,
        is_active: row.is_active,
    })
    .collect();

    let role_permissions = sqlx::query_as::<_, RolePermissionRow>(
        r#"
        SELECT role_name, permission_name, granted_by, granted_at, revoked_at
        FROM role_permissions
        ORDER BY role_name, permission_name, id
        "#,
    )
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|row| RolePermission {
        role: RoleName::new(row.role_name),
        permission: row.permission_name,
        granted_by: row.granted_by.map(PrincipalId::new),
        granted_at: row.granted_at,
        revoked_at: row.revoked_at,
    })
    .collect();

    Ok(CatalogSeed {
        permissions,
        roles,
        role_permissions,
    })
}

/// Upsert a seed into the catalog tables in one transaction.
///
/// Permissions and roles are updated in place. Role grants are appended:
/// a live grant is added only when the pair has none, and a revoked grant
/// closes the live row or is kept as history. Rows absent from the seed are
/// left alone. Returns `(permissions, roles, role_permissions)` written.
pub async fn write_seed(pool: &PgPool, seed: &CatalogSeed) -> Result<(usize, usize, usize)> {
    let mut tx = pool.begin().await?;

    for permission in &seed.permissions {
        sqlx::query(
            r#"
            INSERT INTO permissions (name, description, category, is_active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET description = EXCLUDED.description,
                category    = EXCLUDED.category,
                is_active   = EXCLUDED.is_active
            "#,
        )
        .bind(&permission.name)
        .bind(&permission.description)
        .bind(&permission.category)
        .bind(permission.is_active)
        .execute(&mut *tx)
        .await?;
    }

    for role in &seed.roles {
        sqlx::query(
            r#"
            INSERT INTO roles (name, display_name, is_active)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE
            SET display_name = EXCLUDED.display_name,
                is_active    = EXCLUDED.is_active
            "#,
        )
        .bind(role.name.as_str())
        .bind(&role.display_name)
        .bind(role.is_active)
        .execute(&mut *tx)
        .await?;
    }

    for grant in &seed.role_permissions {
        match grant.revoked_at {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO role_permissions (role_name, permission_name, granted_by, granted_at)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (role_name, permission_name) WHERE revoked_at IS NULL DO NOTHING
                    "#,
                )
                .bind(grant.role.as_str())
                .bind(&grant.permission)
                .bind(grant.granted_by.as_ref().map(PrincipalId::as_str))
                .bind(grant.granted_at)
                .execute(&mut *tx)
                .await?;
            }
            Some(revoked_at) => {
                // Close the live row if it predates the revocation; otherwise
                // record the revoked grant as history, once.
                let closed = sqlx::query(
                    r#"
                    UPDATE role_permissions
                    SET revoked_at = $3
                    WHERE role_name = $1 AND permission_name = $2
                      AND revoked_at IS NULL AND granted_at <= $3
                    "#,
                )
                .bind(grant.role.as_str())
                .bind(&grant.permission)
                .bind(revoked_at)
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if closed == 0 {
                    sqlx::query(
                        r#"
                        INSERT INTO role_permissions
                            (role_name, permission_name, granted_by, granted_at, revoked_at)
                        SELECT $1, $2, $3, $4, $5
                        WHERE NOT EXISTS (
                            SELECT 1 FROM role_permissions
                            WHERE role_name = $1 AND permission_name = $2 AND revoked_at = $5
                        )
                        "#,
                    )
                    .bind(grant.role.as_str())
                    .bind(&grant.permission)
                    .bind(grant.granted_by.as_ref().map(PrincipalId::as_str))
                    .bind(grant.granted_at)
                    .bind(revoked_at)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
    }

    tx.commit().await?;

    let counts = (
        seed.permissions.len(),
        seed.roles.len(),
        seed.role_permissions.len(),
    );
    info!(
        permissions = counts.0,
        roles = counts.1,
        role_permissions = counts.2,
        "Catalog seed written"
    );
    Ok(counts)
}
