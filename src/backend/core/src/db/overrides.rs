//! PostgreSQL-backed override repository and principal directory.
//!
//! Each write runs in a single transaction: the current-state upsert on
//! `user_permission_overrides` and the event insert on
//! `permission_override_events` commit together or not at all.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

use crate::authz::models::{OverrideEvent, OverrideEventKind, PermissionOverride, PrincipalId};
use crate::authz::overrides::{OverrideRepository, PrincipalDirectory};
use crate::config::DatabaseConfig;
use crate::error::{ErrorCode, Result, WardenError};

const OVERRIDE_COLUMNS: &str = "principal_id, permission_name, is_granted, granted_by, granted_at, \
                                expires_at, reason, revoked_by, revoked_at";

// ═══════════════════════════════════════════════════════════════════════════════
// Rows
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct OverrideRow {
    principal_id: String,
    permission_name: String,
    is_granted: bool,
    granted_by: Option<String>,
    granted_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    reason: Option<String>,
    revoked_by: Option<String>,
    revoked_at: Option<DateTime<Utc>>,
}

impl From<OverrideRow> for PermissionOverride {
    fn from(row: OverrideRow) -> Self {
        Self {
            principal_id: PrincipalId::new(row.principal_id),
            permission: row.permission_name,
            is_granted: row.is_granted,
            granted_by: row.granted_by.map(PrincipalId::new),
            granted_at: row.granted_at,
            expires_at: row.expires_at,
            reason: row.reason,
            revoked_by: row.revoked_by.map(PrincipalId::new),
            revoked_at: row.revoked_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    principal_id: String,
    permission_name: String,
    kind: String,
    actor: Option<String>,
    occurred_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    reason: Option<String>,
}

impl TryFrom<EventRow> for OverrideEvent {
    type Error = WardenError;

    fn try_from(row: EventRow) -> Result<Self> {
        let kind = OverrideEventKind::parse(&row.kind).ok_or_else(|| {
            WardenError::new(ErrorCode::DeserializationError, "Corrupt override history")
                .with_internal_message(format!("unknown event kind '{}' on {}", row.kind, row.id))
        })?;
        Ok(Self {
            id: row.id,
            principal_id: PrincipalId::new(row.principal_id),
            permission: row.permission_name,
            kind,
            actor: row.actor.map(PrincipalId::new),
            at: row.occurred_at,
            expires_at: row.expires_at,
            reason: row.reason,
        })
    }
}

async fn insert_event(conn: &mut PgConnection, event: &OverrideEvent) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO permission_override_events
            (id, principal_id, permission_name, kind, actor, occurred_at, expires_at, reason)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(event.id)
    .bind(event.principal_id.as_str())
    .bind(&event.permission)
    .bind(event.kind.as_str())
    .bind(event.actor.as_ref().map(PrincipalId::as_str))
    .bind(event.at)
    .bind(event.expires_at)
    .bind(&event.reason)
    .execute(conn)
    .await?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Repository
// ═══════════════════════════════════════════════════════════════════════════════

/// Override repository over a PostgreSQL pool.
#[derive(Clone)]
pub struct PgOverrideRepository {
    pool: PgPool,
}

impl PgOverrideRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OverrideRepository for PgOverrideRepository {
    async fn upsert_grant(&self, record: &PermissionOverride, event: &OverrideEvent) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO user_permission_overrides
                (principal_id, permission_name, is_granted, granted_by, granted_at,
                 expires_at, reason, revoked_by, revoked_at)
            VALUES ($1, $2, TRUE, $3, $4, $5, $6, NULL, NULL)
            ON CONFLICT (principal_id, permission_name) DO UPDATE
            SET is_granted = TRUE,
                granted_by = EXCLUDED.granted_by,
                granted_at = EXCLUDED.granted_at,
                expires_at = EXCLUDED.expires_at,
                reason     = EXCLUDED.reason,
                revoked_by = NULL,
                revoked_at = NULL
            "#,
        )
        .bind(record.principal_id.as_str())
        .bind(&record.permission)
        .bind(record.granted_by.as_ref().map(PrincipalId::as_str))
        .bind(record.granted_at)
        .bind(record.expires_at)
        .bind(&record.reason)
        .execute(&mut *tx)
        .await?;

        insert_event(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn mark_revoked(
        &self,
        principal_id: &PrincipalId,
        permission: &str,
        revoked_by: Option<&PrincipalId>,
        at: DateTime<Utc>,
        event: &OverrideEvent,
    ) -> Result<PermissionOverride> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, OverrideRow>(&format!(
            r#"
            INSERT INTO user_permission_overrides
                (principal_id, permission_name, is_granted, granted_by, granted_at,
                 expires_at, reason, revoked_by, revoked_at)
            VALUES ($1, $2, FALSE, NULL, $3, NULL, NULL, $4, $3)
            ON CONFLICT (principal_id, permission_name) DO UPDATE
            SET is_granted = FALSE,
                revoked_by = EXCLUDED.revoked_by,
                revoked_at = EXCLUDED.revoked_at
            RETURNING {OVERRIDE_COLUMNS}
            "#
        ))
        .bind(principal_id.as_str())
        .bind(permission)
        .bind(at)
        .bind(revoked_by.map(PrincipalId::as_str))
        .fetch_one(&mut *tx)
        .await?;

        insert_event(&mut tx, event).await?;
        tx.commit().await?;
        Ok(row.into())
    }

    async fn list_for(&self, principal_id: &PrincipalId) -> Result<Vec<PermissionOverride>> {
        let rows = sqlx::query_as::<_, OverrideRow>(&format!(
            "SELECT {OVERRIDE_COLUMNS} FROM user_permission_overrides \
             WHERE principal_id = $1 ORDER BY permission_name"
        ))
        .bind(principal_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn history(
        &self,
        principal_id: &PrincipalId,
        permission: Option<&str>,
    ) -> Result<Vec<OverrideEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, principal_id, permission_name, kind, actor, occurred_at, expires_at, reason
            FROM permission_override_events
            WHERE principal_id = $1
              AND ($2::TEXT IS NULL OR permission_name = $2)
            ORDER BY seq
            "#,
        )
        .bind(principal_id.as_str())
        .bind(permission)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OverrideEvent::try_from).collect()
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<PermissionOverride>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, OverrideRow>(&format!(
            r#"
            UPDATE user_permission_overrides
            SET is_granted = FALSE
            WHERE is_granted
              AND expires_at IS NOT NULL
              AND expires_at <= $1
            RETURNING {OVERRIDE_COLUMNS}
            "#
        ))
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let expired: Vec<PermissionOverride> = rows.into_iter().map(Into::into).collect();
        for row in &expired {
            let mut event = OverrideEvent::new(
                row.principal_id.clone(),
                row.permission.clone(),
                OverrideEventKind::Expired,
                now,
            );
            event.expires_at = row.expires_at;
            insert_event(&mut tx, &event).await?;
        }

        tx.commit().await?;
        debug!(count = expired.len(), "Expired overrides flipped");
        Ok(expired)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Principal directory
// ═══════════════════════════════════════════════════════════════════════════════

/// Looks principals up in an existing users table.
#[derive(Clone)]
pub struct PgPrincipalDirectory {
    pool: PgPool,
    query: String,
}

impl PgPrincipalDirectory {
    /// Build from the configured table and column names. Both must be plain
    /// (optionally schema-qualified) SQL identifiers.
    pub fn new(pool: PgPool, config: &DatabaseConfig) -> Result<Self> {
        for ident in [&config.principals_table, &config.principals_id_column] {
            if !is_plain_identifier(ident) {
                return Err(WardenError::new(
                    ErrorCode::InvalidConfiguration,
                    "Invalid principal table configuration",
                )
                .with_internal_message(format!("'{}' is not a plain SQL identifier", ident)));
            }
        }

        let query = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {}::TEXT = $1)",
            config.principals_table, config.principals_id_column
        );
        Ok(Self { pool, query })
    }
}

fn is_plain_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

#[async_trait]
impl PrincipalDirectory for PgPrincipalDirectory {
    async fn principal_exists(&self, principal_id: &PrincipalId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(&self.query)
            .bind(principal_id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_identifier() {
        assert!(is_plain_identifier("users"));
        assert!(is_plain_identifier("auth.users"));
        assert!(is_plain_identifier("_id"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("users; DROP TABLE users"));
        assert!(!is_plain_identifier("1users"));
        assert!(!is_plain_identifier("auth."));
    }

    #[test]
    fn test_event_row_rejects_unknown_kind() {
        let row = EventRow {
            id: Uuid::new_v4(),
            principal_id: "42".into(),
            permission_name: "booking:create".into(),
            kind: "deleted".into(),
            actor: None,
            occurred_at: Utc::now(),
            expires_at: None,
            reason: None,
        };
        assert!(OverrideEvent::try_from(row).is_err());
    }

    #[test]
    fn test_override_row_conversion() {
        let row = OverrideRow {
            principal_id: "42".into(),
            permission_name: "user:update:any".into(),
            is_granted: true,
            granted_by: Some("1".into()),
            granted_at: Utc::now(),
            expires_at: None,
            reason: Some("on call".into()),
            revoked_by: None,
            revoked_at: None,
        };
        let record: PermissionOverride = row.into();
        assert_eq!(record.principal_id, PrincipalId::from(42i64));
        assert_eq!(record.granted_by, Some(PrincipalId::from("1")));
    }
}
