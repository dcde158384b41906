//! Authorization data models: identifiers, catalog records, and override records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::WardenError;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Strongly-typed principal identifier.
///
/// Identifiers arrive from the authentication collaborator as numbers or
/// strings; both are stored in their canonical string form so that `42` and
/// `"42"` name the same principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier is blank after trimming.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PrincipalId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for PrincipalId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<i64> for PrincipalId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

impl From<u64> for PrincipalId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl From<i32> for PrincipalId {
    fn from(n: i32) -> Self {
        Self(n.to_string())
    }
}

impl From<Uuid> for PrincipalId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

/// Strongly-typed role name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(String);

impl RoleName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RoleName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoleName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Principal
// ═══════════════════════════════════════════════════════════════════════════════

/// The authenticated actor attempting an action.
///
/// Supplied by the authentication collaborator and trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub role: RoleName,
}

impl Principal {
    pub fn new(id: impl Into<PrincipalId>, role: impl Into<RoleName>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Permission names
// ═══════════════════════════════════════════════════════════════════════════════

/// A parsed permission name of the form `resource:action[:scope]`.
///
/// For example:
/// - `booking:create`
/// - `user:delete:any`
/// - `address:update:any`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionName {
    /// The resource type (e.g., "booking", "user", "address").
    pub resource: String,
    /// The action (e.g., "create", "update", "delete").
    pub action: String,
    /// Optional scope qualifier (e.g., "any").
    pub scope: Option<String>,
}

impl PermissionName {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Parse a colon-separated permission name.
    ///
    /// Returns `None` unless there are two or three segments, each non-empty
    /// and made of lowercase ASCII letters, digits, `_` or `-`.
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if !(2..=3).contains(&parts.len()) || !parts.iter().all(|p| is_valid_segment(p)) {
            return None;
        }
        Some(Self {
            resource: parts[0].to_string(),
            action: parts[1].to_string(),
            scope: parts.get(2).map(|s| s.to_string()),
        })
    }

    /// Whether `s` is a syntactically valid permission name.
    pub fn is_valid(s: &str) -> bool {
        Self::parse(s).is_some()
    }

    /// Return the canonical string form.
    pub fn as_string(&self) -> String {
        self.to_string()
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

impl fmt::Display for PermissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{}:{}:{}", self.resource, self.action, scope),
            None => write!(f, "{}:{}", self.resource, self.action),
        }
    }
}

impl FromStr for PermissionName {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| WardenError::invalid_permission_name(s))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Catalog records
// ═══════════════════════════════════════════════════════════════════════════════

/// A named capability in the catalog.
///
/// Immutable after seeding except for deactivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Unique `resource:action[:scope]` name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Permission {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: category.into(),
            is_active: true,
        }
    }

    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// A named bundle of default permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: RoleName,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl Role {
    pub fn new(name: impl Into<RoleName>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            is_active: true,
        }
    }

    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Append-style grant of a permission to a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role: RoleName,
    pub permission: String,
    #[serde(default)]
    pub granted_by: Option<PrincipalId>,
    #[serde(default = "Utc::now")]
    pub granted_at: DateTime<Utc>,
    /// Set when the grant has been withdrawn; revoked grants do not count.
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RolePermission {
    pub fn new(role: impl Into<RoleName>, permission: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            permission: permission.into(),
            granted_by: None,
            granted_at: Utc::now(),
            revoked_at: None,
        }
    }

    pub fn granted_by(mut self, principal: impl Into<PrincipalId>) -> Self {
        self.granted_by = Some(principal.into());
        self
    }

    pub fn revoked(mut self, at: DateTime<Utc>) -> Self {
        self.revoked_at = Some(at);
        self
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

fn default_true() -> bool {
    true
}

// ═══════════════════════════════════════════════════════════════════════════════
// Overrides
// ═══════════════════════════════════════════════════════════════════════════════

/// Current state of the per-principal exception for one permission.
///
/// Exactly one logical record exists per `(principal_id, permission)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverride {
    pub principal_id: PrincipalId,
    pub permission: String,
    pub is_granted: bool,
    pub granted_by: Option<PrincipalId>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub revoked_by: Option<PrincipalId>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl PermissionOverride {
    /// Whether this override contributes to decisions at `now`.
    ///
    /// Expiry is evaluated lazily: nothing needs to flip `is_granted` for an
    /// override to stop counting.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.is_granted && self.expires_at.map_or(true, |exp| now < exp)
    }

    /// Granted but past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_granted && self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// Kind of change recorded in the override history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideEventKind {
    Granted,
    Revoked,
    Expired,
}

impl OverrideEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "granted" => Some(Self::Granted),
            "revoked" => Some(Self::Revoked),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for OverrideEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the append-only override history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideEvent {
    pub id: Uuid,
    pub principal_id: PrincipalId,
    pub permission: String,
    pub kind: OverrideEventKind,
    /// Who performed the change; `None` for system sweeps or unattributed revokes.
    pub actor: Option<PrincipalId>,
    pub at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl OverrideEvent {
    pub fn new(
        principal_id: PrincipalId,
        permission: impl Into<String>,
        kind: OverrideEventKind,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            principal_id,
            permission: permission.into(),
            kind,
            actor: None,
            at,
            expires_at: None,
            reason: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_permission_name_parse() {
        let perm = PermissionName::parse("booking:create").unwrap();
        assert_eq!(perm.resource, "booking");
        assert_eq!(perm.action, "create");
        assert_eq!(perm.scope, None);
        assert_eq!(perm.as_string(), "booking:create");

        let scoped = PermissionName::parse("user:delete:any").unwrap();
        assert_eq!(scoped.scope.as_deref(), Some("any"));
        assert_eq!(scoped.to_string(), "user:delete:any");
    }

    #[test]
    fn test_permission_name_rejects_malformed() {
        assert!(PermissionName::parse("invalid").is_none());
        assert!(PermissionName::parse("a:b:c:d").is_none());
        assert!(PermissionName::parse("booking::any").is_none());
        assert!(PermissionName::parse("Booking:create").is_none());
        assert!(PermissionName::parse("booking:cre ate").is_none());
        assert!("booking".parse::<PermissionName>().is_err());
    }

    #[test]
    fn test_principal_id_canonical_forms() {
        assert_eq!(PrincipalId::from(42i64), PrincipalId::from("42"));
        assert_eq!(PrincipalId::from(" 7 "), PrincipalId::from(7u64));
        assert!(PrincipalId::new("   ").is_empty());
    }

    #[test]
    fn test_override_lazy_expiry() {
        let now = Utc::now();
        let mut record = PermissionOverride {
            principal_id: PrincipalId::from(42i64),
            permission: "user:update:any".to_string(),
            is_granted: true,
            granted_by: Some(PrincipalId::from(1i64)),
            granted_at: now,
            expires_at: Some(now + Duration::days(7)),
            reason: None,
            revoked_by: None,
            revoked_at: None,
        };

        assert!(record.is_active_at(now));
        assert!(!record.is_expired_at(now));

        let later = now + Duration::days(8);
        assert!(!record.is_active_at(later));
        assert!(record.is_expired_at(later));

        // Exactly at the expiry instant the override no longer counts.
        assert!(!record.is_active_at(now + Duration::days(7)));

        record.expires_at = None;
        assert!(record.is_active_at(later));

        record.is_granted = false;
        assert!(!record.is_active_at(now));
        assert!(!record.is_expired_at(later));
    }

    #[test]
    fn test_role_permission_revocation() {
        let grant = RolePermission::new("customer", "booking:create").granted_by("1");
        assert!(!grant.is_revoked());
        assert_eq!(grant.granted_by, Some(PrincipalId::from("1")));

        let revoked = grant.revoked(Utc::now());
        assert!(revoked.is_revoked());
    }

    #[test]
    fn test_event_kind_round_trip_strings() {
        for kind in [
            OverrideEventKind::Granted,
            OverrideEventKind::Revoked,
            OverrideEventKind::Expired,
        ] {
            assert_eq!(OverrideEventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(OverrideEventKind::parse("deleted"), None);
    }
}
