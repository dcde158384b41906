//! Authorization guards.
//!
//! A guard is a decision function yielding [`GuardOutcome`]. Guards never
//! fail: missing principals are `Unauthenticated`, everything else that is
//! not explicitly allowed is `Denied` with an internal [`DenyReason`].
//!
//! Build guards once at startup through a [`GuardFactory`] and share them
//! behind `Arc`; evaluation holds no state between calls.

use async_trait::async_trait;
use metrics::counter;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::models::{Principal, RoleName};
use super::ownership::{OwnershipEvaluator, ResourceOwnerResolver};
use super::resolver::EffectivePermissionResolver;
use crate::error::{Result, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Outcomes
// ═══════════════════════════════════════════════════════════════════════════════

/// Internal explanation of a denial. Logged, never returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    MissingPermissions(Vec<String>),
    UnknownPermissions(Vec<String>),
    NotOwner,
    OwnerUnresolved,
    RoleNotAllowed(RoleName),
    /// The guard was built with nothing to check.
    NoRequirements,
    /// Every alternative of an any-of composition denied.
    AllAlternativesDenied(Vec<DenyReason>),
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPermissions(perms) => write!(f, "missing permissions [{}]", perms.join(", ")),
            Self::UnknownPermissions(perms) => write!(f, "unknown permissions [{}]", perms.join(", ")),
            Self::NotOwner => f.write_str("not the resource owner"),
            Self::OwnerUnresolved => f.write_str("resource owner could not be resolved"),
            Self::RoleNotAllowed(role) => write!(f, "role '{}' not allowed", role),
            Self::NoRequirements => f.write_str("guard has no requirements"),
            Self::AllAlternativesDenied(reasons) => {
                let parts: Vec<String> = reasons.iter().map(ToString::to_string).collect();
                write!(f, "no alternative allowed ({})", parts.join("; "))
            }
        }
    }
}

/// Tri-state guard result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Unauthenticated,
    Denied(DenyReason),
    Allowed,
}

impl GuardOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied(_))
    }

    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Self::Denied(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Denied(_) => "denied",
            Self::Allowed => "allowed",
        }
    }

    /// Convert to a `Result` for handlers that evaluate a guard inline and
    /// propagate with `?`. The deny reason becomes the internal message.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Unauthenticated => Err(WardenError::unauthenticated()),
            Self::Denied(reason) => Err(WardenError::forbidden(reason)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Guard trait
// ═══════════════════════════════════════════════════════════════════════════════

/// A composable authorization decision over context `C`.
#[async_trait]
pub trait Guard<C: ?Sized + Sync = ()>: Send + Sync {
    /// Short label used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Evaluate without recording anything.
    async fn evaluate(&self, principal: Option<&Principal>, context: &C) -> GuardOutcome;

    /// Evaluate, record the decision metric and log denials.
    async fn check(&self, principal: Option<&Principal>, context: &C) -> GuardOutcome {
        let outcome = self.evaluate(principal, context).await;
        counter!(
            "warden_decisions_total",
            "guard" => self.name(),
            "outcome" => outcome.as_str()
        )
        .increment(1);

        match (&outcome, principal) {
            (GuardOutcome::Denied(reason), Some(p)) => debug!(
                guard = self.name(),
                principal_id = %p.id,
                role = %p.role,
                reason = %reason,
                "Access denied"
            ),
            (GuardOutcome::Unauthenticated, _) => {
                debug!(guard = self.name(), "No principal on request")
            }
            _ => {}
        }
        outcome
    }
}

fn normalize_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(Into::into)
        .filter(|n: &String| seen.insert(n.clone()))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Permission guards
// ═══════════════════════════════════════════════════════════════════════════════

/// Allowed iff the principal holds every listed permission.
///
/// An empty list denies with [`DenyReason::NoRequirements`] instead of
/// allowing vacuously: a guard with nothing to check is a wiring mistake.
pub struct RequireAll {
    resolver: Arc<EffectivePermissionResolver>,
    permissions: Vec<String>,
}

impl RequireAll {
    pub fn new<I, S>(resolver: Arc<EffectivePermissionResolver>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resolver,
            permissions: normalize_names(permissions),
        }
    }

    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }
}

#[async_trait]
impl<C: ?Sized + Sync> Guard<C> for RequireAll {
    fn name(&self) -> &'static str {
        "require_all"
    }

    async fn evaluate(&self, principal: Option<&Principal>, _context: &C) -> GuardOutcome {
        let Some(principal) = principal else {
            return GuardOutcome::Unauthenticated;
        };
        if self.permissions.is_empty() {
            return GuardOutcome::Denied(DenyReason::NoRequirements);
        }

        let check = self.resolver.check(Some(principal), self.permissions.as_slice()).await;
        if !check.unknown.is_empty() {
            GuardOutcome::Denied(DenyReason::UnknownPermissions(check.unknown))
        } else if !check.missing.is_empty() {
            GuardOutcome::Denied(DenyReason::MissingPermissions(check.missing))
        } else {
            GuardOutcome::Allowed
        }
    }
}

/// Allowed iff the principal holds at least one listed permission.
///
/// An empty list denies.
pub struct RequireAny {
    resolver: Arc<EffectivePermissionResolver>,
    permissions: Vec<String>,
}

impl RequireAny {
    pub fn new<I, S>(resolver: Arc<EffectivePermissionResolver>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resolver,
            permissions: normalize_names(permissions),
        }
    }

    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }
}

#[async_trait]
impl<C: ?Sized + Sync> Guard<C> for RequireAny {
    fn name(&self) -> &'static str {
        "require_any"
    }

    async fn evaluate(&self, principal: Option<&Principal>, _context: &C) -> GuardOutcome {
        let Some(principal) = principal else {
            return GuardOutcome::Unauthenticated;
        };
        if self.permissions.is_empty() {
            return GuardOutcome::Denied(DenyReason::NoRequirements);
        }

        let check = self.resolver.check(Some(principal), self.permissions.as_slice()).await;
        if check.any_held() {
            GuardOutcome::Allowed
        } else if check.missing.is_empty() {
            GuardOutcome::Denied(DenyReason::UnknownPermissions(check.unknown))
        } else {
            GuardOutcome::Denied(DenyReason::MissingPermissions(check.missing))
        }
    }
}

/// Single-permission guard.
pub struct RequirePermission {
    inner: RequireAll,
}

impl RequirePermission {
    pub fn new(resolver: Arc<EffectivePermissionResolver>, permission: impl Into<String>) -> Self {
        Self {
            inner: RequireAll::new(resolver, [permission.into()]),
        }
    }

    pub fn permission(&self) -> &str {
        &self.inner.permissions[0]
    }
}

#[async_trait]
impl<C: ?Sized + Sync> Guard<C> for RequirePermission {
    fn name(&self) -> &'static str {
        "require_permission"
    }

    async fn evaluate(&self, principal: Option<&Principal>, context: &C) -> GuardOutcome {
        Guard::<C>::evaluate(&self.inner, principal, context).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Ownership
// ═══════════════════════════════════════════════════════════════════════════════

/// `any_permission`, or ownership together with `own_permission`.
///
/// The broad permission is checked first and wins regardless of ownership.
/// The owner is only resolved when the principal holds `own_permission`
/// but not `any_permission`. A resolution failure counts as "no owner".
pub struct RequireOwnershipOrPermission<C: ?Sized> {
    resolver: Arc<EffectivePermissionResolver>,
    own_permission: String,
    any_permission: String,
    owner: Arc<dyn ResourceOwnerResolver<C>>,
}

impl<C: ?Sized + Sync> RequireOwnershipOrPermission<C> {
    pub fn new(
        resolver: Arc<EffectivePermissionResolver>,
        own_permission: impl Into<String>,
        any_permission: impl Into<String>,
        owner: Arc<dyn ResourceOwnerResolver<C>>,
    ) -> Self {
        Self {
            resolver,
            own_permission: own_permission.into(),
            any_permission: any_permission.into(),
            owner,
        }
    }
}

#[async_trait]
impl<C: ?Sized + Sync> Guard<C> for RequireOwnershipOrPermission<C> {
    fn name(&self) -> &'static str {
        "require_ownership_or_permission"
    }

    async fn evaluate(&self, principal: Option<&Principal>, context: &C) -> GuardOutcome {
        let Some(principal) = principal else {
            return GuardOutcome::Unauthenticated;
        };

        let effective = self.resolver.effective_permissions(Some(principal)).await;
        let check = self.resolver.check_against(
            &effective,
            &[self.any_permission.as_str(), self.own_permission.as_str()],
        );
        let holds = |name: &str| check.held.iter().any(|h| h == name);

        if holds(&self.any_permission) {
            return GuardOutcome::Allowed;
        }
        if !holds(&self.own_permission) {
            return if check.missing.is_empty() {
                GuardOutcome::Denied(DenyReason::UnknownPermissions(check.unknown))
            } else {
                GuardOutcome::Denied(DenyReason::MissingPermissions(check.missing))
            };
        }

        let owner = match self.owner.resolve_owner(context).await {
            Ok(Some(owner)) => owner,
            Ok(None) => return GuardOutcome::Denied(DenyReason::OwnerUnresolved),
            Err(e) => {
                warn!(
                    principal_id = %principal.id,
                    error = %e,
                    "Resource owner resolution failed"
                );
                return GuardOutcome::Denied(DenyReason::OwnerUnresolved);
            }
        };

        if OwnershipEvaluator::is_owner(&principal.id, &owner) {
            GuardOutcome::Allowed
        } else {
            GuardOutcome::Denied(DenyReason::NotOwner)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Roles
// ═══════════════════════════════════════════════════════════════════════════════

/// Coarse role membership check. Does not consult the catalog.
pub struct RequireRole {
    roles: HashSet<RoleName>,
}

impl RequireRole {
    pub fn new<I, R>(roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RoleName>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl<C: ?Sized + Sync> Guard<C> for RequireRole {
    fn name(&self) -> &'static str {
        "require_role"
    }

    async fn evaluate(&self, principal: Option<&Principal>, _context: &C) -> GuardOutcome {
        match principal {
            None => GuardOutcome::Unauthenticated,
            Some(p) if self.roles.contains(&p.role) => GuardOutcome::Allowed,
            Some(p) => GuardOutcome::Denied(DenyReason::RoleNotAllowed(p.role.clone())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Combinators
// ═══════════════════════════════════════════════════════════════════════════════

/// Allowed iff every inner guard allows. Stops at the first non-allow.
pub struct AllGuards<C: ?Sized> {
    guards: Vec<Arc<dyn Guard<C>>>,
}

impl<C: ?Sized + Sync> AllGuards<C> {
    pub fn new(guards: Vec<Arc<dyn Guard<C>>>) -> Self {
        Self { guards }
    }
}

#[async_trait]
impl<C: ?Sized + Sync> Guard<C> for AllGuards<C> {
    fn name(&self) -> &'static str {
        "all_of"
    }

    async fn evaluate(&self, principal: Option<&Principal>, context: &C) -> GuardOutcome {
        if principal.is_none() {
            return GuardOutcome::Unauthenticated;
        }
        if self.guards.is_empty() {
            return GuardOutcome::Denied(DenyReason::NoRequirements);
        }
        for guard in &self.guards {
            let outcome = guard.evaluate(principal, context).await;
            if !outcome.is_allowed() {
                return outcome;
            }
        }
        GuardOutcome::Allowed
    }
}

/// Allowed iff some inner guard allows. Stops at the first allow.
pub struct AnyGuard<C: ?Sized> {
    guards: Vec<Arc<dyn Guard<C>>>,
}

impl<C: ?Sized + Sync> AnyGuard<C> {
    pub fn new(guards: Vec<Arc<dyn Guard<C>>>) -> Self {
        Self { guards }
    }
}

#[async_trait]
impl<C: ?Sized + Sync> Guard<C> for AnyGuard<C> {
    fn name(&self) -> &'static str {
        "any_of"
    }

    async fn evaluate(&self, principal: Option<&Principal>, context: &C) -> GuardOutcome {
        if principal.is_none() {
            return GuardOutcome::Unauthenticated;
        }
        if self.guards.is_empty() {
            return GuardOutcome::Denied(DenyReason::NoRequirements);
        }
        let mut reasons = Vec::with_capacity(self.guards.len());
        for guard in &self.guards {
            match guard.evaluate(principal, context).await {
                GuardOutcome::Allowed => return GuardOutcome::Allowed,
                GuardOutcome::Denied(reason) => reasons.push(reason),
                GuardOutcome::Unauthenticated => return GuardOutcome::Unauthenticated,
            }
        }
        GuardOutcome::Denied(DenyReason::AllAlternativesDenied(reasons))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Factory
// ═══════════════════════════════════════════════════════════════════════════════

/// Builds guards bound to one resolver.
///
/// Permission names are checked against the catalog at build time so a typo
/// is reported at startup rather than on the first request.
#[derive(Clone)]
pub struct GuardFactory {
    resolver: Arc<EffectivePermissionResolver>,
}

impl GuardFactory {
    pub fn new(resolver: Arc<EffectivePermissionResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Arc<EffectivePermissionResolver> {
        &self.resolver
    }

    fn audit<'a>(&self, names: impl IntoIterator<Item = &'a String>) {
        for name in names {
            if !self.resolver.catalog().is_known_permission(name) {
                self.resolver.report_unknown(name);
            }
        }
    }

    pub fn require_permission(&self, permission: impl Into<String>) -> RequirePermission {
        let guard = RequirePermission::new(self.resolver.clone(), permission);
        self.audit(guard.inner.permissions.iter());
        guard
    }

    pub fn require_all<I, S>(&self, permissions: I) -> RequireAll
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let guard = RequireAll::new(self.resolver.clone(), permissions);
        self.audit(guard.permissions.iter());
        guard
    }

    pub fn require_any<I, S>(&self, permissions: I) -> RequireAny
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let guard = RequireAny::new(self.resolver.clone(), permissions);
        self.audit(guard.permissions.iter());
        guard
    }

    pub fn require_ownership_or_permission<C, R>(
        &self,
        own_permission: impl Into<String>,
        any_permission: impl Into<String>,
        owner: R,
    ) -> RequireOwnershipOrPermission<C>
    where
        C: ?Sized + Sync,
        R: ResourceOwnerResolver<C> + 'static,
    {
        let guard = RequireOwnershipOrPermission::new(
            self.resolver.clone(),
            own_permission,
            any_permission,
            Arc::new(owner),
        );
        self.audit([&guard.own_permission, &guard.any_permission]);
        guard
    }

    pub fn require_role<I, R>(&self, roles: I) -> RequireRole
    where
        I: IntoIterator<Item = R>,
        R: Into<RoleName>,
    {
        RequireRole::new(roles)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
