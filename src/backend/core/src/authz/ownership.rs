//! Resource ownership.
//!
//! Identifiers reach this module in whatever shape the caller has them:
//! database integers, UUIDs, path-segment strings, JSON values. Everything
//! is normalised to a [`CanonicalId`] before comparison so `42`, `"42"` and
//! `" 42 "` all name the same owner.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use super::models::PrincipalId;

// ═══════════════════════════════════════════════════════════════════════════════
// Canonical identifiers
// ═══════════════════════════════════════════════════════════════════════════════

/// Trimmed, non-empty string form of an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalId(String);

impl CanonicalId {
    /// `None` when the input is blank.
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Normalise a JSON value. Strings and integral numbers are accepted;
    /// `42.0` canonicalises to `"42"`. Anything else has no identity.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::new(s),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self(i.to_string()))
                } else if let Some(u) = n.as_u64() {
                    Some(Self(u.to_string()))
                } else {
                    let f = n.as_f64()?;
                    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                        Some(Self((f as i64).to_string()))
                    } else {
                        None
                    }
                }
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversion into an optional canonical identifier.
pub trait IntoOwnerId {
    fn into_owner_id(self) -> Option<CanonicalId>;
}

impl IntoOwnerId for CanonicalId {
    fn into_owner_id(self) -> Option<CanonicalId> {
        Some(self)
    }
}

impl IntoOwnerId for &CanonicalId {
    fn into_owner_id(self) -> Option<CanonicalId> {
        Some(self.clone())
    }
}

impl IntoOwnerId for &PrincipalId {
    fn into_owner_id(self) -> Option<CanonicalId> {
        CanonicalId::new(self.as_str())
    }
}

impl IntoOwnerId for &str {
    fn into_owner_id(self) -> Option<CanonicalId> {
        CanonicalId::new(self)
    }
}

impl IntoOwnerId for String {
    fn into_owner_id(self) -> Option<CanonicalId> {
        CanonicalId::new(self)
    }
}

impl IntoOwnerId for &String {
    fn into_owner_id(self) -> Option<CanonicalId> {
        CanonicalId::new(self)
    }
}

impl IntoOwnerId for i32 {
    fn into_owner_id(self) -> Option<CanonicalId> {
        Some(CanonicalId(self.to_string()))
    }
}

impl IntoOwnerId for i64 {
    fn into_owner_id(self) -> Option<CanonicalId> {
        Some(CanonicalId(self.to_string()))
    }
}

impl IntoOwnerId for u64 {
    fn into_owner_id(self) -> Option<CanonicalId> {
        Some(CanonicalId(self.to_string()))
    }
}

impl IntoOwnerId for Uuid {
    fn into_owner_id(self) -> Option<CanonicalId> {
        Some(CanonicalId(self.to_string()))
    }
}

impl IntoOwnerId for &Value {
    fn into_owner_id(self) -> Option<CanonicalId> {
        CanonicalId::from_json(self)
    }
}

impl<T: IntoOwnerId> IntoOwnerId for Option<T> {
    fn into_owner_id(self) -> Option<CanonicalId> {
        self.and_then(IntoOwnerId::into_owner_id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Evaluator
// ═══════════════════════════════════════════════════════════════════════════════

/// Compares a principal identifier to a resource owner identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipEvaluator;

impl OwnershipEvaluator {
    /// True iff both sides are present and canonically equal.
    pub fn is_owner(principal_id: impl IntoOwnerId, owner_id: impl IntoOwnerId) -> bool {
        match (principal_id.into_owner_id(), owner_id.into_owner_id()) {
            (Some(principal), Some(owner)) => principal == owner,
            _ => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Owner resolution
// ═══════════════════════════════════════════════════════════════════════════════

/// Why an owner could not be determined. Always treated as "no owner".
#[derive(Debug, Error)]
pub enum OwnerResolutionError {
    #[error("resource not found")]
    NotFound,

    #[error("owner identifier missing from request: {0}")]
    MissingIdentifier(String),

    #[error("owner lookup failed: {0}")]
    Lookup(String),
}

impl From<crate::error::WardenError> for OwnerResolutionError {
    fn from(err: crate::error::WardenError) -> Self {
        Self::Lookup(err.to_string())
    }
}

/// Finds the owner of the resource an operation targets.
///
/// `C` is whatever context the boundary hands to guards; for the axum layer
/// it is the request's `http::request::Parts`.
#[async_trait]
pub trait ResourceOwnerResolver<C: ?Sized + Sync>: Send + Sync {
    async fn resolve_owner(&self, context: &C) -> Result<Option<CanonicalId>, OwnerResolutionError>;
}

/// Adapter for synchronous closures.
pub struct FnOwnerResolver<F> {
    f: F,
}

impl<F> FnOwnerResolver<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<C, F> ResourceOwnerResolver<C> for FnOwnerResolver<F>
where
    C: ?Sized + Sync,
    F: Fn(&C) -> Result<Option<CanonicalId>, OwnerResolutionError> + Send + Sync,
{
    async fn resolve_owner(&self, context: &C) -> Result<Option<CanonicalId>, OwnerResolutionError> {
        (self.f)(context)
    }
}

/// Wrap a synchronous closure as a [`ResourceOwnerResolver`].
pub fn owner_from_fn<C, F>(f: F) -> FnOwnerResolver<F>
where
    C: ?Sized + Sync,
    F: Fn(&C) -> Result<Option<CanonicalId>, OwnerResolutionError> + Send + Sync,
{
    FnOwnerResolver::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_and_string_ids_match() {
        assert!(OwnershipEvaluator::is_owner(&PrincipalId::from("42"), 42i64));
        assert!(OwnershipEvaluator::is_owner("7", " 7 "));
        assert!(OwnershipEvaluator::is_owner(&json!(42), &json!("42")));
        assert!(OwnershipEvaluator::is_owner(&json!(42.0), "42"));
        assert!(!OwnershipEvaluator::is_owner("7", "9"));
    }

    #[test]
    fn test_absent_side_is_never_owner() {
        assert!(!OwnershipEvaluator::is_owner(None::<&str>, "7"));
        assert!(!OwnershipEvaluator::is_owner("7", None::<&str>));
        assert!(!OwnershipEvaluator::is_owner("", ""));
        assert!(!OwnershipEvaluator::is_owner(&json!(null), &json!(null)));
        assert!(!OwnershipEvaluator::is_owner(&json!(1.5), &json!(1.5)));
    }

    #[test]
    fn test_uuid_ids() {
        let id = Uuid::new_v4();
        assert!(OwnershipEvaluator::is_owner(id, id.to_string().as_str()));
    }

    #[tokio::test]
    async fn test_fn_resolver() {
        let resolver = owner_from_fn(|ctx: &Value| match ctx.get("owner_id") {
            Some(v) => Ok(CanonicalId::from_json(v)),
            None => Err(OwnerResolutionError::MissingIdentifier("owner_id".into())),
        });

        let owner = resolver.resolve_owner(&json!({"owner_id": 7})).await.unwrap();
        assert_eq!(owner.unwrap().as_str(), "7");
        assert!(resolver.resolve_owner(&json!({})).await.is_err());
    }
}
