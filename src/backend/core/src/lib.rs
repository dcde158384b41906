#![allow(clippy::result_large_err)]
//! # Warden Core
//!
//! Authorization decision core: given an authenticated principal and a
//! requested operation, decide whether the operation is permitted.
//!
//! ## Architecture
//!
//! - **Catalog**: permission names, roles and role default sets, seeded at startup
//! - **Override Store**: per-principal grants and soft revokes with lazy expiry and history
//! - **Resolver**: effective permissions as role defaults plus active overrides
//! - **Ownership**: canonical owner comparison and pluggable owner resolution
//! - **Guards**: composable tri-state decisions with a tower/axum boundary layer
//! - **Persistence**: PostgreSQL repositories with atomic upserts, or in-memory
//! - **Telemetry**: structured logging and `metrics` counters

pub mod authz;
pub mod config;
pub mod db;
pub mod error;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, WardenError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::authz::{
        owner_from_fn, AllGuards, AnyGuard, CanonicalId, CatalogSeed, Clock, CurrentPrincipal,
        DenyReason, EffectivePermissionResolver, ExpirySweeper, GrantRequest, Guard,
        GuardFactory, GuardOutcome, InMemoryOverrideRepository, ManualClock, OverrideEvent,
        OverrideEventKind, OverrideRepository, OverrideStore, OwnerResolutionError,
        OwnershipEvaluator, PermissionCatalog, PermissionOverride, PredefinedRole, Principal,
        PrincipalDirectory, PrincipalId, RequestContext, RequireAll, RequireAny,
        RequireGuardLayer, RequireOwnershipOrPermission, RequirePermission, RequireRole,
        ResourceOwnerResolver, RoleName, StaticPrincipalDirectory, SystemClock,
    };
    pub use crate::config::Config;
    pub use crate::db::{Database, PgOverrideRepository, PgPrincipalDirectory};
    pub use crate::error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, Result, WardenError};
}
