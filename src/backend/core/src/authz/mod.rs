//! Authorization decision core.
//!
//! This module provides:
//! - **Catalog**: permissions, roles and role default sets, seeded once at startup
//! - **Override Store**: per-principal grants and soft revokes with optional expiry
//! - **Resolver**: effective permissions as role defaults plus active overrides
//! - **Ownership**: canonical identifier comparison and owner resolution
//! - **Guards**: tri-state decisions (`Unauthenticated`, `Denied`, `Allowed`)
//! - **Middleware**: tower layer mapping guard outcomes to 401/403
//!
//! # Usage
//!
//! ```rust,ignore
//! use warden_core::authz::{
//!     EffectivePermissionResolver, GuardFactory, OverrideStore, PermissionCatalog,
//!     RequireGuardLayer,
//! };
//!
//! let catalog = Arc::new(PermissionCatalog::from_toml_file("seed/catalog.toml")?);
//! let store = Arc::new(OverrideStore::new(repository, directory, catalog));
//! let factory = GuardFactory::new(Arc::new(EffectivePermissionResolver::new(store)));
//!
//! let app = Router::new()
//!     .route("/bookings", post(create_booking))
//!     .layer(RequireGuardLayer::new(factory.require_permission("booking:create")));
//! ```

pub mod catalog;
pub mod clock;
pub mod guards;
pub mod middleware;
pub mod models;
pub mod overrides;
pub mod ownership;
pub mod resolver;
pub mod roles;
pub mod sweep;

pub use catalog::{CatalogSeed, PermissionCatalog};
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use guards::{
    AllGuards, AnyGuard, DenyReason, Guard, GuardFactory, GuardOutcome, RequireAll, RequireAny,
    RequireOwnershipOrPermission, RequirePermission, RequireRole,
};
pub use middleware::{CurrentPrincipal, RequestContext, RequireGuardLayer, RequireGuardService};
pub use models::{
    OverrideEvent, OverrideEventKind, Permission, PermissionName, PermissionOverride, Principal,
    PrincipalId, Role, RoleName, RolePermission,
};
pub use overrides::{
    GrantRequest, InMemoryOverrideRepository, OverrideCache, OverrideRepository, OverrideStore,
    PrincipalDirectory, StaticPrincipalDirectory,
};
pub use ownership::{
    owner_from_fn, CanonicalId, FnOwnerResolver, IntoOwnerId, OwnerResolutionError,
    OwnershipEvaluator, ResourceOwnerResolver,
};
pub use resolver::{EffectivePermissionResolver, PermissionCheck};
pub use roles::PredefinedRole;
pub use sweep::ExpirySweeper;
