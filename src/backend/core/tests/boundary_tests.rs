//! HTTP boundary tests: guards mounted as axum route layers.
//!
//! Tests cover:
//! - 401 when no principal is attached
//! - 403 with an opaque body on denial
//! - Pass-through to the handler on success
//! - Ownership resolved from the request path

use axum::{
    body::{to_bytes, Body},
    http::{request::Parts, Method, Request, StatusCode},
    routing::{get, post, put},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use warden_core::authz::{
    owner_from_fn, AnyGuard, CanonicalId, CurrentPrincipal, EffectivePermissionResolver,
    GrantRequest, Guard, GuardFactory, OverrideStore, OwnerResolutionError, PermissionCatalog,
    Principal, RequestContext, RequireGuardLayer,
};

// ============================================================================
// Test app
// ============================================================================

fn address_owner(parts: &Parts) -> Result<Option<CanonicalId>, OwnerResolutionError> {
    // Addresses in this app belong to the principal whose id forms the path tail.
    let id = parts
        .uri
        .path()
        .rsplit('/')
        .next()
        .ok_or_else(|| OwnerResolutionError::MissingIdentifier("id".into()))?;
    Ok(CanonicalId::new(id))
}

async fn whoami(CurrentPrincipal(principal): CurrentPrincipal) -> String {
    principal.id.to_string()
}

fn app() -> (Router, Arc<OverrideStore>) {
    let store = Arc::new(OverrideStore::in_memory(
        Arc::new(PermissionCatalog::default()),
        ["1", "7", "9"],
    ));
    let factory = GuardFactory::new(Arc::new(EffectivePermissionResolver::new(store.clone())));

    let bookings = Router::new()
        .route("/bookings", post(|| async { "created" }))
        .route_layer(RequireGuardLayer::new(
            factory.require_permission("booking:create"),
        ));

    let users = Router::new()
        .route("/users/:id", axum::routing::delete(|| async { "deleted" }))
        .route_layer(RequireGuardLayer::new(
            factory.require_permission("user:delete:any"),
        ));

    let addresses = Router::new()
        .route("/addresses/:id", put(|| async { "updated" }))
        .route_layer(RequireGuardLayer::new(
            factory.require_ownership_or_permission::<RequestContext, _>(
                "address:update",
                "address:update:any",
                owner_from_fn::<RequestContext, _>(address_owner),
            ),
        ));

    // One guard instance shared by both admin routes.
    let manage: Arc<dyn Guard<RequestContext>> = Arc::new(AnyGuard::new(vec![
        Arc::new(factory.require_role(["admin"])) as Arc<dyn Guard<RequestContext>>,
        Arc::new(factory.require_permission("permission:grant")),
    ]));
    let admin = Router::new()
        .route("/admin/grants", post(|| async { "granted" }))
        .route("/admin/revokes", post(|| async { "revoked" }))
        .route_layer(RequireGuardLayer::from_arc(manage));

    let me = Router::new().route("/me", get(whoami));

    let router = Router::new()
        .merge(bookings)
        .merge(users)
        .merge(addresses)
        .merge(admin)
        .merge(me);
    (router, store)
}

fn request(method: Method, uri: &str, principal: Option<Principal>) -> Request<Body> {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    if let Some(principal) = principal {
        request.extensions_mut().insert(principal);
    }
    request
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn text_body(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ============================================================================
// Status mapping
// ============================================================================

#[tokio::test]
async fn test_missing_principal_is_401() {
    let (app, _) = app();
    let response = app
        .oneshot(request(Method::POST, "/bookings", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn test_denied_principal_is_403_without_detail() {
    let (app, _) = app();
    let response = app
        .oneshot(request(
            Method::DELETE,
            "/users/9",
            Some(Principal::new("7", "customer")),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = json_body(response).await;
    assert_eq!(body["code"], "FORBIDDEN");
    assert_eq!(body["message"], "access denied");
    // Nothing about which permission was missing.
    assert_eq!(body.as_object().map(|o| o.len()), Some(2));
}

#[tokio::test]
async fn test_allowed_request_reaches_handler() {
    let (app, _) = app();
    let response = app
        .oneshot(request(
            Method::POST,
            "/bookings",
            Some(Principal::new("7", "customer")),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text_body(response).await, "created");
}

#[tokio::test]
async fn test_override_takes_effect_on_next_request() {
    let (app, store) = app();
    let customer = Principal::new("7", "customer");

    let before = app
        .clone()
        .oneshot(request(Method::DELETE, "/users/9", Some(customer.clone())))
        .await
        .unwrap();
    assert_eq!(before.status(), StatusCode::FORBIDDEN);

    store
        .grant(GrantRequest::new("7", "user:delete:any", "1"))
        .await
        .unwrap();

    let after = app
        .oneshot(request(Method::DELETE, "/users/9", Some(customer)))
        .await
        .unwrap();
    assert_eq!(after.status(), StatusCode::OK);
}

// ============================================================================
// Ownership
// ============================================================================

#[tokio::test]
async fn test_owner_may_update_own_address() {
    let (app, _) = app();
    let response = app
        .oneshot(request(
            Method::PUT,
            "/addresses/7",
            Some(Principal::new(7i64, "customer")),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_non_owner_gets_403() {
    let (app, _) = app();
    let response = app
        .oneshot(request(
            Method::PUT,
            "/addresses/9",
            Some(Principal::new("7", "customer")),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_may_update_any_address() {
    let (app, _) = app();
    let response = app
        .oneshot(request(
            Method::PUT,
            "/addresses/9",
            Some(Principal::new("1", "admin")),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

// ============================================================================
// Shared guards
// ============================================================================

#[tokio::test]
async fn test_shared_guard_covers_every_route() {
    let (app, store) = app();
    let staff = Principal::new("9", "staff");

    for uri in ["/admin/grants", "/admin/revokes"] {
        let admin = app
            .clone()
            .oneshot(request(Method::POST, uri, Some(Principal::new("1", "admin"))))
            .await
            .unwrap();
        assert_eq!(admin.status(), StatusCode::OK);

        let denied = app
            .clone()
            .oneshot(request(Method::POST, uri, Some(staff.clone())))
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    }

    // Staff gets through the permission alternative once granted.
    store
        .grant(GrantRequest::new("9", "permission:grant", "1"))
        .await
        .unwrap();
    let allowed = app
        .oneshot(request(Method::POST, "/admin/revokes", Some(staff)))
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
}

// ============================================================================
// Extractor
// ============================================================================

#[tokio::test]
async fn test_current_principal_extractor() {
    let (app, _) = app();

    let anonymous = app
        .clone()
        .oneshot(request(Method::GET, "/me", None))
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let known = app
        .oneshot(request(Method::GET, "/me", Some(Principal::new("9", "staff"))))
        .await
        .unwrap();
    assert_eq!(known.status(), StatusCode::OK);
    assert_eq!(text_body(known).await, "9");
}
