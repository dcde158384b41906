//! Axum boundary that runs a prebuilt guard in front of a route.
//!
//! The authenticated [`Principal`] is expected in the request extensions,
//! inserted by whatever authentication layer runs first. This layer maps
//! guard outcomes to responses:
//!
//! | Outcome           | Response                                               |
//! |-------------------|--------------------------------------------------------|
//! | `Unauthenticated` | 401 `{"code":"UNAUTHENTICATED"}`                       |
//! | `Denied`          | 403 `{"code":"FORBIDDEN","message":"access denied"}`   |
//! | `Allowed`         | forwarded to the inner service                         |
//!
//! Denial detail goes to the logs only.

use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{info, warn};

use super::guards::{Guard, GuardOutcome};
use super::models::Principal;

/// Context handed to guards at the HTTP boundary.
pub type RequestContext = Parts;

// ═══════════════════════════════════════════════════════════════════════════════
// Principal extractor
// ═══════════════════════════════════════════════════════════════════════════════

/// Extractor for the authenticated principal; rejects with 401 when absent.
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub Principal);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(CurrentPrincipal)
            .ok_or_else(unauthenticated_response)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer that wraps services with a guard.
///
/// # Example
///
/// ```rust,ignore
/// use warden_core::authz::{GuardFactory, RequireGuardLayer};
///
/// let update_address = factory.require_ownership_or_permission(
///     "address:update",
///     "address:update:any",
///     owner_from_fn(address_owner_from_path),
/// );
///
/// let app = Router::new()
///     .route("/addresses/:id", put(update_address_handler))
///     .layer(RequireGuardLayer::new(update_address));
/// ```
#[derive(Clone)]
pub struct RequireGuardLayer {
    guard: Arc<dyn Guard<RequestContext>>,
}

impl RequireGuardLayer {
    pub fn new<G>(guard: G) -> Self
    where
        G: Guard<RequestContext> + 'static,
    {
        Self {
            guard: Arc::new(guard),
        }
    }

    /// Share an already-built guard between several routes.
    pub fn from_arc(guard: Arc<dyn Guard<RequestContext>>) -> Self {
        Self { guard }
    }
}

impl<S> Layer<S> for RequireGuardLayer {
    type Service = RequireGuardService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireGuardService {
            inner,
            guard: self.guard.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Service that evaluates the guard per request.
#[derive(Clone)]
pub struct RequireGuardService<S> {
    inner: S,
    guard: Arc<dyn Guard<RequestContext>>,
}

impl<S> Service<Request<Body>> for RequireGuardService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let guard = self.guard.clone();
        // Use the service that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (parts, body) = request.into_parts();
            let principal = parts.extensions.get::<Principal>().cloned();

            match guard.check(principal.as_ref(), &parts).await {
                GuardOutcome::Allowed => inner.call(Request::from_parts(parts, body)).await,
                GuardOutcome::Unauthenticated => Ok(unauthenticated_response()),
                GuardOutcome::Denied(reason) => {
                    if let Some(p) = &principal {
                        info!(
                            guard = guard.name(),
                            principal_id = %p.id,
                            method = %parts.method,
                            path = %parts.uri.path(),
                            reason = %reason,
                            "Request denied"
                        );
                    } else {
                        warn!(guard = guard.name(), "Denied without principal");
                    }
                    Ok(forbidden_response())
                }
            }
        })
    }
}

/// Build a 401 Unauthorized JSON response.
pub fn unauthenticated_response() -> Response {
    let body = serde_json::json!({ "code": "UNAUTHENTICATED" });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// Build a 403 Forbidden JSON response.
pub fn forbidden_response() -> Response {
    let body = serde_json::json!({
        "code": "FORBIDDEN",
        "message": "access denied",
    });
    (StatusCode::FORBIDDEN, Json(body)).into_response()
}
