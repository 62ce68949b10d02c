//! Authentication middleware and the per-route permission guard.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;

use keystone_auth::{Permission, authorize};
use keystone_infra::ServiceError;

use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

/// Resolve `Authorization: Bearer <token>` to a [`PrincipalContext`] on every request.
pub async fn auth_middleware(State(services): State<Arc<AppServices>>, mut req: Request, next: Next) -> Response {
    let Some(token) = extract_bearer(req.headers()) else {
        return ApiError(ServiceError::Unauthorized("Missing token")).into_response();
    };

    match services.resolver.resolve_bearer(&token).await {
        Ok(identity) => {
            req.extensions_mut().insert(PrincipalContext::new(identity));
            next.run(req).await
        }
        Err(err) => ApiError(err).into_response(),
    }
}

/// Admit the request only if the resolved caller holds `required`.
pub async fn require_permission(State(required): State<Permission>, req: Request, next: Next) -> Response {
    let identity = req.extensions().get::<PrincipalContext>().map(PrincipalContext::identity);
    match authorize(identity, &required) {
        Ok(()) => next.run(req).await,
        Err(err) => ApiError(err.into()).into_response(),
    }
}

/// Wrap a method router with [`require_permission`].
pub fn guarded(route: MethodRouter, required: Permission) -> MethodRouter {
    route.route_layer(from_fn_with_state(required, require_permission))
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}
