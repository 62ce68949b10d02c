use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, patch, post};
use axum::Router;

use keystone_auth::permissions::{
    AUDIT_VIEW, PERMISSIONS_VIEW, ROLES_ASSIGN, ROLES_CREATE, ROLES_DELETE, ROLES_UPDATE, ROLES_VIEW,
    USERS_CREATE, USERS_UPDATE, USERS_VIEW,
};

use crate::app::services::AppServices;
use crate::middleware::{auth_middleware, guarded};

pub mod audit;
pub mod auth;
pub mod roles;
pub mod system;
pub mod users;

/// Routes that need no access token.
pub fn public() -> Router {
    Router::new()
        .route("/auth/admin-signup-status", get(auth::signup_status))
        .route("/auth/admin-signup", post(auth::admin_signup))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
}

/// Routes behind the auth middleware; privileged ones carry a permission guard.
pub fn protected(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/force-logout/:principal_id", post(auth::force_logout))
        .route("/users", guarded(get(users::list), USERS_VIEW))
        .route("/users", guarded(post(users::create), USERS_CREATE))
        .route("/users/:id", guarded(patch(users::update), USERS_UPDATE))
        .route("/users/:id/roles", guarded(patch(users::assign_roles), ROLES_ASSIGN))
        .route("/roles", guarded(get(roles::list), ROLES_VIEW))
        .route("/roles", guarded(post(roles::create), ROLES_CREATE))
        .route("/roles/:id", guarded(patch(roles::update), ROLES_UPDATE))
        .route("/roles/:id", guarded(delete(roles::delete), ROLES_DELETE))
        .route("/permissions", guarded(get(roles::catalog), PERMISSIONS_VIEW))
        .route("/audit-logs", guarded(get(audit::list), AUDIT_VIEW))
        .route_layer(from_fn_with_state(services, auth_middleware))
}
