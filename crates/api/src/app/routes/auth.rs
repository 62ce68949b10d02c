//! `/auth/*`: bootstrap signup, login, refresh rotation, logout.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::Response;
use serde_json::json;

use keystone_core::PrincipalId;
use keystone_infra::{AuthOutcome, ServiceError};

use crate::app::dto::{self, AccessTokenView, LoginRequest, SessionView, SignupRequest, UserView, ValidJson};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::{PrincipalContext, RequestMeta};
use crate::cookies;

/// GET /auth/admin-signup-status
pub async fn signup_status(Extension(services): Extension<Arc<AppServices>>) -> Result<Response, ApiError> {
    let can_signup = services.sessions.gate().can_bootstrap().await?;
    Ok(dto::ok(json!({ "canSignup": can_signup })))
}

/// POST /auth/admin-signup
pub async fn admin_signup(
    Extension(services): Extension<Arc<AppServices>>,
    meta: RequestMeta,
    ValidJson(body): ValidJson<SignupRequest>,
) -> Result<Response, ApiError> {
    let outcome = services
        .sessions
        .bootstrap_signup(body.into(), meta.device(), meta.audit())
        .await?;
    session_response(&services, outcome, true)
}

/// POST /auth/login
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    meta: RequestMeta,
    ValidJson(body): ValidJson<LoginRequest>,
) -> Result<Response, ApiError> {
    let outcome = services.sessions.login(body.into(), meta.device(), meta.audit()).await?;
    session_response(&services, outcome, false)
}

/// POST /auth/refresh
pub async fn refresh(
    Extension(services): Extension<Arc<AppServices>>,
    meta: RequestMeta,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let raw = cookies::refresh_token(&headers);
    let issued = services.sessions.refresh(raw.as_deref(), meta.device()).await?;

    let mut response = dto::ok(AccessTokenView {
        access_token: issued.access_token,
    });
    set_cookie(&mut response, services.cookies.header(issued.refresh_token.expose()))?;
    Ok(response)
}

/// POST /auth/logout
pub async fn logout(
    Extension(services): Extension<Arc<AppServices>>,
    meta: RequestMeta,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let raw = cookies::refresh_token(&headers);
    services.sessions.logout(raw.as_deref(), meta.audit()).await?;

    let mut response = dto::ok_message("Logged out");
    set_cookie(&mut response, services.cookies.clear_header())?;
    Ok(response)
}

/// GET /auth/me
pub async fn me(principal: PrincipalContext) -> Response {
    dto::ok(json!({ "user": UserView::from(principal.identity()) }))
}

/// POST /auth/force-logout/:principal_id
pub async fn force_logout(
    Extension(services): Extension<Arc<AppServices>>,
    principal: PrincipalContext,
    meta: RequestMeta,
    Path(target): Path<String>,
) -> Result<Response, ApiError> {
    let target = PrincipalId::from_str(&target)?;
    let revoked = services
        .sessions
        .force_logout(principal.identity(), target, meta.audit())
        .await?;
    Ok(dto::ok(json!({ "revoked": revoked })))
}

fn session_response(services: &AppServices, outcome: AuthOutcome, created: bool) -> Result<Response, ApiError> {
    let view = SessionView {
        access_token: outcome.session.access_token,
        user: UserView::from(&outcome.identity),
    };
    let mut response = if created {
        dto::created(view, "Admin account created")
    } else {
        dto::ok(view)
    };
    set_cookie(&mut response, services.cookies.header(outcome.session.refresh_token.expose()))?;
    Ok(response)
}

fn set_cookie(response: &mut Response, cookie: Option<HeaderValue>) -> Result<(), ApiError> {
    let cookie = cookie.ok_or_else(|| ApiError(ServiceError::Internal("unencodable cookie".into())))?;
    response.headers_mut().append(header::SET_COOKIE, cookie);
    Ok(())
}
