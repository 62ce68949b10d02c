//! Per-request context: the resolved caller and request metadata.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts, OriginalUri};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;

use keystone_auth::{AuditMeta, DeviceInfo, ResolvedIdentity};
use keystone_infra::ServiceError;

use crate::app::errors::ApiError;

/// Identity attached by the auth middleware.
///
/// Extracting it from a request the middleware did not run on fails with 401.
#[derive(Debug, Clone)]
pub struct PrincipalContext(Arc<ResolvedIdentity>);

impl PrincipalContext {
    pub fn new(identity: ResolvedIdentity) -> Self {
        Self(Arc::new(identity))
    }

    pub fn identity(&self) -> &ResolvedIdentity {
        &self.0
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for PrincipalContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<PrincipalContext>()
            .cloned()
            .ok_or(ApiError(ServiceError::Unauthorized("Unauthorized")))
    }
}

/// Client address, user agent and route of the current request.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub route: Option<String>,
    pub method: Option<String>,
}

impl RequestMeta {
    pub fn audit(&self) -> AuditMeta {
        AuditMeta {
            ip: self.ip.clone(),
            user_agent: self.user_agent.clone(),
            route: self.route.clone(),
            method: self.method.clone(),
        }
    }

    pub fn device(&self) -> DeviceInfo {
        DeviceInfo {
            ip: self.ip.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let route = parts
            .extensions
            .get::<OriginalUri>()
            .map(|OriginalUri(uri)| uri.path().to_string())
            .unwrap_or_else(|| parts.uri.path().to_string());

        Ok(Self {
            ip,
            user_agent,
            route: Some(route),
            method: Some(parts.method.to_string()),
        })
    }
}
