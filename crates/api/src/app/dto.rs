//! Request/response DTOs and JSON envelope helpers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use keystone_auth::{Principal, ResolvedIdentity};
use keystone_core::RoleId;
use keystone_infra::{ListQuery, LoginInput, SignupInput};

use super::errors::ApiError;

// ─────────────────────────────────────────────────────────────────────────────
// Envelopes
// ─────────────────────────────────────────────────────────────────────────────

pub fn ok<T: Serialize>(data: T) -> Response {
    envelope(StatusCode::OK, data, None)
}

pub fn created<T: Serialize>(data: T, message: &str) -> Response {
    envelope(StatusCode::CREATED, data, Some(message))
}

pub fn ok_message(message: &str) -> Response {
    (StatusCode::OK, Json(json!({ "success": true, "message": message }))).into_response()
}

fn envelope<T: Serialize>(status: StatusCode, data: T, message: Option<&str>) -> Response {
    let body = match message {
        Some(m) => json!({ "success": true, "message": m, "data": data }),
        None => json!({ "success": true, "data": data }),
    };
    (status, Json(body)).into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Extractors
// ─────────────────────────────────────────────────────────────────────────────

/// JSON body whose rejection is a `VALIDATION_ERROR` envelope.
pub struct ValidJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::validation(rejection.body_text())),
        }
    }
}

/// `?page=&limit=&search=`. Non-numeric values fall back to defaults.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub search: Option<String>,
}

impl ListParams {
    pub fn into_query(self) -> ListQuery {
        ListQuery::new(number(self.page), number(self.limit), self.search)
    }
}

fn number(raw: Option<String>) -> Option<u32> {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .map(|n| n.clamp(0, i64::from(u32::MAX)) as u32)
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ListParams {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<ListParams>::from_request_parts(parts, state).await {
            Ok(Query(params)) => Ok(params),
            Err(rejection) => Err(ApiError::validation(rejection.body_text())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
}

impl From<SignupRequest> for SignupInput {
    fn from(r: SignupRequest) -> Self {
        SignupInput {
            name: r.name,
            email: r.email,
            phone: r.phone,
            password: r.password,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl From<LoginRequest> for LoginInput {
    fn from(r: LoginRequest) -> Self {
        LoginInput {
            email: r.email,
            password: r.password,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignmentRequest {
    #[serde(default)]
    pub role_ids: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

/// Public projection of a principal. `permissions` only appears where resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub is_active: bool,
    pub role_ids: Vec<RoleId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<String>>,
}

impl From<&Principal> for UserView {
    fn from(p: &Principal) -> Self {
        Self {
            id: p.id.to_string(),
            name: p.name.clone(),
            email: p.email.as_str().to_string(),
            phone: p.phone.clone(),
            is_active: p.is_active,
            role_ids: p.role_ids.clone(),
            permissions: None,
        }
    }
}

impl From<&ResolvedIdentity> for UserView {
    fn from(identity: &ResolvedIdentity) -> Self {
        Self {
            permissions: Some(identity.permissions.iter().map(|p| p.as_str().to_string()).collect()),
            ..UserView::from(&identity.principal)
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub access_token: String,
    pub user: UserView,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenView {
    pub access_token: String,
}
