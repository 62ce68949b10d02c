//! `/users*`: principal management and role assignment.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::response::Response;
use serde_json::json;

use keystone_core::PrincipalId;
use keystone_infra::{NewPrincipal, PrincipalPatch};

use crate::app::dto::{self, ListParams, RoleAssignmentRequest, UserView, ValidJson};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::{PrincipalContext, RequestMeta};

/// GET /users
pub async fn list(Extension(services): Extension<Arc<AppServices>>, params: ListParams) -> Result<Response, ApiError> {
    let page = services.directory.list_principals(&params.into_query()).await?;
    Ok(dto::ok(page.map(|p| UserView::from(&p))))
}

/// POST /users
pub async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    principal: PrincipalContext,
    meta: RequestMeta,
    ValidJson(body): ValidJson<NewPrincipal>,
) -> Result<Response, ApiError> {
    let created = services
        .directory
        .create_principal(principal.identity(), body, meta.audit())
        .await?;
    Ok(dto::created(json!({ "user": UserView::from(&created) }), "User created"))
}

/// PATCH /users/:id
pub async fn update(
    Extension(services): Extension<Arc<AppServices>>,
    principal: PrincipalContext,
    meta: RequestMeta,
    Path(id): Path<String>,
    ValidJson(body): ValidJson<PrincipalPatch>,
) -> Result<Response, ApiError> {
    let id = PrincipalId::from_str(&id)?;
    let updated = services
        .directory
        .update_principal(principal.identity(), id, body, meta.audit())
        .await?;
    Ok(dto::ok(json!({ "user": UserView::from(&updated) })))
}

/// PATCH /users/:id/roles
pub async fn assign_roles(
    Extension(services): Extension<Arc<AppServices>>,
    principal: PrincipalContext,
    meta: RequestMeta,
    Path(id): Path<String>,
    ValidJson(body): ValidJson<RoleAssignmentRequest>,
) -> Result<Response, ApiError> {
    let id = PrincipalId::from_str(&id)?;
    let updated = services
        .directory
        .assign_role(principal.identity(), id, body.role_ids, meta.audit())
        .await?;
    Ok(dto::ok(json!({ "user": UserView::from(&updated) })))
}
