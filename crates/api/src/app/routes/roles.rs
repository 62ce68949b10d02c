//! `/roles*` and `/permissions`.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Extension, Path};
use axum::response::Response;
use serde_json::json;

use keystone_auth::permissions;
use keystone_auth::{RoleDraft, RolePatch};
use keystone_core::RoleId;

use crate::app::dto::{self, ListParams, ValidJson};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::{PrincipalContext, RequestMeta};

/// GET /roles
pub async fn list(Extension(services): Extension<Arc<AppServices>>, params: ListParams) -> Result<Response, ApiError> {
    let page = services.directory.list_roles(&params.into_query()).await?;
    Ok(dto::ok(page))
}

/// POST /roles
pub async fn create(
    Extension(services): Extension<Arc<AppServices>>,
    principal: PrincipalContext,
    meta: RequestMeta,
    ValidJson(body): ValidJson<RoleDraft>,
) -> Result<Response, ApiError> {
    let role = services.directory.create_role(principal.identity(), body, meta.audit()).await?;
    Ok(dto::created(json!({ "role": role }), "Role created"))
}

/// PATCH /roles/:id
pub async fn update(
    Extension(services): Extension<Arc<AppServices>>,
    principal: PrincipalContext,
    meta: RequestMeta,
    Path(id): Path<String>,
    ValidJson(body): ValidJson<RolePatch>,
) -> Result<Response, ApiError> {
    let id = RoleId::from_str(&id)?;
    let role = services
        .directory
        .update_role(principal.identity(), id, body, meta.audit())
        .await?;
    Ok(dto::ok(json!({ "role": role })))
}

/// DELETE /roles/:id
pub async fn delete(
    Extension(services): Extension<Arc<AppServices>>,
    principal: PrincipalContext,
    meta: RequestMeta,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = RoleId::from_str(&id)?;
    services.directory.delete_role(principal.identity(), id, meta.audit()).await?;
    Ok(dto::ok_message("Role deleted"))
}

/// GET /permissions
pub async fn catalog() -> Response {
    dto::ok(json!({ "items": permissions::catalog() }))
}
