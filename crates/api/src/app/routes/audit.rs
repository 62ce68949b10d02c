use std::sync::Arc;

use axum::extract::Extension;
use axum::response::Response;

use crate::app::dto::{self, ListParams};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

/// GET /audit-logs
pub async fn list(Extension(services): Extension<Arc<AppServices>>, params: ListParams) -> Result<Response, ApiError> {
    let page = services.directory.list_audit(&params.into_query()).await?;
    Ok(dto::ok(page))
}
