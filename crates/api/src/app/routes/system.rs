use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::app::errors::json_error;

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "success": true, "message": "healthy" })))
}

pub async fn not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "Route not found")
}
