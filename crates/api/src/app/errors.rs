//! Single translator from service failures to the JSON failure envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use keystone_core::DomainError;
use keystone_infra::ServiceError;

#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self(ServiceError::Validation(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ServiceError::Validation(_)
            | ServiceError::RoleProtected(_)
            | ServiceError::RoleAssignmentInvalid(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized(_) | ServiceError::InvalidCredentials | ServiceError::InvalidRefresh(_) => {
                StatusCode::UNAUTHORIZED
            }
            ServiceError::Forbidden(_) | ServiceError::SignupRequired => StatusCode::FORBIDDEN,
            ServiceError::SignupClosed | ServiceError::Conflict { .. } => StatusCode::CONFLICT,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::RoleNotReady | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(value: ServiceError) -> Self {
        Self(value)
    }
}

impl From<DomainError> for ApiError {
    fn from(value: DomainError) -> Self {
        Self(value.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.0.code();

        let message = match &self.0 {
            ServiceError::Internal(cause) => {
                error!(code, error = %cause, "request failed");
                "Server error".to_string()
            }
            other if other.is_internal() => {
                error!(code, error = %other, "request failed");
                other.to_string()
            }
            other => other.to_string(),
        };

        json_error(status, code, message)
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "success": false,
            "code": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
