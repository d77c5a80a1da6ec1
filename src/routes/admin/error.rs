use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::db::DbError;

#[derive(Debug)]
pub enum AdminError {
    NotFound(String),
    Conflict(String),
    Validation(String),
    BadRequest(String),
    ServicesRequired,
    Unauthorized,
    Database(DbError),
    Internal(String),
}

impl From<DbError> for AdminError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => AdminError::NotFound("Resource not found".to_string()),
            DbError::Conflict(msg) => AdminError::Conflict(msg),
            DbError::Validation(msg) => AdminError::Validation(msg),
            DbError::NotConfigured => AdminError::ServicesRequired,
            _ => AdminError::Database(err),
        }
    }
}

/// `{"error": {"type": "...", "code": "...", "message": "..."}}`
#[derive(Debug, Serialize)]
pub struct AdminErrorBody {
    pub error: AdminErrorInfo,
}

#[derive(Debug, Serialize)]
pub struct AdminErrorInfo {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, code, message, error_type) = match self {
            AdminError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, "not_found"),
            AdminError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg, "conflict"),
            AdminError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                msg,
                "validation_error",
            ),
            AdminError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", msg, "bad_request")
            }
            AdminError::ServicesRequired => (
                StatusCode::NOT_IMPLEMENTED,
                "feature_not_available",
                "This endpoint requires a configured database.".to_string(),
                "internal_error",
            ),
            AdminError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Unauthorized".to_string(),
                "auth_failure",
            ),
            AdminError::Database(err) => {
                tracing::error!(error = %err, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "An internal database error occurred".to_string(),
                    "internal_error",
                )
            }
            AdminError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    "internal_error",
                )
            }
        };

        let body = AdminErrorBody {
            error: AdminErrorInfo {
                error_type,
                code,
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}
