use crate::domain::errors::{ExecutionError, SettingsError};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wire error: `{"error": {"code", "message", "details?"}}` with a standard
/// status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(code: &str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn rate_limited() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "too many requests",
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });
        if let Some(details) = self.details {
            error["details"] = details;
        }
        (self.status, Json(json!({ "error": error }))).into_response()
    }
}

impl From<SettingsError> for ApiError {
    fn from(err: SettingsError) -> Self {
        let status = match &err {
            SettingsError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            SettingsError::VersionConflict => StatusCode::CONFLICT,
            SettingsError::ModeBlocked { .. } => StatusCode::BAD_REQUEST,
            SettingsError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let details = match &err {
            SettingsError::ModeBlocked { reason } => Some(json!({ "reason_code": reason })),
            _ => None,
        };
        Self {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
            details,
        }
    }
}

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        let status = match &err {
            ExecutionError::SignalNotFound | ExecutionError::OrderNotFound => {
                StatusCode::NOT_FOUND
            }
            ExecutionError::SignalNotExecutable { .. }
            | ExecutionError::ModeBlocked { .. }
            | ExecutionError::NotCancellable { .. }
            | ExecutionError::InvalidTransition(_)
            | ExecutionError::UnknownBroker(_) => StatusCode::BAD_REQUEST,
            ExecutionError::Broker(_) | ExecutionError::Persistence(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let details = match &err {
            ExecutionError::ModeBlocked { reason, .. } => {
                Some(json!({ "reason_code": reason }))
            }
            _ => None,
        };
        Self {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
            details,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{err:#}"))
    }
}
