use axum::extract::rejection::JsonRejection;
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream error: {message}")]
    Upstream {
        message: String,
        details: Option<Value>,
    },
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Internal(err.to_string())
    }

    pub fn upstream<E: std::fmt::Display>(err: E) -> Self {
        ApiError::Upstream {
            message: err.to_string(),
            details: None,
        }
    }

    pub fn upstream_with_details(message: impl Into<String>, details: Value) -> Self {
        ApiError::Upstream {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout(_))
    }

    /// Server-side failures reported with a `details` object, for endpoints
    /// whose error body always carries one. Client errors pass through.
    pub fn with_details(self) -> Self {
        match self {
            ApiError::Timeout(message) | ApiError::Internal(message) => ApiError::Upstream {
                message,
                details: None,
            },
            other => other,
        }
    }

    /// Human-readable message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Timeout(msg)
            | ApiError::Internal(msg) => msg.clone(),
            ApiError::Upstream { message, .. } => message.clone(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream { .. } | ApiError::Timeout(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = match self {
            ApiError::Upstream { message, details } => Json(json!({
                "error": message,
                "details": details.unwrap_or_else(|| json!({})),
            })),
            other => Json(json!({ "error": other.message() })),
        };
        (status, body).into_response()
    }
}
