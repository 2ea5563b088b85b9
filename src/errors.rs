use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("agent unreachable: {0}")]
    Unreachable(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("invalid input: {0}")]
    InvalidUserInput(String),

    #[error("webhook secret mismatch")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        AppError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Failures of the external agent, as opposed to local bookkeeping or
    /// operator mistakes.
    pub fn is_transport(&self) -> bool {
        matches!(self, AppError::Unreachable(_) | AppError::Timeout(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::MalformedPayload(e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::Timeout(e.to_string())
        } else if e.is_decode() {
            AppError::MalformedPayload(e.to_string())
        } else {
            AppError::Unreachable(e.to_string())
        }
    }
}

impl From<reqwest_middleware::Error> for AppError {
    fn from(e: reqwest_middleware::Error) -> Self {
        match e {
            reqwest_middleware::Error::Reqwest(e) => e.into(),
            // retry middleware gave up; to_string() carries the last cause
            reqwest_middleware::Error::Middleware(e) => AppError::Unreachable(e.to_string()),
        }
    }
}

/// The webhook receiver is the only HTTP surface this crate serves; the agent
/// only looks at the status code, the body is for humans reading agent logs.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            AppError::MalformedPayload(_) => (StatusCode::BAD_REQUEST, "malformed_payload"),
            AppError::InvalidUserInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Unreachable(_) | AppError::Timeout(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
