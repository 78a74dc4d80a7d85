//! Error types for the function proxy

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type for proxy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for proxy operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Client-caused failure with the status chosen by the failing step
    #[error("{message}")]
    InvalidRequest {
        /// Request id, when it was known at the time of failure
        request_id: Option<String>,
        /// Human readable reason
        message: String,
        /// HTTP status returned to the caller
        status: StatusCode,
    },

    /// Platform or worker returned a non-success response or was unreachable
    #[error("{message}")]
    Upstream {
        /// Request id, when it was known at the time of failure
        request_id: Option<String>,
        /// Human readable reason
        message: String,
    },

    /// Worker process failed to launch or died immediately
    #[error("worker startup failed: {0}")]
    Startup(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an invalid-request failure for a known request id
    pub fn invalid(request_id: &str, message: impl Into<String>, status: StatusCode) -> Self {
        Error::InvalidRequest {
            request_id: Some(request_id.to_string()),
            message: message.into(),
            status,
        }
    }

    /// Build a 400 failure for a known request id
    pub fn bad_request(request_id: &str, message: impl Into<String>) -> Self {
        Self::invalid(request_id, message, StatusCode::BAD_REQUEST)
    }

    /// Build a 401 failure for a known request id
    pub fn unauthorized(request_id: &str, message: impl Into<String>) -> Self {
        Self::invalid(request_id, message, StatusCode::UNAUTHORIZED)
    }

    /// Build an upstream failure for a known request id
    pub fn upstream(request_id: &str, message: impl Into<String>) -> Self {
        Error::Upstream {
            request_id: Some(request_id.to_string()),
            message: message.into(),
        }
    }

    /// HTTP status this error maps to
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidRequest { status, .. } => *status,
            Error::Upstream { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Startup(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Request id attached to the error, if any
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Error::InvalidRequest { request_id, .. } | Error::Upstream { request_id, .. } => {
                request_id.as_deref()
            }
            _ => None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = serde_json::json!({
            "status": "Failure",
            "message": self.to_string(),
            "code": status.as_u16(),
            "requestId": self.request_id(),
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Error::Config(format!("invalid signing key: {}", e))
    }
}
