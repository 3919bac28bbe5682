use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for throttle operations
pub type Result<T> = std::result::Result<T, ThrottleError>;

/// Throttle error types
#[derive(Error, Debug)]
pub enum ThrottleError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown rate limit profile: {0}")]
    InvalidProfile(String),

    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ThrottleError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ThrottleError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ThrottleError::InvalidProfile(_) => StatusCode::BAD_REQUEST,
            ThrottleError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ThrottleError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ThrottleError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error comes from the shared counter store
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, ThrottleError::StoreUnavailable(_))
    }

    /// Message safe to show to external callers.
    ///
    /// Store failures are reported generically so the response never carries
    /// connection details.
    fn public_message(&self) -> String {
        match self {
            ThrottleError::StoreUnavailable(_) => "Service temporarily unavailable".to_string(),
            ThrottleError::Config(_) | ThrottleError::Internal(_) | ThrottleError::Io(_) => {
                "Internal server error".to_string()
            }
            ThrottleError::InvalidProfile(_) => self.to_string(),
        }
    }
}

impl From<redis::RedisError> for ThrottleError {
    fn from(err: redis::RedisError) -> Self {
        ThrottleError::StoreUnavailable(err.to_string())
    }
}

impl IntoResponse for ThrottleError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.public_message(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
