use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Machine-stable message returned with every rate limit rejection.
pub const RATE_LIMIT_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Failures raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("redis backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("malformed counter value for key '{key}': {value:?}")]
    Malformed { key: String, value: String },

    #[error("timed out after {0:?} waiting for the storage backend")]
    Timeout(std::time::Duration),

    #[error("storage has been closed")]
    Closed,
}

/// Library-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to {op}: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wraps a storage failure with the decision step that triggered it.
    pub fn storage(op: &'static str) -> impl FnOnce(StorageError) -> Self {
        move |source| Error::Storage { op, source }
    }
}

impl From<envconfig::Error> for Error {
    fn from(err: envconfig::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcomes the admission layer turns into HTTP rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    RateLimitExceeded,
    Internal,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_api_error(err: ApiError) -> Self {
        match err {
            ApiError::RateLimitExceeded => {
                Self::new("rate_limit_exceeded", RATE_LIMIT_MESSAGE, 429)
            }
            // Backend detail stays in the logs.
            ApiError::Internal => Self::new("internal_error", "Internal server error", 500),
        }
    }
}

impl ApiError {
    pub fn status(self) -> StatusCode {
        match self {
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorResponse::from_api_error(self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_body() {
        let body = ErrorResponse::from_api_error(ApiError::RateLimitExceeded);
        assert_eq!(body.error, "rate_limit_exceeded");
        assert_eq!(body.message, RATE_LIMIT_MESSAGE);
        assert_eq!(body.code, 429);
    }

    #[test]
    fn test_internal_body_hides_detail() {
        let body = ErrorResponse::from_api_error(ApiError::Internal);
        assert_eq!(body.message, "Internal server error");
        assert_eq!(ApiError::Internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_storage_error_context() {
        let err = Error::storage("increment counter")(StorageError::Closed);
        assert_eq!(err.to_string(), "failed to increment counter: storage has been closed");
    }
}
