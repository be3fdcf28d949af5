//! Crate-wide error type and its HTTP mapping

use crate::auth::AuthError;
use crate::context::ReduceError;
use crate::quota::QuotaExceeded;
use crate::upstream::UpstreamError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),

    #[error("Context reduction failed: {0}")]
    Reduction(#[from] ReduceError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unprocessable request: {0}")]
    Unprocessable(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error body returned to clients
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::Reduction(ReduceError::InvalidTopK) => StatusCode::BAD_REQUEST,
            Error::Reduction(ReduceError::Tokenization(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Configuration(_) | Error::Reduction(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::QuotaExceeded(e) => e.resource.reason_code(),
            Error::Reduction(_) => "REDUCTION_FAILED",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::Unprocessable(_) => "VALIDATION_ERROR",
            Error::Upstream(_) => "UPSTREAM_ERROR",
            Error::Configuration(_) => "CONFIGURATION_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ApiError::new(self.code(), self.to_string()));
        let mut response = (status, body).into_response();

        match &self {
            Error::QuotaExceeded(e) => {
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(e.retry_after.as_secs()),
                );
            }
            Error::Unauthorized(_) => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("API key"),
                );
            }
            _ => {}
        }
        response
    }
}
