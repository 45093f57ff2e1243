use axum::extract::rejection::JsonRejection;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use stash_core::protocol::ErrorBody;
use stash_core::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidPayload(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    TooManyRequests(String, u64),
    #[error("{0}")]
    Storage(String),
}

impl AppError {
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }

    pub fn too_many_requests(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::TooManyRequests(message.into(), retry_after_secs)
    }

    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidPayload(_) => ErrorCode::InvalidPayload,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::TooManyRequests(..) => ErrorCode::RateLimited,
            Self::Storage(_) => ErrorCode::StorageFailure,
        }
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::TooManyRequests(..) => StatusCode::TOO_MANY_REQUESTS,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<stash_core::Error> for AppError {
    fn from(error: stash_core::Error) -> Self {
        tracing::error!("Document store failure: {error}");
        Self::Storage("document store failure".to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidPayload(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match &self {
            Self::TooManyRequests(_, secs) => HeaderValue::from_str(&secs.to_string()).ok(),
            _ => None,
        };
        let body = ErrorBody {
            error: self.code(),
            message: Some(self.to_string()),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_errors_carry_retry_after() {
        let response = AppError::too_many_requests("slow down", 42).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &HeaderValue::from_static("42")
        );
    }

    #[test]
    fn storage_errors_hide_details() {
        let error = AppError::from(stash_core::Error::Database("disk I/O error".to_string()));
        assert_eq!(error.code(), ErrorCode::StorageFailure);
        assert_eq!(error.to_string(), "document store failure");
    }
}
