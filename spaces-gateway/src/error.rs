use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

use crate::conversion::publish::PublishError;
use crate::conversion::ConversionError;
use crate::storage::{ListingError, StorageError};
use crate::utils::archive::ArchiveError;

/// Errors surfaced to HTTP callers.
///
/// The detailed cause is logged when the response is built; callers only see
/// the short message carried by the variant. Failed conversions answer with a
/// `message` body, everything else with `error`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    PayloadTooLarge(String),
    ServiceUnavailable(String),
    Internal(String),
    ConversionFailed(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) | ApiError::ConversionFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::ServiceUnavailable(msg)
            | ApiError::Internal(msg)
            | ApiError::ConversionFailed(msg) => msg,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::ConversionFailed(msg) => json!({ "message": msg }),
            other => json!({ "error": other.message() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        tracing::error!(error = %err, "Object store request failed");
        ApiError::Internal("Storage request failed".to_string())
    }
}

impl From<ListingError> for ApiError {
    fn from(err: ListingError) -> Self {
        match err {
            ListingError::Storage(e) => e.into(),
            limit => {
                tracing::warn!(error = %limit, "Listing aborted by budget");
                ApiError::BadRequest(limit.to_string())
            }
        }
    }
}

impl From<ConversionError> for ApiError {
    fn from(err: ConversionError) -> Self {
        match err {
            ConversionError::QueueFull { capacity } => {
                tracing::warn!(capacity, "Conversion rejected, pool saturated");
                ApiError::ServiceUnavailable(
                    "Conversion service is busy, try again later".to_string(),
                )
            }
            ConversionError::Startup(message) => {
                tracing::error!(error = %message, "Converter could not be started");
                ApiError::ConversionFailed("Failed to start conversion process.".to_string())
            }
            ConversionError::Exit { code } => {
                tracing::error!(?code, "Converter exited unsuccessfully");
                ApiError::ConversionFailed("Conversion failed.".to_string())
            }
            ConversionError::Aborted => {
                tracing::error!("Conversion task ended without an outcome");
                ApiError::ConversionFailed("Conversion failed.".to_string())
            }
        }
    }
}

impl From<ArchiveError> for ApiError {
    fn from(err: ArchiveError) -> Self {
        tracing::warn!(error = %err, "Rejected archive upload");
        match err {
            ArchiveError::TooLarge { .. } => {
                ApiError::BadRequest("Archive is too large to extract".to_string())
            }
            _ => ApiError::BadRequest("Invalid zip archive".to_string()),
        }
    }
}

impl From<PublishError> for ApiError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Storage(e) => e.into(),
            read => {
                tracing::error!(error = %read, "Failed to read conversion output");
                ApiError::Internal("Failed to publish conversion output".to_string())
            }
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        tracing::warn!(error = %err, "Malformed multipart request");
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::PayloadTooLarge("Request body is too large".to_string());
        }
        ApiError::BadRequest(format!("Invalid multipart: {}", err.body_text()))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        tracing::error!(error = %err, "IO error");
        ApiError::Internal("Internal server error".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let store: ApiError = StorageError::ListError("access denied".into()).into();
        assert_eq!(store.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(store.message(), "Storage request failed");

        let depth: ApiError = ListingError::DepthExceeded {
            prefix: "a/".into(),
            max_depth: 2,
        }
        .into();
        assert_eq!(depth.status(), StatusCode::BAD_REQUEST);

        let busy: ApiError = ConversionError::QueueFull { capacity: 4 }.into();
        assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);

        let exit: ApiError = ConversionError::Exit { code: Some(137) }.into();
        assert_eq!(exit.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(exit.message(), "Conversion failed.");

        let startup: ApiError = ConversionError::Startup("not found".into()).into();
        assert_eq!(startup.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(startup.message(), "Failed to start conversion process.");

        let archive: ApiError = ArchiveError::TooLarge { limit: 10 }.into();
        assert_eq!(archive.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_response_body_is_generic() {
        let err: ApiError = StorageError::UploadError("secret detail".into()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({ "error": "Storage request failed" }));
    }

    #[tokio::test]
    async fn test_conversion_failure_body_uses_message() {
        let err: ApiError = ConversionError::Startup("No such file".into()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({ "message": "Failed to start conversion process." }));
    }
}
