use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::config::{MAX_VIEWPORT_ASPECT_RATIO, MIN_VIEWPORT_ASPECT_RATIO};
use crate::schema::DataValidationError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum DetectiveError {
    #[error("URL Metric storage is presently locked for the current client")]
    StorageLocked,

    #[error("URL Metrics ETag is stale, reload the page to collect new metrics")]
    StaleEtag,

    #[error("URL Metric slug does not match the URL")]
    SlugMismatch,

    #[error(
        "Viewport aspect ratio ({0}) is not in the accepted range of {min} to {max}",
        min = MIN_VIEWPORT_ASPECT_RATIO,
        max = MAX_VIEWPORT_ASPECT_RATIO
    )]
    ViewportAspectRatio(f64),

    #[error("Failed to validate URL Metric: {0}")]
    Validation(#[from] DataValidationError),

    #[error("There is no need to store URL Metrics for this viewport group since it is already complete")]
    GroupComplete,

    #[error("URL Metric was dropped after repeated write conflicts")]
    SampleDropped,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Internal(String),
}

impl DetectiveError {
    pub fn code(&self) -> &'static str {
        match self {
            DetectiveError::StorageLocked => "url_metric_storage_locked",
            DetectiveError::StaleEtag => "stale_etag",
            DetectiveError::SlugMismatch => "slug_mismatch",
            DetectiveError::ViewportAspectRatio(_) => "viewport_aspect_ratio",
            DetectiveError::Validation(_) => "invalid_url_metric",
            DetectiveError::GroupComplete => "url_metric_group_complete",
            DetectiveError::SampleDropped => "url_metric_dropped",
            DetectiveError::InvalidRequest(_) => "invalid_request",
            DetectiveError::Store(_) => "storage_error",
            DetectiveError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DetectiveError::StorageLocked => StatusCode::TOO_MANY_REQUESTS,
            DetectiveError::StaleEtag => StatusCode::BAD_REQUEST,
            DetectiveError::SlugMismatch => StatusCode::BAD_REQUEST,
            DetectiveError::ViewportAspectRatio(_) => StatusCode::BAD_REQUEST,
            DetectiveError::Validation(_) => StatusCode::BAD_REQUEST,
            DetectiveError::GroupComplete => StatusCode::FORBIDDEN,
            DetectiveError::SampleDropped => StatusCode::CONFLICT,
            DetectiveError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DetectiveError::Store(StoreError::InvalidUrl(_)) => StatusCode::BAD_REQUEST,
            DetectiveError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DetectiveError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tokio::task::JoinError> for DetectiveError {
    fn from(e: tokio::task::JoinError) -> Self {
        DetectiveError::Internal(format!("Blocking task failed: {}", e))
    }
}

impl IntoResponse for DetectiveError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        if let DetectiveError::Validation(e) = &self {
            body["field"] = serde_json::Value::String(e.field_path().to_string());
        }

        (self.status(), axum::Json(body)).into_response()
    }
}
