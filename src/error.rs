//! Error handling for SeatSense Server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Seat catalog could not be loaded or validated (fatal at startup)
    #[error("Catalog load error: {0}")]
    CatalogLoad(String),

    /// Frame source unreadable or unopenable (recoverable, cycle retried)
    #[error("Frame source error: {0}")]
    FrameSource(String),

    /// Too few reliable feature correspondences for a stable homography
    #[error("Alignment failure: {0}")]
    Alignment(String),

    /// Per-cycle detection failure (classifier error, cycle timeout)
    #[error("Detection failure: {0}")]
    Detection(String),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error (streaming frame source)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable kind, used in cycle logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::CatalogLoad(_) => "catalog_load",
            Error::FrameSource(_) => "frame_source",
            Error::Alignment(_) => "alignment",
            Error::Detection(_) => "detection",
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "validation",
            Error::Serialization(_) => "serialization",
            Error::Http(_) => "http",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::CatalogLoad(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CATALOG_LOAD_ERROR",
                msg.clone(),
            ),
            Error::FrameSource(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "FRAME_SOURCE_ERROR",
                msg.clone(),
            ),
            Error::Alignment(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "ALIGNMENT_FAILURE",
                msg.clone(),
            ),
            Error::Detection(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "DETECTION_FAILURE",
                msg.clone(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                e.to_string(),
            ),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
