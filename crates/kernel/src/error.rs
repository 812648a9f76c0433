//! Application error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::media::MediaError;

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

/// JSON error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: &'static str,
    message: String,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Media(e) => media_status(e),
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Media(e) => e.code(),
            AppError::Validation(_) => "validation",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Internal(_) => "internal",
        }
    }
}

fn media_status(error: &MediaError) -> StatusCode {
    match error {
        MediaError::Unauthorized => StatusCode::UNAUTHORIZED,
        MediaError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        MediaError::NotMultipart | MediaError::NoFileProvided { .. } => StatusCode::BAD_REQUEST,
        MediaError::DisallowedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        MediaError::NotFoundOrForbidden => StatusCode::NOT_FOUND,
        MediaError::InvalidState { .. } | MediaError::NotReady | MediaError::MediaLinkFailed => {
            StatusCode::CONFLICT
        }
        MediaError::WriteFailure(_) | MediaError::CleanupFailure(_) | MediaError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Server-side failures are logged in full and reported vaguely.
        let message = if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            success: false,
            error: self.code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;
