//! Media lifecycle errors.

use thiserror::Error;

use super::model::MediaStatus;

/// Errors surfaced by intake, finalize, linking and reaping.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("authentication required")]
    Unauthorized,

    #[error("payload too large: max {max} bytes")]
    PayloadTooLarge { max: u64 },

    #[error("request must be multipart/form-data")]
    NotMultipart,

    #[error("no '{field}' file part found in request")]
    NoFileProvided { field: &'static str },

    #[error("disallowed media type: {0}")]
    DisallowedType(String),

    #[error("failed to write media to storage")]
    WriteFailure(#[source] anyhow::Error),

    #[error("media not found")]
    NotFoundOrForbidden,

    #[error("media is {actual}, expected {expected}")]
    InvalidState {
        expected: MediaStatus,
        actual: MediaStatus,
    },

    #[error("media not ready or already used")]
    NotReady,

    #[error("media could not be linked")]
    MediaLinkFailed,

    #[error("cleanup failed, record marked {0}")]
    CleanupFailure(MediaStatus),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl MediaError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            MediaError::Unauthorized => "unauthorized",
            MediaError::PayloadTooLarge { .. } => "payload_too_large",
            MediaError::NotMultipart => "not_multipart",
            MediaError::NoFileProvided { .. } => "no_file_provided",
            MediaError::DisallowedType(_) => "disallowed_type",
            MediaError::WriteFailure(_) => "write_failure",
            MediaError::NotFoundOrForbidden => "not_found",
            MediaError::InvalidState { .. } => "invalid_state",
            MediaError::NotReady => "not_ready",
            MediaError::MediaLinkFailed => "media_link_failed",
            MediaError::CleanupFailure(_) => "cleanup_failure",
            MediaError::Internal(_) => "internal",
        }
    }
}

/// Result type alias for media operations.
pub type MediaResult<T> = Result<T, MediaError>;
