//! Serving stored media files.

use axum::{
    Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::warn;

use crate::media::sniff;
use crate::state::AppState;

/// Create the uploads router.
pub fn router() -> Router<AppState> {
    Router::new().route("/uploads/{filename}", get(serve_upload))
}

/// Serve a stored file.
///
/// Only files of uploaded or used media are served. The content type comes
/// from the stored bytes, never from the name.
async fn serve_upload(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    // Security: stored names are flat
    if filename.contains('/') || filename.contains("..") || filename.contains('\0') {
        return StatusCode::NOT_FOUND.into_response();
    }

    let record = match state.media().servable(&filename).await {
        Ok(Some(record)) => record,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(filename = %filename, error = %e, "failed to look up upload");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let content = match state.storage().read(&record.storage_path).await {
        Ok(content) => content,
        Err(e) => {
            warn!(filename = %filename, error = %e, "failed to read upload");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let content_type = sniff(&content);
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff".to_string()),
            (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
        ],
        content,
    )
        .into_response()
}
