//! Media upload route handlers.

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Path, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{HeaderMap, StatusCode, header},
    routing::{get, post},
};
use tokio_stream::StreamExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AppResult;
use crate::media::{
    BodyError, IncomingFile, MediaError, MediaInfo, UPLOAD_FIELD, UploadResponse, ingest,
};
use crate::middleware::Identity;
use crate::state::AppState;

/// Create the media router.
///
/// The upload route carries its own body limit, sized to the upload cap.
pub fn router(max_upload_bytes: u64) -> Router<AppState> {
    let limit = usize::try_from(max_upload_bytes).unwrap_or(usize::MAX);
    Router::new()
        .route(
            "/api/media",
            post(upload_media).layer(DefaultBodyLimit::max(limit)),
        )
        .route("/api/media/{id}", get(media_info))
}

/// Upload a media file.
///
/// POST /api/media
/// Content-Type: multipart/form-data
///
/// Form fields:
/// - file_upload: the file to upload. Other fields are ignored.
async fn upload_media(
    State(state): State<AppState>,
    identity: Identity,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    let max = state.media().settings().max_upload_bytes;
    let result = receive(&state, identity, &headers, multipart, max).await;

    let metrics = state.metrics();
    match &result {
        Ok(upload) => {
            metrics.record_upload("ok", u64::try_from(upload.size).unwrap_or_default());
            info!(media_id = %upload.id, user_id = %identity.user_id(), size = upload.size, "media upload accepted");
        }
        Err(e) => {
            metrics.record_upload(e.code(), 0);
            debug!(user_id = %identity.user_id(), error = %e, "media upload rejected");
        }
    }

    let upload = result?;
    Ok((StatusCode::CREATED, Json(upload)))
}

async fn receive(
    state: &AppState,
    identity: Identity,
    headers: &HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
    max: u64,
) -> Result<UploadResponse, MediaError> {
    // Refuse declared oversize bodies before anything is staged.
    let declared_len = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared_len.is_some_and(|len| len > max) {
        return Err(MediaError::PayloadTooLarge { max });
    }

    let mut multipart = multipart.map_err(|e| {
        debug!(error = %e, "upload is not multipart");
        MediaError::NotMultipart
    })?;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return Err(match body_error(e) {
                    BodyError::LengthLimit => MediaError::PayloadTooLarge { max },
                    BodyError::Read(reason) => {
                        debug!(%reason, "malformed multipart body");
                        MediaError::NotMultipart
                    }
                });
            }
        };

        // Anything else is skipped; the next call drains it.
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let Some(original_filename) = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            continue;
        };
        let declared_type = field.content_type().map(str::to_string);

        let body = Box::pin(field.map(|chunk| chunk.map_err(body_error)));
        return ingest(
            state.media(),
            identity.user_id(),
            IncomingFile {
                original_filename,
                declared_type,
                body,
            },
        )
        .await;
    }

    Err(MediaError::NoFileProvided {
        field: UPLOAD_FIELD,
    })
}

/// Classify a multipart read failure.
fn body_error(error: MultipartError) -> BodyError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        BodyError::LengthLimit
    } else {
        BodyError::Read(error.body_text())
    }
}

/// Get one of the caller's media records.
///
/// GET /api/media/{id}
async fn media_info(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MediaInfo>> {
    let info = state.media().media_info(id, identity.user_id()).await?;
    Ok(Json(info))
}
