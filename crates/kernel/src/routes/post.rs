//! Post and profile picture route handlers.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::{post, put},
};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::Identity;
use crate::post::{CreatePost, PostResponse, ProfilePicture, SetProfilePicture};
use crate::state::AppState;

/// Create the post router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/post", post(create_post))
        .route("/api/users/me/profile-picture", put(set_profile_picture))
}

/// Create a post, optionally attaching an uploaded image.
///
/// POST /api/post
async fn create_post(
    State(state): State<AppState>,
    identity: Identity,
    input: Result<Json<CreatePost>, JsonRejection>,
) -> AppResult<(StatusCode, Json<PostResponse>)> {
    let Json(input) = input.map_err(|e| AppError::BadRequest(e.body_text()))?;
    input.validate()?;

    let post = state
        .posts()
        .create_post(identity.user_id(), input)
        .await?;
    Ok((StatusCode::CREATED, Json(PostResponse::from(post))))
}

/// Set the caller's profile picture.
///
/// PUT /api/users/me/profile-picture
async fn set_profile_picture(
    State(state): State<AppState>,
    identity: Identity,
    input: Result<Json<SetProfilePicture>, JsonRejection>,
) -> AppResult<Json<ProfilePicture>> {
    let Json(input) = input.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let picture = state
        .posts()
        .set_profile_picture(identity.user_id(), input.media_id)
        .await?;
    Ok(Json(picture))
}
