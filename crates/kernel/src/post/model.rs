//! Consuming entities: posts and profile pictures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A persisted post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub description: String,
    /// Access URL of the linked media, if any.
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The current profile picture of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfilePicture {
    pub user_id: Uuid,
    pub media_id: Uuid,
    pub image_url: String,
    pub updated_at: DateTime<Utc>,
}

/// Post creation request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePost {
    #[validate(length(min = 1, max = 1000))]
    pub description: String,
    /// Previously uploaded media to attach.
    #[serde(default)]
    pub media_id: Option<Uuid>,
}

/// Profile picture assignment request.
#[derive(Debug, Clone, Deserialize)]
pub struct SetProfilePicture {
    pub media_id: Uuid,
}

/// Post as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PostRecord> for PostResponse {
    fn from(post: PostRecord) -> Self {
        Self {
            id: post.id,
            user_id: post.user_id,
            image_url: post.image_url,
            description: post.description,
            created_at: post.created_at,
            updated_at: post.updated_at,
        }
    }
}
