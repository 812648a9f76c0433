//! Linking uploaded media to the entities that consume it.
//!
//! The consuming entity and the `uploaded -> used` transition commit in one
//! unit of work. If the media can no longer be claimed the entity is rolled
//! back with it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::model::{CreatePost, PostRecord, ProfilePicture};
use crate::media::{
    MediaConsumer, MediaError, MediaRecord, MediaResult, MediaService, MediaStatus,
};
use crate::metrics::Metrics;
use crate::repository::{LinkUnit, MediaRepository};

/// Creates consuming entities and claims their media.
pub struct PostService {
    repo: Arc<dyn MediaRepository>,
    media: Arc<MediaService>,
    metrics: Arc<Metrics>,
}

impl PostService {
    pub fn new(
        repo: Arc<dyn MediaRepository>,
        media: Arc<MediaService>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repo,
            media,
            metrics,
        }
    }

    /// Create a post for `owner`, linking `input.media_id` if present.
    ///
    /// The input must already be validated.
    pub async fn create_post(&self, owner: Uuid, input: CreatePost) -> MediaResult<PostRecord> {
        let media = match input.media_id {
            Some(id) => Some(self.claimable(id, owner).await?),
            None => None,
        };

        let now = Utc::now();
        let post = PostRecord {
            id: Uuid::now_v7(),
            user_id: owner,
            description: input.description,
            image_url: media.as_ref().map(|m| self.media.public_url(m)),
            created_at: now,
            updated_at: now,
        };

        let mut unit = self.repo.begin().await?;
        unit.insert_post(&post).await?;
        if let Some(record) = &media {
            let consumer = MediaConsumer::Post(post.id);
            if let Err(e) = self.link(unit.as_mut(), record, owner, consumer, now).await {
                abort(unit).await;
                return Err(e);
            }
        }
        unit.commit().await?;

        if let Some(record) = &media {
            self.metrics.record_link("ok");
            info!(post_id = %post.id, media_id = %record.id, "post created with media");
        } else {
            info!(post_id = %post.id, "post created");
        }
        Ok(post)
    }

    /// Make `media_id` the profile picture of `owner`.
    pub async fn set_profile_picture(
        &self,
        owner: Uuid,
        media_id: Uuid,
    ) -> MediaResult<ProfilePicture> {
        let record = self.claimable(media_id, owner).await?;

        let now = Utc::now();
        let picture = ProfilePicture {
            user_id: owner,
            media_id,
            image_url: self.media.public_url(&record),
            updated_at: now,
        };

        let mut unit = self.repo.begin().await?;
        unit.upsert_profile_picture(&picture).await?;
        let consumer = MediaConsumer::ProfilePicture(owner);
        if let Err(e) = self.link(unit.as_mut(), &record, owner, consumer, now).await {
            abort(unit).await;
            return Err(e);
        }
        unit.commit().await?;

        self.metrics.record_link("ok");
        info!(user_id = %owner, media_id = %media_id, "profile picture set");
        Ok(picture)
    }

    /// A record `owner` may claim right now, with its file still in place.
    ///
    /// Media that was linked or expired has been claimed for good and fails
    /// with `MediaLinkFailed`, the same as losing the link race. Media that
    /// never became uploaded is `NotReady`.
    async fn claimable(&self, id: Uuid, owner: Uuid) -> MediaResult<MediaRecord> {
        let record = match self.media.get_for_consumption(id, owner).await {
            Ok(record) => record,
            Err(MediaError::NotReady) => {
                let e = self.unclaimable(id).await?;
                self.metrics.record_link(e.code());
                return Err(e);
            }
            Err(e) => {
                self.metrics.record_link(e.code());
                return Err(e);
            }
        };

        if !self.media.storage().exists(&record.storage_path).await? {
            warn!(media_id = %id, path = %record.storage_path, "uploaded media has no stored file");
            self.metrics.record_link("missing_file");
            return Err(MediaError::NotReady);
        }
        Ok(record)
    }

    /// Why an owned record failed the consumption check.
    async fn unclaimable(&self, id: Uuid) -> MediaResult<MediaError> {
        let Some(record) = self.repo.find_media(id).await? else {
            return Ok(MediaError::NotReady);
        };
        let taken = match record.status {
            MediaStatus::Used => true,
            MediaStatus::Uploaded => !record.is_linkable_at(Utc::now()),
            _ => false,
        };
        Ok(if taken {
            MediaError::MediaLinkFailed
        } else {
            MediaError::NotReady
        })
    }

    /// Claim `record` inside `unit`. A miss means another caller or the
    /// clock got there first.
    async fn link(
        &self,
        unit: &mut dyn LinkUnit,
        record: &MediaRecord,
        owner: Uuid,
        consumer: MediaConsumer,
        at: DateTime<Utc>,
    ) -> MediaResult<()> {
        if unit
            .link_media(record.id, owner, consumer, at)
            .await?
            .is_applied()
        {
            return Ok(());
        }

        warn!(media_id = %record.id, "media link lost, rolling back");
        self.metrics.record_link(MediaError::MediaLinkFailed.code());
        Err(MediaError::MediaLinkFailed)
    }
}

async fn abort(unit: Box<dyn LinkUnit>) {
    if let Err(e) = unit.rollback().await {
        warn!(error = %e, "rollback failed");
    }
}

impl std::fmt::Debug for PostService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostService").finish()
    }
}
